use std::collections::BTreeSet;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    blockinfo::BlockInfo, error::peer::DecodeError, Bitfield, PieceIndex,
};

/// The largest frame we accept from a peer, larger length prefixes are
/// treated as a broken stream.
pub const MAX_FRAME_LEN: u32 = 1 << 21;

/// The ID of a message, which is included as a prefix in most messages.
///
/// The handshake and keep alive messages don't have explicit IDs.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Block = 7,
    Cancel = 8,
    Port = 9,
}

impl MessageId {
    /// Returns the header length of the specific message type.
    ///
    /// Since this is fix size for all messages, it can be determined simply from
    /// the message id.
    #[inline(always)]
    pub fn header_len(&self) -> u64 {
        match self {
            MessageId::Choke => 4 + 1,
            MessageId::Unchoke => 4 + 1,
            MessageId::Interested => 4 + 1,
            MessageId::NotInterested => 4 + 1,
            MessageId::Have => 4 + 1 + 4,
            MessageId::Bitfield => 4 + 1,
            MessageId::Request => 4 + 1 + 3 * 4,
            MessageId::Block => 4 + 1 + 2 * 4,
            MessageId::Cancel => 4 + 1 + 3 * 4,
            MessageId::Port => 4 + 1 + 2,
        }
    }
}

impl TryFrom<u8> for MessageId {
    type Error = DecodeError;
    fn try_from(k: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        match k {
            k if k == Choke as u8 => Ok(Choke),
            k if k == Unchoke as u8 => Ok(Unchoke),
            k if k == Interested as u8 => Ok(Interested),
            k if k == NotInterested as u8 => Ok(NotInterested),
            k if k == Have as u8 => Ok(Have),
            k if k == Bitfield as u8 => Ok(Bitfield),
            k if k == Request as u8 => Ok(Request),
            k if k == Block as u8 => Ok(Block),
            k if k == Cancel as u8 => Ok(Cancel),
            k if k == Port as u8 => Ok(Port),
            k => Err(DecodeError::UnknownMessageId(k)),
        }
    }
}

/// The actual message exchanged by peer.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    KeepAlive,
    Bitfield(Bitfield),
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: PieceIndex,
    },
    Request(BlockInfo),
    /// The `piece` message of the protocol, carrying one block.
    Block {
        piece_index: PieceIndex,
        offset: u32,
        data: Vec<u8>,
    },
    Cancel(BlockInfo),
    Port(u16),
}

impl Message {
    /// Returns the ID of the message, if it has one  (e.g. keep alive doesn't).
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Bitfield(_) => Some(MessageId::Bitfield),
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Request(_) => Some(MessageId::Request),
            Message::Block { .. } => Some(MessageId::Block),
            Message::Cancel(_) => Some(MessageId::Cancel),
            Message::Port(_) => Some(MessageId::Port),
        }
    }

    /// Returns the length of the part of the message that constitutes the
    /// message header. For all but the block and bitfield messages this is
    /// simply the size of the message.
    pub fn protocol_len(&self) -> u64 {
        match self.id() {
            Some(id) => id.header_len(),
            None => 4,
        }
    }

    /// Encodes the message with its length prefix into the buffer.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), DecodeError> {
        let id = match self.id() {
            Some(id) => id,
            None => {
                buf.put_u32(0);
                return Ok(());
            }
        };

        let payload_len = match self {
            Message::Have { .. } => 4,
            Message::Request(_) | Message::Cancel(_) => 12,
            Message::Block { data, .. } => 8 + data.len(),
            Message::Bitfield(bitfield) => bitfield.as_raw_slice().len(),
            Message::Port(_) => 2,
            _ => 0,
        };
        let msg_len = u32::try_from(1 + payload_len)
            .map_err(|_| DecodeError::FrameTooLarge(u32::MAX))?;
        buf.reserve(4 + msg_len as usize);
        buf.put_u32(msg_len);
        buf.put_u8(id as u8);

        match self {
            Message::Have { piece_index } => {
                buf.put_u32(to_wire_index(*piece_index)?);
            }
            Message::Request(block) | Message::Cancel(block) => {
                block.encode(buf)?;
            }
            Message::Block {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32(to_wire_index(*piece_index)?);
                buf.put_u32(*offset);
                buf.extend_from_slice(data);
            }
            Message::Bitfield(bitfield) => {
                buf.extend_from_slice(&bitfield_bytes(bitfield));
            }
            Message::Port(port) => buf.put_u16(*port),
            _ => {}
        }
        Ok(())
    }

    /// Returns the message as it is sent on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.to_vec())
    }
}

impl BlockInfo {
    /// Encode the block info in the network binary protocol's format
    /// into the given buffer.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), DecodeError> {
        buf.put_u32(to_wire_index(self.piece_index)?);
        buf.put_u32(self.offset);
        buf.put_u32(self.len);
        Ok(())
    }

    fn decode(mut payload: &[u8]) -> Self {
        debug_assert_eq!(payload.len(), 12);
        BlockInfo {
            piece_index: payload.get_u32() as PieceIndex,
            offset: payload.get_u32(),
            len: payload.get_u32(),
        }
    }
}

fn to_wire_index(index: PieceIndex) -> Result<u32, DecodeError> {
    u32::try_from(index).map_err(|_| DecodeError::FrameTooLarge(u32::MAX))
}

/// Decodes a single message from the parts of its frame: the length prefix
/// value, the id byte (absent for keep alive) and the payload following it.
pub fn decode_frame(
    msg_len: u32,
    id: Option<u8>,
    payload: &[u8],
) -> Result<Message, DecodeError> {
    let id = match (msg_len, id) {
        (0, None) => return Ok(Message::KeepAlive),
        (0, Some(id)) => {
            return Err(DecodeError::InvalidPayloadLength { id, len: 0 })
        }
        (_, None) => return Err(DecodeError::Truncated),
        (_, Some(id)) => id,
    };
    let expected_payload_len = msg_len as usize - 1;
    if payload.len() < expected_payload_len {
        return Err(DecodeError::Truncated);
    }
    if payload.len() > expected_payload_len {
        return Err(DecodeError::InvalidPayloadLength { id, len: msg_len });
    }

    let msg_id = MessageId::try_from(id)?;
    let invalid = || DecodeError::InvalidPayloadLength { id, len: msg_len };
    let mut payload = payload;
    let msg = match msg_id {
        MessageId::Choke
        | MessageId::Unchoke
        | MessageId::Interested
        | MessageId::NotInterested
            if !payload.is_empty() =>
        {
            return Err(invalid());
        }
        MessageId::Choke => Message::Choke,
        MessageId::Unchoke => Message::Unchoke,
        MessageId::Interested => Message::Interested,
        MessageId::NotInterested => Message::NotInterested,
        MessageId::Have => {
            if payload.len() != 4 {
                return Err(invalid());
            }
            Message::Have {
                piece_index: payload.get_u32() as PieceIndex,
            }
        }
        MessageId::Bitfield => {
            Message::Bitfield(Bitfield::from_slice(payload))
        }
        MessageId::Request => {
            if payload.len() != 12 {
                return Err(invalid());
            }
            Message::Request(BlockInfo::decode(payload))
        }
        MessageId::Block => {
            if payload.len() < 8 {
                return Err(invalid());
            }
            let piece_index = payload.get_u32() as PieceIndex;
            let offset = payload.get_u32();
            Message::Block {
                piece_index,
                offset,
                data: payload.to_vec(),
            }
        }
        MessageId::Cancel => {
            if payload.len() != 12 {
                return Err(invalid());
            }
            Message::Cancel(BlockInfo::decode(payload))
        }
        MessageId::Port => {
            if payload.len() != 2 {
                return Err(invalid());
            }
            Message::Port(payload.get_u16())
        }
    };
    Ok(msg)
}

/// Frames peer wire messages (everything exchanged after the handshake).
///
/// A frame whose length prefix was read completely but whose content cannot be
/// decoded (unknown id, inconsistent payload) is dropped and decoding carries
/// on with the next frame. Only a length prefix beyond [`MAX_FRAME_LEN`] is
/// an error, as the stream cannot be trusted anymore after that.
pub struct PeerCodec;

impl Encoder<Message> for PeerCodec {
    type Error = DecodeError;

    fn encode(
        &mut self,
        msg: Message,
        buf: &mut BytesMut,
    ) -> Result<(), DecodeError> {
        msg.encode(buf)
    }
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = DecodeError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Message>, DecodeError> {
        loop {
            // the message length header must be present at the minimum,
            // otherwise we can't determine the message type
            if buf.len() < 4 {
                return Ok(None);
            }

            // peek at the length without advancing, the whole frame may not be
            // in the buffer yet
            let mut len_bytes = [0; 4];
            len_bytes.copy_from_slice(&buf[..4]);
            let msg_len = u32::from_be_bytes(len_bytes);
            if msg_len > MAX_FRAME_LEN {
                return Err(DecodeError::FrameTooLarge(msg_len));
            }

            let frame_len = 4 + msg_len as usize;
            if buf.len() < frame_len {
                buf.reserve(frame_len - buf.len());
                return Ok(None);
            }

            buf.advance(4);
            let frame = buf.split_to(msg_len as usize);
            let (id, payload) = match frame.split_first() {
                Some((id, payload)) => (Some(*id), payload),
                None => (None, &frame[..]),
            };
            match decode_frame(msg_len, id, payload) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    log::warn!("Dropping undecodable message: {}", e);
                }
            }
        }
    }
}

/// Returns the bitfield as its wire payload: one bit per piece, the most
/// significant bit of the first byte being piece 0, with the unused trailing
/// bits cleared.
pub fn bitfield_bytes(bitfield: &Bitfield) -> Vec<u8> {
    let mut bytes = bitfield.as_raw_slice().to_vec();
    let rem = bitfield.len() % 8;
    if rem != 0 {
        if let Some(last) = bytes.last_mut() {
            *last &= 0xff << (8 - rem);
        }
    }
    bytes
}

/// Creates the bitfield of `piece_count` pieces in which exactly the given
/// pieces are set. Indices beyond the piece count are ignored.
pub fn create_bitfield(
    pieces: impl IntoIterator<Item = PieceIndex>,
    piece_count: usize,
) -> Bitfield {
    let mut bitfield = Bitfield::repeat(false, piece_count);
    for index in pieces {
        if index < piece_count {
            bitfield.set(index, true);
        }
    }
    bitfield
}

/// Returns the indices of the pieces set in the bitfield.
pub fn extract_pieces(bitfield: &Bitfield) -> BTreeSet<PieceIndex> {
    bitfield.iter_ones().collect()
}
