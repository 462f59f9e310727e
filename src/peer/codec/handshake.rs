use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::peer::PeerError, PeerId, Sha1Hash};

pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// The length of the handshake on the wire, in bytes.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// The message sent at the beginning of a peer session by both
/// sides of the connection.
///
/// handshake data format:
///
/// ```txt
/// <Protocol Identify length><Protocol Identify><Reserved><Info_hash> <Peer_id>
///
/// |   ---- 1 byte ----    |-----19 bytes----|-8 bytes-|-20 bytes-|-20 bytes-|
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// The protocol string, which must equal "BitTorrent protocol",
    /// as otherwise the connection will aborted.
    pub prot: [u8; 19],
    /// A reserved field, currently all zero. This is where the client's
    /// supported extensions are announced.
    pub reserved: [u8; 8],
    /// The torrent's SHA1 info hash, used to identify the torrent in the
    /// handshake and to verify the peer.
    pub info_hash: Sha1Hash,
    /// The arbitrary peer id, usually used to identify the torrent client.
    pub peer_id: PeerId,
}

impl Handshake {
    /// Create a new protocol version 1 handshake with the given info_hash and peer_id.
    pub fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        let mut prot = [0; 19];
        prot.copy_from_slice(PROTOCOL_STRING.as_bytes());
        Handshake {
            prot,
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    /// Returns the length of handshake, in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> u64 {
        HANDSHAKE_LEN as u64
    }

    /// Returns the handshake as it is sent on the wire.
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0; HANDSHAKE_LEN];
        buf[0] = self.prot.len() as u8;
        buf[1..20].copy_from_slice(&self.prot);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a raw handshake, which must be exactly [`HANDSHAKE_LEN`] bytes
    /// long and carry the "BitTorrent protocol" string.
    pub fn parse(raw: &[u8]) -> Result<Self, PeerError> {
        if raw.len() != HANDSHAKE_LEN
            || raw[0] as usize != PROTOCOL_STRING.len()
            || &raw[1..20] != PROTOCOL_STRING.as_bytes()
        {
            return Err(PeerError::InvalidHandshakeLength(raw.len()));
        }

        let mut buf = &raw[1..];
        let mut prot = [0; 19];
        buf.copy_to_slice(&mut prot);
        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);
        Ok(Handshake {
            prot,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Validates the peer's handshake against ours: it must reference the
    /// same torrent and come from a different peer.
    pub fn validate(&self, peer: &Handshake) -> Result<(), PeerError> {
        if peer.info_hash != self.info_hash {
            return Err(PeerError::InvalidInfoHash);
        }
        if peer.peer_id == self.peer_id {
            return Err(PeerError::SelfConnection);
        }
        Ok(())
    }

    /// Parses and validates a raw handshake response to this handshake.
    pub fn validate_response(&self, raw: &[u8]) -> Result<Handshake, PeerError> {
        let peer = Handshake::parse(raw)?;
        self.validate(&peer)?;
        Ok(peer)
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = PeerError;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), PeerError> {
        // we should only be sending the bittorrent protocol string
        debug_assert_eq!(handshake.prot, PROTOCOL_STRING.as_bytes());
        buf.reserve(HANDSHAKE_LEN);
        buf.put_slice(&handshake.to_bytes());
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = PeerError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Handshake>, PeerError> {
        if buf.is_empty() {
            return Ok(None);
        }

        // the protocol string length can be checked before the rest arrives,
        // so that garbage is rejected early
        if buf[0] as usize != PROTOCOL_STRING.len() {
            return Err(PeerError::InvalidHandshakeLength(buf.len()));
        }

        // check that we got the full handshake in the buffer, anything after
        // it belongs to the first message
        if buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }

        let raw = buf.split_to(HANDSHAKE_LEN);
        Handshake::parse(&raw).map(Some)
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Handshake>, PeerError> {
        match self.decode(buf)? {
            Some(handshake) => Ok(Some(handshake)),
            None if buf.is_empty() => Ok(None),
            // the peer closed the connection mid-handshake
            None => Err(PeerError::InvalidHandshakeLength(buf.remaining())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_HASH: Sha1Hash = [0xab; 20];
    const LOCAL_ID: PeerId = *b"-BS0001-000000000001";
    const REMOTE_ID: PeerId = *b"-BS0001-000000000002";

    #[test]
    fn should_encode_wire_layout() {
        let raw = Handshake::new(INFO_HASH, LOCAL_ID).to_bytes();
        assert_eq!(raw.len(), 68);
        assert_eq!(raw[0], 19);
        assert_eq!(&raw[1..20], b"BitTorrent protocol");
        assert_eq!(&raw[20..28], &[0; 8]);
        assert_eq!(&raw[28..48], &INFO_HASH);
        assert_eq!(&raw[48..68], &LOCAL_ID);
    }

    #[test]
    fn should_accept_same_torrent_from_other_peer() {
        let ours = Handshake::new(INFO_HASH, LOCAL_ID);
        let theirs = Handshake::new(INFO_HASH, REMOTE_ID).to_bytes();
        let peer = ours.validate_response(&theirs).unwrap();
        assert_eq!(peer.peer_id, REMOTE_ID);
    }

    #[test]
    fn should_reject_other_torrent() {
        let ours = Handshake::new(INFO_HASH, LOCAL_ID);
        let theirs = Handshake::new([0xcd; 20], REMOTE_ID).to_bytes();
        assert!(matches!(
            ours.validate_response(&theirs),
            Err(PeerError::InvalidInfoHash)
        ));
    }

    #[test]
    fn should_reject_self_connection() {
        let ours = Handshake::new(INFO_HASH, LOCAL_ID);
        let theirs = ours.to_bytes();
        assert!(matches!(
            ours.validate_response(&theirs),
            Err(PeerError::SelfConnection)
        ));
    }

    #[test]
    fn should_reject_wrong_length() {
        let ours = Handshake::new(INFO_HASH, LOCAL_ID);
        let theirs = Handshake::new(INFO_HASH, REMOTE_ID).to_bytes();
        assert!(matches!(
            ours.validate_response(&theirs[..67]),
            Err(PeerError::InvalidHandshakeLength(67))
        ));
        let mut longer = theirs.to_vec();
        longer.push(0);
        assert!(matches!(
            ours.validate_response(&longer),
            Err(PeerError::InvalidHandshakeLength(69))
        ));
    }

    #[test]
    fn codec_leaves_following_message_in_buffer() {
        let mut buf = BytesMut::new();
        HandshakeCodec
            .encode(Handshake::new(INFO_HASH, REMOTE_ID), &mut buf)
            .unwrap();
        buf.extend_from_slice(&[0, 0, 0, 1, 1]);

        let mut partial = buf.split_to(30);
        assert!(HandshakeCodec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        let handshake = HandshakeCodec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(handshake.peer_id, REMOTE_ID);
        assert_eq!(&partial[..], &[0, 0, 0, 1, 1]);
    }

    #[test]
    fn codec_rejects_other_protocols() {
        let mut buf = BytesMut::from(&b"\x13BitTorrent protocoX"[..]);
        buf.extend_from_slice(&[0; 48]);
        assert!(HandshakeCodec.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"\x05hello"[..]);
        assert!(HandshakeCodec.decode(&mut buf).is_err());
    }
}
