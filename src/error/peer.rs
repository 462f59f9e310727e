pub use tokio::io::Error as IoError;

use crate::{
    error::disk::{ReadError, WriteError},
    PieceIndex,
};

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

/// Error type returned when a peer wire frame cannot be decoded into a
/// message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated message")]
    /// The frame ended before its length prefix, id or payload was complete.
    Truncated,

    #[error("unknown message id {0}")]
    /// The message id is not one of the protocol's message ids.
    UnknownMessageId(u8),

    #[error("invalid payload length {len} for message id {id}")]
    /// The declared message length does not fit the message's payload layout.
    InvalidPayloadLength { id: u8, len: u32 },

    #[error("message length {0} exceeds frame limit")]
    /// The length prefix is larger than any message we accept. The stream
    /// cannot be resynchronized after this.
    FrameTooLarge(u32),

    #[error("{0}")]
    /// The underlying transport failed.
    Io(std::io::Error),
}

impl From<IoError> for DecodeError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("invalid handshake length {0}")]
    /// The handshake response was not exactly 68 bytes long, or its protocol
    /// string was not "BitTorrent protocol".
    InvalidHandshakeLength(usize),

    #[error("invalid info hash")]
    /// Peer's torrent info hash did not match ours.
    InvalidInfoHash,

    #[error("connected to self")]
    /// The peer id in the handshake is our own.
    SelfConnection,

    #[error("keep-alive timeout")]
    /// No message was received from the peer within the keep-alive period.
    KeepAliveTimeout,

    #[error("timed out")]
    /// A connect, send or receive did not complete within the I/O timeout.
    Timeout,

    #[error("peer disconnected")]
    /// The connection is closed, either by the peer or by us.
    Disconnected,

    #[error("peer does not have piece {0}")]
    /// A piece download was attempted from a peer that does not have it.
    PieceUnavailable(PieceIndex),

    #[error("no file to store pieces in")]
    /// A piece download was attempted before a file handler was attached.
    NoFileHandler,

    #[error("peer is choking us")]
    /// A piece download was attempted while not allowed to request blocks.
    Choked,

    #[error("received block does not match request {0}")]
    /// The peer answered a request with a different block.
    BlockMismatch(crate::blockinfo::BlockInfo),

    #[error("piece {index} has length {len}, expected {expected}")]
    /// The assembled piece is not as long as the metadata says.
    InvalidPieceLength {
        index: PieceIndex,
        len: usize,
        expected: usize,
    },

    #[error("piece {0} hash mismatch")]
    /// The assembled piece's SHA-1 does not match the metadata.
    InvalidPieceHash(PieceIndex),

    #[error("{0}")]
    /// The transport could not be decoded into messages anymore.
    Decode(DecodeError),

    #[error("{0}")]
    /// Reading a requested block from disk failed.
    Read(ReadError),

    #[error("{0}")]
    /// Writing a downloaded block to disk failed.
    Write(WriteError),

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl PeerError {
    /// Returns true if the error leaves the connection unusable.
    ///
    /// Piece validation and disk errors are local to a single piece, and a
    /// peer may choke us at any time. The session may still be used for
    /// another piece after these.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InvalidPieceLength { .. }
                | Self::InvalidPieceHash(_)
                | Self::PieceUnavailable(_)
                | Self::Choked
                | Self::Read(_)
                | Self::Write(_)
        )
    }
}

impl From<IoError> for PeerError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for PeerError {
    fn from(value: DecodeError) -> Self {
        match value {
            DecodeError::Io(e) => Self::Io(e),
            e => Self::Decode(e),
        }
    }
}

impl From<ReadError> for PeerError {
    fn from(value: ReadError) -> Self {
        Self::Read(value)
    }
}

impl From<WriteError> for PeerError {
    fn from(value: WriteError) -> Self {
        Self::Write(value)
    }
}
