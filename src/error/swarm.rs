use tokio::io::Error as IoError;
use tokio::task::JoinError;

use crate::error::disk::NewFileError;

pub type Result<T, E = SwarmError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("file handler not attached")]
    /// A download or seed run was started before a shared file handler was
    /// added to the swarm.
    NoFileHandler,

    #[error("no peers completed the handshake")]
    /// Every known peer failed to connect or to handshake.
    NoPeers,

    #[error("no usable peer has any of the {remaining} remaining pieces")]
    /// The download cannot make progress anymore.
    Stalled { remaining: usize },

    #[error("{0}")]
    /// The file handler could not be allocated.
    Disk(NewFileError),

    #[error("download task failed: {0}")]
    /// A spawned task panicked or was cancelled.
    Join(JoinError),

    #[error("{0}")]
    /// An Io error occurred.
    Io(std::io::Error),
}

impl From<IoError> for SwarmError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl From<NewFileError> for SwarmError {
    fn from(value: NewFileError) -> Self {
        Self::Disk(value)
    }
}

impl From<JoinError> for SwarmError {
    fn from(value: JoinError) -> Self {
        Self::Join(value)
    }
}
