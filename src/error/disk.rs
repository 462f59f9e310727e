/// Error type returned on failed file allocations.
///
/// This error is non-fatal, the swarm refuses to start a run and reports
/// the condition.
#[derive(Debug, thiserror::Error)]
pub enum NewFileError {
    #[error("{0}")]
    /// IO error while opening or allocating the file.
    Io(std::io::Error),
}

impl From<std::io::Error> for NewFileError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error type returned on failed block writes.
///
/// This error is non-fatal so it should not be grouped with the swarm
/// error type as it may be recovered from.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("invalid block {piece_index}:{offset} of {len} bytes")]
    /// The block does not lie within the file.
    InvalidBlock {
        piece_index: usize,
        offset: u32,
        len: usize,
    },

    #[error("{0}")]
    /// An IO error ocurred.
    Io(std::io::Error),
}

impl From<std::io::Error> for WriteError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error type returned on failed block reads.
///
/// This error is non-fatal so it should not be grouped with the swarm
/// error type as it may be recovered from.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("invalid block {piece_index}:{offset} of {len} bytes")]
    /// The block does not lie within the file.
    InvalidBlock {
        piece_index: usize,
        offset: u32,
        len: u32,
    },

    #[error("torrent data missing")]
    /// The block is valid within torrent but the file ends before it.
    MissingData,

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::MissingData
        } else {
            Self::Io(value)
        }
    }
}
