//! Set of module Error
pub mod disk;
pub mod metainfo;
pub mod peer;
pub mod swarm;
pub mod tracker;

pub use disk::{NewFileError, ReadError, WriteError};
pub use metainfo::MetainfoError;
pub use peer::{DecodeError, PeerError};
pub use swarm::SwarmError;
pub use tracker::TrackerError;
