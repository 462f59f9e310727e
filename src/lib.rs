//! A BitTorrent peer wire protocol engine: peer sessions speaking the wire
//! protocol, and a swarm coordinator that downloads a torrent from many peers
//! at once (rarest piece first) or seeds it to them.

pub mod avg;
pub mod blockinfo;
pub mod conf;
pub mod counter;
pub mod disk;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod piece_picker;
pub mod storage_info;
pub mod swarm;
pub mod tracker;

mod define;
pub use define::*;
