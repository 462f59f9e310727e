//! This module defines types used to configure the swarm and its parts.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use rand::Rng;

use crate::{PeerId, BLOCK_LEN};

/// The default client id prefix, in the Azureus style.
pub const CLIENT_ID_PREFIX: &[u8; 8] = b"-BS0001-";

/// The port on which the client listens for peers when seeding.
pub const DEFAULT_PORT: u16 = 6881;

/// The global configuration for the client and all its swarms.
#[derive(Clone, Debug)]
pub struct Conf {
    pub engine: EngineConf,
    pub torrent: TorrentConf,
}

impl Conf {
    /// Returns the configuration with reasonable defaults, except for the
    /// download directory, as it is not sensible to guess that for the user.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: EngineConf {
                client_id: generate_peer_id(),
                download_dir: download_dir.into(),
                listen_addr: SocketAddr::new(
                    Ipv4Addr::UNSPECIFIED.into(),
                    DEFAULT_PORT,
                ),
            },
            torrent: TorrentConf::default(),
        }
    }
}

/// Configuration related to the client itself.
#[derive(Clone, Debug)]
pub struct EngineConf {
    /// The ID of the client to announce to trackers and other peers.
    pub client_id: PeerId,
    /// The directory in which the downloaded file is placed.
    pub download_dir: PathBuf,
    /// The address on which the seeding accept loop listens.
    pub listen_addr: SocketAddr,
}

/// Configuration for a torrent's swarm.
#[derive(Clone, Debug)]
pub struct TorrentConf {
    /// The number of (piece, peer) downloads that run concurrently.
    pub max_peers: usize,

    /// The largest block we request and the largest we serve.
    pub max_block_len: u32,

    /// The time a TCP connect to a peer may take.
    pub connect_timeout: Duration,

    /// The time a single send or receive may take, including the
    /// handshake exchange.
    pub io_timeout: Duration,

    /// If the peer sends nothing for this long, the session is closed.
    pub keep_alive_timeout: Duration,

    /// After the handshake, unsolicited messages are read until none arrives
    /// for this long.
    pub burst_timeout: Duration,

    /// The initial burst is cut off after this long, even if the peer keeps
    /// sending.
    pub burst_limit: Duration,

    /// Until this many pieces are downloaded, peers are picked at random
    /// rather than by their download rate.
    pub warmup_pieces: usize,
}

impl Default for TorrentConf {
    fn default() -> Self {
        Self {
            max_peers: 5,
            max_block_len: BLOCK_LEN,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            keep_alive_timeout: Duration::from_secs(10),
            burst_timeout: Duration::from_secs(2),
            burst_limit: Duration::from_secs(8),
            warmup_pieces: 10,
        }
    }
}

/// Generates an Azureus-style peer id: the client prefix followed by 12
/// random ASCII digits.
pub fn generate_peer_id() -> PeerId {
    let mut id = [0; 20];
    id[..CLIENT_ID_PREFIX.len()].copy_from_slice(CLIENT_ID_PREFIX);
    let mut rng = rand::thread_rng();
    for b in id[CLIENT_ID_PREFIX.len()..].iter_mut() {
        *b = b'0' + rng.gen_range(0..10);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_prefixed_and_numeric() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], CLIENT_ID_PREFIX);
        assert!(id[8..].iter().all(u8::is_ascii_digit));
    }
}
