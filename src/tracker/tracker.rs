use std::{net::SocketAddr, time::Duration};

use percent_encoding::percent_encode;
use reqwest::{Client, Url};

use super::{announce::Announce, response::Response, URL_ENCODE_RESERVED};
use crate::{
    error::tracker::{Result, TrackerError},
    PeerId, Sha1Hash,
};

/// The peers of a torrent and the swarm figures reported by its tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeersData {
    /// How long to wait before announcing again.
    pub interval: Option<Duration>,
    /// The number of peers with the whole file.
    pub seeders: Option<usize>,
    /// The number of peers still downloading.
    pub leechers: Option<usize>,
    /// The peer addresses to connect to.
    pub peers: Vec<SocketAddr>,
}

/// The HTTP tracker of a torrent, from which we request peers and to which we
/// announce transfer progress.
pub struct Tracker {
    /// The HTTP client (from reqwest::Client)
    client: Client,
    url: Url,
}

impl Tracker {
    pub fn new(url: Url) -> Self {
        Tracker {
            client: Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends an announce request to the tracker with the specified parameters.
    ///
    /// This may be used by a torrent to request peers to download from, and
    /// to report its current status to the tracker. A response carrying a
    /// failure reason is returned as [`TrackerError::Failure`].
    pub async fn announce(&self, params: Announce) -> Result<Response> {
        // the raw info hash and peer id bytes are not valid UTF-8, so they
        // are percent encoded by hand rather than by the query builder
        let url = format!(
            "{url}\
            ?info_hash={info_hash}\
            &peer_id={peer_id}",
            url = self.url,
            info_hash = percent_encode(&params.info_hash, URL_ENCODE_RESERVED),
            peer_id = percent_encode(&params.peer_id, URL_ENCODE_RESERVED)
        );

        log::debug!("Announcing to tracker {}", self.url);
        let resp = self
            .client
            .get(&url)
            .query(&params.query_pairs())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let mut resp: Response = serde_bencode::from_bytes(&resp)?;
        if let Some(reason) = resp.failure_reason.take() {
            log::warn!("Tracker {} failure: {}", self.url, reason);
            return Err(TrackerError::Failure(reason));
        }
        if let Some(warning) = &resp.warning_message {
            log::warn!("Tracker {} warning: {}", self.url, warning);
        }
        resp.merge_peers();
        Ok(resp)
    }

    /// Announces that we start sharing the torrent and returns the peers the
    /// tracker knows about.
    pub async fn get_peers_data(
        &self,
        info_hash: Sha1Hash,
        peer_id: PeerId,
        port: u16,
        left: u64,
    ) -> Result<PeersData> {
        let resp = self
            .announce(Announce::started(info_hash, peer_id, port, left))
            .await?;
        log::info!(
            "Tracker {} returned {} peer(s)",
            self.url,
            resp.peers.len()
        );
        Ok(PeersData {
            interval: resp.interval,
            seeders: resp.seeder_count,
            leechers: resp.leecher_count,
            peers: resp.peers,
        })
    }
}
