use std::{fmt, net::IpAddr};

use crate::{PeerId, Sha1Hash};

/// The query of an announce request.
///
/// See [BEP 3](http://bittorrent.org/beps/bep_0003.html#trackers) for the
/// meaning of each key.
#[derive(Clone, Debug)]
pub struct Announce {
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
    /// The port we accept peer connections on.
    pub port: u16,
    /// Our address, only needed if it differs from the one the request
    /// comes from (e.g. behind a proxy).
    pub ip: Option<IpAddr>,
    /// Payload bytes downloaded so far.
    pub downloaded: u64,
    /// Payload bytes uploaded so far.
    pub uploaded: u64,
    /// Bytes still missing from the file.
    pub left: u64,
    /// How many peers we want. Left to the tracker if `None`.
    pub peer_count: Option<usize>,
    /// Echoes the `tracker id` of a previous response.
    pub tracker_id: Option<String>,
    /// `None` for the regular re-announces.
    pub event: Option<Event>,
}

impl Announce {
    /// The first announce of a run, before anything was transferred.
    pub fn started(
        info_hash: Sha1Hash,
        peer_id: PeerId,
        port: u16,
        left: u64,
    ) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            ip: None,
            downloaded: 0,
            uploaded: 0,
            left,
            peer_count: None,
            tracker_id: None,
            event: Some(Event::Started),
        }
    }

    /// The query parameters that are valid UTF-8. The info hash and peer id
    /// are raw bytes and have to be percent encoded separately.
    pub(super) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("port", self.port.to_string()),
            ("downloaded", self.downloaded.to_string()),
            ("uploaded", self.uploaded.to_string()),
            ("left", self.left.to_string()),
            ("compact", "1".to_string()),
        ];
        if let Some(peer_count) = self.peer_count {
            query.push(("numwant", peer_count.to_string()));
        }
        if let Some(ip) = self.ip {
            query.push(("ip", ip.to_string()));
        }
        if let Some(event) = self.event {
            query.push(("event", event.to_string()));
        }
        if let Some(tracker_id) = &self.tracker_id {
            query.push(("trackerid", tracker_id.clone()));
        }
        query
    }
}

/// The lifecycle event reported with an announce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Started,
    /// The download finished. Not sent if we started out as a seeder.
    Completed,
    Stopped,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Event::Started => "started",
            Event::Completed => "completed",
            Event::Stopped => "stopped",
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn started_announce_reports_event_and_optional_keys() {
        let mut announce = Announce::started([1; 20], [2; 20], 6881, 100);
        assert_eq!(
            announce.query_pairs(),
            vec![
                ("port", "6881".to_string()),
                ("downloaded", "0".to_string()),
                ("uploaded", "0".to_string()),
                ("left", "100".to_string()),
                ("compact", "1".to_string()),
                ("event", "started".to_string()),
            ]
        );

        announce.event = None;
        announce.peer_count = Some(30);
        announce.tracker_id = Some("abc".into());
        let query = announce.query_pairs();
        assert!(query.contains(&("numwant", "30".to_string())));
        assert!(query.contains(&("trackerid", "abc".to_string())));
        assert!(!query.iter().any(|(key, _)| *key == "event"));
    }
}
