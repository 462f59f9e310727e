use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use serde::de;
use serde_derive::Deserialize;

/// The tracker's answer to an announce.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct Response {
    /// Must be echoed in later announces if present.
    #[serde(rename = "tracker id")]
    pub tracker_id: Option<String>,

    /// If present the request failed and no other field is valid.
    #[serde(rename = "failure reason")]
    pub failure_reason: Option<String>,

    /// Like a failure reason, but the response is still valid.
    #[serde(rename = "warning message")]
    pub warning_message: Option<String>,

    /// How long to wait before re-announcing.
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub interval: Option<Duration>,

    /// Re-announcing before this is not allowed.
    #[serde(
        default,
        rename = "min interval",
        deserialize_with = "deserialize_seconds"
    )]
    pub min_interval: Option<Duration>,

    #[serde(rename = "complete")]
    pub seeder_count: Option<usize>,
    #[serde(rename = "incomplete")]
    pub leecher_count: Option<usize>,

    /// The peers, including the IPv6 peers of a `peers6` key once
    /// [`Response::merge_peers`] was called.
    #[serde(default, deserialize_with = "deserialize_peers")]
    pub peers: Vec<SocketAddr>,

    #[serde(default, deserialize_with = "deserialize_peers6")]
    pub(super) peers6: Vec<SocketAddr>,
}

impl Response {
    /// Moves the `peers6` entries into `peers`.
    pub(super) fn merge_peers(&mut self) {
        self.peers.append(&mut self.peers6);
    }
}

/// Deserializes a whole number of seconds.
pub fn deserialize_seconds<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: de::Deserializer<'de>,
{
    let secs: Option<u64> = de::Deserialize::deserialize(deserializer)?;
    Ok(secs.map(Duration::from_secs))
}

/// Deserializes a peer list sent in either of its two forms: a compact byte
/// string of IPv4 peers, or a list of dicts. The peer ids of the dict form are
/// dropped.
pub fn deserialize_peers<'de, D>(
    deserializer: D,
) -> Result<Vec<SocketAddr>, D::Error>
where
    D: de::Deserializer<'de>,
{
    deserializer.deserialize_any(PeersVisitor { entry_len: 6 })
}

/// Deserializes the compact IPv6 peer string of [BEP 7].
///
/// [BEP 7]: http://bittorrent.org/beps/bep_0007.html
pub fn deserialize_peers6<'de, D>(
    deserializer: D,
) -> Result<Vec<SocketAddr>, D::Error>
where
    D: de::Deserializer<'de>,
{
    deserializer.deserialize_any(PeersVisitor { entry_len: 18 })
}

struct PeersVisitor {
    /// The address length plus the 2 port bytes.
    entry_len: usize,
}

impl<'de> de::Visitor<'de> for PeersVisitor {
    type Value = Vec<SocketAddr>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "a compact peer string of {} byte entries or a list of peer dicts",
            self.entry_len
        )
    }

    /// The compact form concatenates the addresses in network byte order,
    /// each followed by its port.
    fn visit_bytes<E>(self, bytes: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let entry_len = self.entry_len;
        if bytes.len() % entry_len != 0 {
            return Err(E::invalid_length(bytes.len(), &self));
        }

        Ok(bytes
            .chunks_exact(entry_len)
            .map(|entry| {
                let (ip, port) = entry.split_at(entry_len - 2);
                let ip = match <[u8; 4]>::try_from(ip) {
                    Ok(v4) => IpAddr::V4(Ipv4Addr::from(v4)),
                    Err(_) => {
                        let mut v6 = [0; 16];
                        v6.copy_from_slice(ip);
                        IpAddr::V6(Ipv6Addr::from(v6))
                    }
                };
                SocketAddr::new(ip, u16::from_be_bytes([port[0], port[1]]))
            })
            .collect())
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        #[derive(Deserialize)]
        struct DictPeer {
            ip: String,
            port: u16,
        }

        let mut peers = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(peer) = seq.next_element::<DictPeer>()? {
            // the ip may also be a DNS name, which we don't resolve
            match peer.ip.parse() {
                Ok(ip) => peers.push(SocketAddr::new(ip, peer.port)),
                Err(_) => log::debug!("Skipping peer host {}", peer.ip),
            }
        }
        Ok(peers)
    }
}
