use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use mockito::Matcher;
use pretty_assertions::assert_eq;
use serde_derive::{Deserialize, Serialize};

use crate::{error::tracker::TrackerError, tracker::prelude::*};

#[derive(Deserialize)]
struct PeersResponse {
    #[serde(deserialize_with = "deserialize_peers")]
    peers: Vec<SocketAddr>,
}

const INFO_HASH: &str = "abcdefghij1234567890";
const PEER_ID: &str = "-BS0001-000000000001";

fn to_array(s: &str) -> [u8; 20] {
    let mut buf = [0; 20];
    buf.copy_from_slice(s.as_bytes());
    buf
}

#[test]
fn should_parse_compact_peer_list() {
    let ip = Ipv4Addr::new(192, 168, 0, 1);
    let port = 8989;

    // build up encoded byte string
    let mut encoded = Vec::new();
    encoded.extend_from_slice(b"d5:peers");
    encoded.extend_from_slice(&encode_compact_peers_list(&[(ip, port)]));
    encoded.push(b'e');

    let decoded: PeersResponse = serde_bencode::from_bytes(&encoded)
        .expect("cannot decode bencode string of peers");

    let addr = SocketAddr::new(ip.into(), port);
    assert_eq!(decoded.peers, vec![addr]);
}

#[test]
fn should_reject_truncated_compact_peer_list() {
    let encoded = b"d5:peers5:\x01\x02\x03\x04\x05e";
    assert!(serde_bencode::from_bytes::<PeersResponse>(encoded).is_err());
}

#[test]
fn should_parse_full_peer_list() {
    #[derive(Debug, Serialize)]
    struct RawPeer {
        ip: String,
        port: u16,
    }

    #[derive(Debug, Serialize)]
    struct RawPeers {
        peers: Vec<RawPeer>,
    }

    let peers = RawPeers {
        peers: vec![
            RawPeer {
                ip: "192.168.1.10".into(),
                port: 55123,
            },
            RawPeer {
                ip: "1.45.96.2".into(),
                port: 1234,
            },
            RawPeer {
                ip: "123.123.123.123".into(),
                port: 49950,
            },
        ],
    };

    let encoded = serde_bencode::to_string(&peers).unwrap();

    let decoded: PeersResponse = serde_bencode::from_str(&encoded)
        .expect("cannot decode bencode list of peers");
    let expected: Vec<_> = peers
        .peers
        .iter()
        .map(|p| SocketAddr::new(p.ip.parse().unwrap(), p.port))
        .collect();
    assert_eq!(decoded.peers, expected);
}

#[tokio::test]
async fn should_return_peers_on_announce() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    // ready announce to send.
    let announce = Announce {
        info_hash: to_array(INFO_HASH),
        peer_id: to_array(PEER_ID),
        port: 16,
        downloaded: 1234,
        uploaded: 1234,
        left: 1234,
        peer_count: Some(2),
        ip: None,
        event: None,
        tracker_id: None,
    };

    // tracker provide useable peer.
    let peer_ip = Ipv4Addr::new(2, 156, 201, 254);
    let peer_port = 49123;

    // client expected receive from tracker server.
    let expected_resp = Response {
        tracker_id: None,
        failure_reason: None,
        warning_message: None,
        interval: Some(Duration::from_secs(15)),
        min_interval: Some(Duration::from_secs(10)),
        seeder_count: Some(5),
        leecher_count: Some(3),
        peers: vec![SocketAddr::new(peer_ip.into(), peer_port)],
        peers6: Vec::new(),
    };

    let mut encoded_resp = Vec::new();
    // unterminated dict
    encoded_resp.extend_from_slice(
        b"d\
        8:completei5e\
        10:incompletei3e\
        8:intervali15e\
        12:min intervali10e",
    );
    // insert peers field into dict
    encoded_resp.extend_from_slice(b"5:peers");
    encoded_resp
        .extend_from_slice(&encode_compact_peers_list(&[(peer_ip, peer_port)]));
    // terminate dict
    encoded_resp.push(b'e');

    // the mock receives the specified announce and returns the expected
    // response, both in bencode
    let _m = server
        .mock("GET", "/")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("compact".into(), "1".into()),
            Matcher::UrlEncoded("info_hash".into(), INFO_HASH.into()),
            Matcher::UrlEncoded("peer_id".into(), PEER_ID.into()),
            Matcher::UrlEncoded("port".into(), announce.port.to_string()),
            Matcher::UrlEncoded(
                "downloaded".into(),
                announce.downloaded.to_string(),
            ),
            Matcher::UrlEncoded(
                "uploaded".into(),
                announce.uploaded.to_string(),
            ),
            Matcher::UrlEncoded("left".into(), announce.left.to_string()),
            Matcher::UrlEncoded("numwant".into(), "2".into()),
        ]))
        .with_status(200)
        .with_body(encoded_resp)
        .create_async()
        .await;

    let resp = tracker.announce(announce).await.unwrap();
    assert_eq!(resp, expected_resp);
}

#[tokio::test]
async fn should_announce_start_when_getting_peers_data() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    let peer_ip = Ipv4Addr::new(10, 0, 0, 7);
    let mut encoded_resp = Vec::new();
    encoded_resp.extend_from_slice(
        b"d8:completei1e10:incompletei2e8:intervali1800e5:peers",
    );
    encoded_resp.extend_from_slice(&encode_compact_peers_list(&[
        (peer_ip, 6881),
        (peer_ip, 6882),
    ]));
    encoded_resp.push(b'e');

    let _m = server
        .mock("GET", "/")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("event".into(), "started".into()),
            Matcher::UrlEncoded("port".into(), "6881".into()),
            Matcher::UrlEncoded("left".into(), "4096".into()),
            Matcher::UrlEncoded("downloaded".into(), "0".into()),
        ]))
        .with_status(200)
        .with_body(encoded_resp)
        .create_async()
        .await;

    let data = tracker
        .get_peers_data(to_array(INFO_HASH), to_array(PEER_ID), 6881, 4096)
        .await
        .unwrap();
    assert_eq!(
        data,
        PeersData {
            interval: Some(Duration::from_secs(1800)),
            seeders: Some(1),
            leechers: Some(2),
            peers: vec![
                SocketAddr::new(peer_ip.into(), 6881),
                SocketAddr::new(peer_ip.into(), 6882),
            ],
        }
    );
}

#[tokio::test]
async fn should_merge_ipv6_peers() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    let v4 = Ipv4Addr::new(10, 0, 0, 1);
    let v6 = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x42);
    let mut encoded_resp = Vec::new();
    encoded_resp.extend_from_slice(b"d8:intervali60e5:peers");
    encoded_resp.extend_from_slice(&encode_compact_peers_list(&[(v4, 6881)]));
    encoded_resp.extend_from_slice(b"6:peers618:");
    encoded_resp.extend_from_slice(&v6.octets());
    encoded_resp.extend_from_slice(&51413u16.to_be_bytes());
    encoded_resp.push(b'e');

    let _m = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(encoded_resp)
        .create_async()
        .await;

    let data = tracker
        .get_peers_data(to_array(INFO_HASH), to_array(PEER_ID), 6881, 0)
        .await
        .unwrap();
    assert_eq!(
        data.peers,
        vec![
            SocketAddr::new(v4.into(), 6881),
            SocketAddr::new(v6.into(), 51413),
        ]
    );
}

#[test]
fn should_skip_peers_with_host_names() {
    let encoded = b"d5:peersld2:ip11:example.com4:porti80eed2:ip8:10.1.2.34:porti81eeee";
    let decoded: PeersResponse = serde_bencode::from_bytes(encoded).unwrap();
    assert_eq!(
        decoded.peers,
        vec![SocketAddr::new(Ipv4Addr::new(10, 1, 2, 3).into(), 81)]
    );
}

#[tokio::test]
async fn should_surface_tracker_failure() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    let _m = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(b"d14:failure reason17:torrent not founde")
        .create_async()
        .await;

    let result = tracker
        .get_peers_data(to_array(INFO_HASH), to_array(PEER_ID), 6881, 0)
        .await;
    match result {
        Err(TrackerError::Failure(reason)) => {
            assert_eq!(reason, "torrent not found")
        }
        other => panic!("expected tracker failure, got {:?}", other),
    }
}

fn encode_compact_peers_list(peers: &[(Ipv4Addr, u16)]) -> Vec<u8> {
    let encoded_peers: Vec<_> = peers
        .iter()
        .flat_map(|(ip, port)| {
            ip.octets()
                .iter()
                .chain([(port >> 8) as u8, (port & 0xff) as u8].iter())
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect();

    let mut encoded = Vec::new();
    encoded.extend_from_slice(encoded_peers.len().to_string().as_bytes());
    encoded.push(b':');
    encoded.extend_from_slice(&encoded_peers);

    encoded
}
