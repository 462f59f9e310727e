//! The swarm coordinator: it owns the sessions with the peers of a torrent,
//! aggregates their piece availability and schedules the piece downloads, or
//! accepts peers to seed to.

use std::{
    cmp::Ordering,
    collections::HashSet,
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use rand::seq::SliceRandom;
use tokio::{
    net::TcpListener,
    sync::{Mutex, RwLock},
    task::JoinSet,
};

use crate::{
    conf::{Conf, TorrentConf},
    disk::SharedFile,
    error::swarm::{Result, SwarmError},
    metainfo::Metainfo,
    peer::PeerSession,
    piece_picker::PiecePicker,
    storage_info::StorageInfo,
    PeerId, PieceIndex, Sha1Hash,
};

use self::stats::SwarmStats;

pub mod stats;

/// Information about the torrent shared read-only with all peer sessions.
#[derive(Debug)]
pub struct SwarmContext {
    /// The info hash of the torrent, derived from its metainfo. This is used
    /// to identify the torrent with other peers and trackers.
    pub info_hash: Sha1Hash,
    /// Our peer id.
    pub client_id: PeerId,
    pub metainfo: Metainfo,
    /// The piece geometry of the torrent.
    pub storage: StorageInfo,
    pub conf: TorrentConf,
}

impl SwarmContext {
    pub fn new(metainfo: Metainfo, client_id: PeerId, conf: TorrentConf) -> Self {
        Self {
            info_hash: metainfo.info_hash,
            client_id,
            storage: StorageInfo::new(&metainfo),
            metainfo,
            conf,
        }
    }
}

/// The swarm of a single torrent.
///
/// The entry points are meant to be called in sequence:
/// [`Swarm::add_shared_file_handler`], [`Swarm::handshakes`],
/// [`Swarm::initialize_bitfields`] and then either [`Swarm::download_file`]
/// or [`Swarm::seed_file`].
pub struct Swarm {
    ctx: Arc<SwarmContext>,
    /// The address the seeding loop listens on.
    listen_addr: SocketAddr,
    /// A session per known peer. A session is locked for as long as a piece
    /// download runs on it.
    peers: Vec<Arc<Mutex<PeerSession>>>,
    /// The downloaded pieces and the availability of the missing ones.
    picker: Arc<RwLock<PiecePicker>>,
    file: Option<Arc<SharedFile>>,
    stats: Arc<Mutex<SwarmStats>>,
    /// The (peer, piece) pairs whose download failed. A piece is retried with
    /// other peers only.
    failed: HashSet<(usize, PieceIndex)>,
}

impl Swarm {
    pub fn new(
        metainfo: Metainfo,
        peers: impl IntoIterator<Item = SocketAddr>,
        conf: &Conf,
    ) -> Self {
        let ctx = Arc::new(SwarmContext::new(
            metainfo,
            conf.engine.client_id,
            conf.torrent.clone(),
        ));
        let peers = peers
            .into_iter()
            .map(|addr| {
                Arc::new(Mutex::new(PeerSession::outbound(Arc::clone(&ctx), addr)))
            })
            .collect();
        let picker = PiecePicker::new(ctx.storage.piece_count);
        Self {
            ctx,
            listen_addr: conf.engine.listen_addr,
            peers,
            picker: Arc::new(RwLock::new(picker)),
            file: None,
            stats: Arc::new(Mutex::new(SwarmStats::default())),
            failed: HashSet::new(),
        }
    }

    pub fn context(&self) -> &Arc<SwarmContext> {
        &self.ctx
    }

    pub fn piece_picker(&self) -> &Arc<RwLock<PiecePicker>> {
        &self.picker
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub async fn stats(&self) -> SwarmStats {
        self.stats.lock().await.clone()
    }

    /// Attaches the file that pieces are written to and served from, to the
    /// swarm and each of its sessions.
    pub async fn add_shared_file_handler(&mut self, file: Arc<SharedFile>) {
        for session in self.peers.iter() {
            session.lock().await.add_file_handler(Arc::clone(&file));
        }
        self.file = Some(file);
    }

    /// Connects to all peers concurrently and exchanges handshakes with them.
    /// Returns the number of sessions established.
    pub async fn handshakes(&self) -> usize {
        let mut tasks = JoinSet::new();
        for session in self.peers.iter() {
            let session = Arc::clone(session);
            tasks.spawn(async move { session.lock().await.connect().await.is_ok() });
        }

        let mut established = 0;
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(true) => established += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Handshake task failed: {}", e),
            }
        }
        log::info!(
            "Established {}/{} peer session(s)",
            established,
            self.peers.len()
        );
        established
    }

    /// Reads the initial burst of messages of every established session
    /// concurrently and counts the pieces each peer announced towards their
    /// availability. Returns the number of sessions whose availability was
    /// registered.
    pub async fn initialize_bitfields(&self) -> usize {
        let mut tasks = JoinSet::new();
        for session in self.peers.iter() {
            let session = Arc::clone(session);
            let picker = Arc::clone(&self.picker);
            tasks.spawn(async move {
                let mut session = session.lock().await;
                if !session.is_established() {
                    return false;
                }
                match session.receive_burst().await {
                    Ok(_) => {
                        picker
                            .write()
                            .await
                            .register_availability(session.pieces());
                        true
                    }
                    Err(e) => {
                        log::warn!(
                            "Peer {} failed in initial burst: {}",
                            session.addr(),
                            e
                        );
                        false
                    }
                }
            });
        }

        let mut registered = 0;
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Bitfield task failed: {}", e),
            }
        }
        log::info!("Registered availability of {} peer(s)", registered);
        registered
    }

    /// Downloads every missing piece.
    ///
    /// Each round picks the rarest missing pieces, assigns each to a
    /// different peer that has it, and downloads them concurrently, up to
    /// `max_peers` at a time. The round is joined before the next one is
    /// picked. A piece that failed is picked again in a later round, for a
    /// different peer.
    pub async fn download_file(&mut self) -> Result<()> {
        let file = self.file.clone().ok_or(SwarmError::NoFileHandler)?;
        if !self.has_established_peer().await {
            return Err(SwarmError::NoPeers);
        }
        file.initialize_for_download().await?;

        let started = Instant::now();
        let max_peers = self.ctx.conf.max_peers.max(1);
        loop {
            let (candidates, downloaded, remaining) = {
                let picker = self.picker.read().await;
                if picker.is_complete() {
                    break;
                }
                (
                    picker.pick_rarest(usize::MAX),
                    picker.downloaded_count(),
                    picker.missing_count(),
                )
            };

            let mut busy = HashSet::new();
            let mut tasks = JoinSet::new();
            for piece in candidates {
                if tasks.len() >= max_peers {
                    break;
                }
                let peer = match self.select_peer(piece, &busy, downloaded).await {
                    Some(peer) => peer,
                    None => continue,
                };
                busy.insert(peer);

                let session = Arc::clone(&self.peers[peer]);
                let picker = Arc::clone(&self.picker);
                let stats = Arc::clone(&self.stats);
                tasks.spawn(async move {
                    let piece_started = Instant::now();
                    let result = session.lock().await.download_piece(piece).await;
                    if let Ok(len) = &result {
                        if picker.write().await.received_piece(piece) {
                            stats
                                .lock()
                                .await
                                .record_download(*len, piece_started.elapsed());
                        }
                    }
                    (peer, piece, result)
                });
            }

            if tasks.is_empty() {
                log::warn!("Download stalled with {} piece(s) left", remaining);
                return Err(SwarmError::Stalled { remaining });
            }

            while let Some(res) = tasks.join_next().await {
                let (peer, piece, result) = res?;
                if let Err(e) = result {
                    log::warn!("Piece {} from peer #{} failed: {}", piece, peer, e);
                    self.failed.insert((peer, piece));
                }
            }
            log::info!("{}", self.stats.lock().await);
        }

        log::info!(
            "Downloaded {} piece(s) in {} s",
            self.ctx.storage.piece_count,
            started.elapsed().as_secs()
        );
        Ok(())
    }

    async fn has_established_peer(&self) -> bool {
        for session in self.peers.iter() {
            if session.lock().await.is_established() {
                return true;
            }
        }
        false
    }

    /// Selects the peer to download the piece from, among the established
    /// sessions that have it and aren't busy in this round.
    async fn select_peer(
        &self,
        piece: PieceIndex,
        busy: &HashSet<usize>,
        downloaded: usize,
    ) -> Option<usize> {
        let mut candidates = Vec::new();
        for (index, session) in self.peers.iter().enumerate() {
            if busy.contains(&index) || self.failed.contains(&(index, piece)) {
                continue;
            }
            let session = session.lock().await;
            if session.is_established() && session.has_piece(piece) {
                candidates.push((index, session.download_rate()));
            }
        }
        let warming_up = downloaded < self.ctx.conf.warmup_pieces;
        choose_peer(candidates, warming_up)
    }

    /// Accepts peers on the configured listen address and seeds to them.
    /// This only returns if the address cannot be bound.
    pub async fn seed_file(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(SwarmError::NoFileHandler);
        }
        let listener = TcpListener::bind(self.listen_addr).await?;
        self.serve(listener).await
    }

    /// Accepts peers on the listener forever, seeding to each in its own
    /// task. The file must be complete: every piece is announced.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let file = self.file.clone().ok_or(SwarmError::NoFileHandler)?;
        // only complete files are seeded
        let own_pieces = {
            let mut picker = self.picker.write().await;
            *picker = PiecePicker::seeded(self.ctx.storage.piece_count);
            Arc::new(picker.own_pieces().clone())
        };
        log::info!("Seeding on {}", listener.local_addr()?);
        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("Failed to accept peer: {}", e);
                    continue;
                }
            };
            log::info!("Accepted peer {}", addr);

            let ctx = Arc::clone(&self.ctx);
            let file = Arc::clone(&file);
            let stats = Arc::clone(&self.stats);
            let own_pieces = Arc::clone(&own_pieces);
            tokio::spawn(async move {
                let mut session = PeerSession::inbound(ctx, socket, addr, file);
                if session.accept(&own_pieces).await.is_err() {
                    return;
                }
                if let Err(e) = session.serve().await {
                    log::warn!("Peer {} seeding session failed: {}", addr, e);
                }
                let uploaded = session.counters().payload_up.total();
                stats.lock().await.record_upload(uploaded);
                log::info!("Peer {} left after {} bytes uploaded", addr, uploaded);
            });
        }
    }

    /// Returns true once all pieces are downloaded.
    pub async fn download_complete(&self) -> bool {
        self.picker.read().await.is_complete()
    }
}

/// Chooses among the candidate peers, given as (peer, download rate) pairs.
///
/// While warming up the peer is chosen at random, as the early rates say
/// little. Afterwards the fastest peer is chosen, peers without a measured
/// rate last.
fn choose_peer(
    mut candidates: Vec<(usize, Option<f64>)>,
    warming_up: bool,
) -> Option<usize> {
    if warming_up {
        return candidates
            .choose(&mut rand::thread_rng())
            .map(|&(peer, _)| peer);
    }
    candidates.sort_by(|(_, a), (_, b)| compare_rates(*b, *a));
    candidates.first().map(|&(peer, _)| peer)
}

fn compare_rates(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}
