use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    time::{self, Instant},
};
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    blockinfo::{blocks_of, BlockInfo},
    counter::ThruputCounters,
    disk::SharedFile,
    error::peer::{PeerError, Result},
    metainfo::Metainfo,
    sha1_hash,
    storage_info::StorageInfo,
    swarm::SwarmContext,
    Bitfield, PeerId, PieceIndex,
};

use super::{codec::*, state::*};

/// A connection with a single peer of the swarm.
///
/// The session does not run a loop of its own: the swarm drives it through
/// the handshake, the initial message burst and then one piece download at a
/// time. Only an inbound (seeding) session is driven by its own loop in
/// [`PeerSession::serve`].
pub struct PeerSession {
    /// Shared, read-only information about the torrent.
    ctx: Arc<SwarmContext>,
    /// The remote address of the peer.
    addr: SocketAddr,
    /// Whether we connected to the peer to download or it connected to us.
    role: Role,
    /// The connection state, see [`ConnectionState`].
    connection: ConnectionState,
    /// The choke and interest flags. This is `None` until the handshake
    /// completes and again after the connection is closed, in which case no
    /// further action is taken.
    choke: Option<ChokeState>,
    /// The peer's id, known after its handshake.
    peer_id: Option<PeerId>,
    /// The pieces the peer has, as announced by its bitfield and have
    /// messages.
    pieces: Bitfield,
    /// The file the pieces are read from and written to.
    file: Option<Arc<SharedFile>>,
    /// An inbound socket whose handshake has not been read yet.
    pending: Option<TcpStream>,
    /// The message stream, present while the connection is established.
    socket: Option<Framed<TcpStream, PeerCodec>>,
    /// When the last message arrived. If nothing arrives for the keep-alive
    /// period, the session is closed.
    last_message: Instant,
    /// Transfer statistics.
    counters: ThruputCounters,
}

impl PeerSession {
    /// Creates a new outbound session with the peer at the given address.
    /// No connection is attempted until [`PeerSession::connect`] is called.
    pub fn outbound(ctx: Arc<SwarmContext>, addr: SocketAddr) -> Self {
        let piece_count = ctx.storage.piece_count;
        Self {
            ctx,
            addr,
            role: Role::Leecher,
            connection: ConnectionState::Disconnected,
            choke: None,
            peer_id: None,
            pieces: Bitfield::repeat(false, piece_count),
            file: None,
            pending: None,
            socket: None,
            last_message: Instant::now(),
            counters: ThruputCounters::default(),
        }
    }

    /// Creates a seeding session from a connection accepted from the peer,
    /// serving blocks from the given file.
    pub fn inbound(
        ctx: Arc<SwarmContext>,
        socket: TcpStream,
        addr: SocketAddr,
        file: Arc<SharedFile>,
    ) -> Self {
        let piece_count = ctx.storage.piece_count;
        Self {
            ctx,
            addr,
            role: Role::Seeder,
            connection: ConnectionState::HandshakePending,
            choke: None,
            peer_id: None,
            pieces: Bitfield::repeat(false, piece_count),
            file: Some(file),
            pending: Some(socket),
            socket: None,
            last_message: Instant::now(),
            counters: ThruputCounters::default(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn choke_state(&self) -> Option<ChokeState> {
        self.choke
    }

    pub fn is_established(&self) -> bool {
        self.connection == ConnectionState::Established
    }

    /// The pieces the peer announced.
    pub fn pieces(&self) -> &Bitfield {
        &self.pieces
    }

    pub fn has_piece(&self, index: PieceIndex) -> bool {
        self.pieces.get(index).map_or(false, |bit| *bit)
    }

    pub fn counters(&self) -> &ThruputCounters {
        &self.counters
    }

    /// The rolling average download rate over the completed pieces, in bytes
    /// per second, or `None` if no piece was downloaded from this peer yet.
    pub fn download_rate(&self) -> Option<f64> {
        self.counters.payload_down.avg()
    }

    /// Sets the file that downloaded pieces are written to and that requests
    /// are served from.
    pub fn add_file_handler(&mut self, file: Arc<SharedFile>) {
        self.file = Some(file);
    }

    /// Connects to the peer and exchanges handshakes with it.
    ///
    /// On failure the session is closed for good.
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection != ConnectionState::Disconnected {
            return Err(PeerError::Disconnected);
        }
        let result = self.connect_and_handshake().await;
        if let Err(e) = &result {
            peer_warn!(self, "Handshake failed: {}", e);
            self.close();
        }
        result
    }

    async fn connect_and_handshake(&mut self) -> Result<()> {
        peer_info!(self, "Connecting to peer");
        self.connection = ConnectionState::Connecting;
        let socket = time::timeout(
            self.ctx.conf.connect_timeout,
            TcpStream::connect(self.addr),
        )
        .await
        .map_err(|_| PeerError::Timeout)??;
        peer_info!(self, "Connected to peer");

        // this is an outbound connection, so we have to send the first
        // handshake
        self.connection = ConnectionState::HandshakePending;
        let mut socket = Framed::new(socket, HandshakeCodec);
        let handshake = Handshake::new(self.ctx.info_hash, self.ctx.client_id);
        self.send_handshake(&mut socket, handshake).await?;
        let peer_handshake = self.recv_handshake(&mut socket).await?;
        handshake.validate(&peer_handshake)?;

        self.establish(socket, peer_handshake);
        Ok(())
    }

    /// Reads the handshake of the peer that connected to us, answers it and
    /// announces the pieces we have.
    ///
    /// On failure the session is closed for good.
    pub async fn accept(&mut self, own_pieces: &Bitfield) -> Result<()> {
        let result = self.accept_handshake(own_pieces).await;
        if let Err(e) = &result {
            peer_warn!(self, "Handshake failed: {}", e);
            self.close();
        }
        result
    }

    async fn accept_handshake(&mut self, own_pieces: &Bitfield) -> Result<()> {
        let socket = self.pending.take().ok_or(PeerError::Disconnected)?;
        let mut socket = Framed::new(socket, HandshakeCodec);

        // the peer initiated the connection, so its handshake comes first
        let handshake = Handshake::new(self.ctx.info_hash, self.ctx.client_id);
        let peer_handshake = self.recv_handshake(&mut socket).await?;
        handshake.validate(&peer_handshake)?;
        self.send_handshake(&mut socket, handshake).await?;
        self.establish(socket, peer_handshake);

        peer_info!(self, "Sending bitfield");
        self.send(Message::Bitfield(own_pieces.clone())).await
    }

    async fn send_handshake(
        &mut self,
        socket: &mut Framed<TcpStream, HandshakeCodec>,
        handshake: Handshake,
    ) -> Result<()> {
        peer_info!(self, "Sending handshake");
        self.counters.protocol_up += handshake.len();
        time::timeout(self.ctx.conf.io_timeout, socket.send(handshake))
            .await
            .map_err(|_| PeerError::Timeout)?
    }

    async fn recv_handshake(
        &mut self,
        socket: &mut Framed<TcpStream, HandshakeCodec>,
    ) -> Result<Handshake> {
        peer_info!(self, "Waiting for peer handshake");
        let peer_handshake =
            time::timeout(self.ctx.conf.io_timeout, socket.next())
                .await
                .map_err(|_| PeerError::Timeout)?
                .ok_or(PeerError::Disconnected)??;
        peer_trace!(self, "Peer handshake: {:?}", peer_handshake);
        self.counters.protocol_down += peer_handshake.len();
        Ok(peer_handshake)
    }

    fn establish(
        &mut self,
        socket: Framed<TcpStream, HandshakeCodec>,
        peer_handshake: Handshake,
    ) {
        self.socket = Some(switch_codec(socket));
        self.peer_id = Some(peer_handshake.peer_id);
        self.choke = Some(ChokeState::default());
        self.connection = ConnectionState::Established;
        self.last_message = Instant::now();
        peer_info!(self, "Session established");
    }

    /// Closes the connection. The session cannot be used anymore after this.
    pub fn close(&mut self) {
        if self.connection != ConnectionState::Closed {
            peer_info!(self, "Closing session");
        }
        self.connection = ConnectionState::Closed;
        self.choke = None;
        self.socket = None;
        self.pending = None;
    }

    /// Reads the messages the peer sends on its own after the handshake
    /// (usually its bitfield and some haves), until none arrives for the
    /// burst timeout. Returns the number of messages read.
    ///
    /// A peer that keeps sending cannot hold the burst open for longer than
    /// the burst limit.
    pub async fn receive_burst(&mut self) -> Result<usize> {
        let burst_end = Instant::now() + self.ctx.conf.burst_limit;
        let mut count = 0;
        loop {
            let now = Instant::now();
            if now >= burst_end {
                peer_debug!(self, "Cutting off initial burst");
                break;
            }
            let window = self.ctx.conf.burst_timeout.min(burst_end - now);
            let msg = match self.recv(Some(window)).await? {
                Some(msg) => msg,
                None => break,
            };
            count += 1;
            if let Some((block, _)) = self.handle_msg(msg).await? {
                peer_warn!(self, "Dropping unsolicited block {}", block);
            }
            if !self.is_established() {
                return Err(PeerError::Disconnected);
            }
        }
        peer_debug!(self, "Initial burst of {} message(s)", count);
        Ok(count)
    }

    /// Downloads, validates and stores the piece, returning its length.
    ///
    /// Blocks are requested one at a time, each answer must be exactly the
    /// requested block. The piece is written to the file only after its
    /// length and hash were verified. If the error is fatal the session is
    /// closed.
    pub async fn download_piece(&mut self, index: PieceIndex) -> Result<usize> {
        if !self.is_established() {
            return Err(PeerError::Disconnected);
        }
        if !self.has_piece(index) {
            return Err(PeerError::PieceUnavailable(index));
        }
        let file = self.file.clone().ok_or(PeerError::NoFileHandler)?;

        peer_info!(self, "Downloading piece {}", index);
        let started = Instant::now();
        self.last_message = started;
        let data = match self.fetch_piece(index).await {
            Ok(data) => data,
            Err(e) => {
                if e.is_fatal() {
                    self.close();
                }
                return Err(e);
            }
        };

        if let Err(e) = validate_piece(&self.ctx.metainfo, index, &data) {
            peer_warn!(self, "Piece {} is invalid: {}", index, e);
            return Err(e);
        }

        let piece_len = data.len() as u32;
        for block in blocks_of(index, piece_len, self.ctx.conf.max_block_len) {
            let start = block.offset as usize;
            let end = start + block.len as usize;
            file.write_block(index, block.offset, &data[start..end])
                .await?;
        }

        // only pieces that made it to disk count towards the rate
        self.counters.payload_down += data.len() as u64;
        self.counters
            .payload_down
            .tick(started.elapsed().as_secs_f64());
        peer_info!(
            self,
            "Downloaded piece {} in {} ms",
            index,
            started.elapsed().as_millis()
        );
        Ok(data.len())
    }

    async fn fetch_piece(&mut self, index: PieceIndex) -> Result<Vec<u8>> {
        let piece_len = self
            .ctx
            .storage
            .piece_len(index)
            .ok_or(PeerError::PieceUnavailable(index))?;
        self.wait_for_unchoke().await?;

        let mut data = Vec::with_capacity(piece_len as usize);
        for block in blocks_of(index, piece_len, self.ctx.conf.max_block_len) {
            peer_trace!(self, "Requesting block {}", block);
            self.send(Message::Request(block)).await?;

            let (received, payload) = loop {
                let msg = self
                    .recv(None)
                    .await?
                    .ok_or(PeerError::KeepAliveTimeout)?;
                if let Some((received, payload)) = self.handle_msg(msg).await? {
                    if received.piece_index == index {
                        break (received, payload);
                    }
                    // left over from an aborted download of another piece
                    peer_warn!(self, "Dropping stale block {}", received);
                    continue;
                }
                if !self.is_established() {
                    return Err(PeerError::Disconnected);
                }
                if !self.can_download() {
                    peer_info!(self, "Choked in the middle of piece {}", index);
                    return Err(PeerError::Choked);
                }
            };

            if received != block {
                peer_warn!(self, "Expected block {}, got {}", block, received);
                return Err(PeerError::BlockMismatch(received));
            }
            data.extend_from_slice(&payload);
        }
        Ok(data)
    }

    /// Tells the peer we are interested, if we haven't yet, and handles
    /// messages until it unchokes us.
    async fn wait_for_unchoke(&mut self) -> Result<()> {
        loop {
            let choke = self.choke.ok_or(PeerError::Disconnected)?;
            if choke.can_download() {
                return Ok(());
            }
            if !choke.am_interested {
                peer_info!(self, "Interested in peer");
                self.send(Message::Interested).await?;
                self.choke_mut()?.am_interested = true;
            }
            let msg = self
                .recv(None)
                .await?
                .ok_or(PeerError::KeepAliveTimeout)?;
            if let Some((block, _)) = self.handle_msg(msg).await? {
                peer_warn!(self, "Dropping unsolicited block {}", block);
            }
        }
    }

    fn can_download(&self) -> bool {
        self.choke.map_or(false, |choke| choke.can_download())
    }

    fn choke_mut(&mut self) -> Result<&mut ChokeState> {
        self.choke.as_mut().ok_or(PeerError::Disconnected)
    }

    /// Runs the seeding side of the session until the peer loses interest or
    /// the connection is lost.
    pub async fn serve(&mut self) -> Result<()> {
        while self.is_established() {
            let msg = match self.recv(None).await? {
                Some(msg) => msg,
                None => continue,
            };
            match self.handle_msg(msg).await {
                Ok(Some((block, _))) => {
                    peer_warn!(self, "Dropping unsolicited block {}", block);
                }
                Ok(None) => {}
                Err(e) if !e.is_fatal() => {
                    peer_warn!(self, "{}", e);
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Announces that we completed the piece.
    pub async fn send_have(&mut self, piece_index: PieceIndex) -> Result<()> {
        self.send(Message::Have { piece_index }).await
    }

    /// Handles a single message from the peer.
    ///
    /// A block message is not handled here but returned to the caller, as
    /// only a running piece download knows whether it was requested.
    async fn handle_msg(
        &mut self,
        msg: Message,
    ) -> Result<Option<(BlockInfo, Vec<u8>)>> {
        match msg {
            Message::KeepAlive => {
                peer_trace!(self, "Peer sent keep alive");
            }
            Message::Bitfield(mut bitfield) => {
                // the wire bitfield is padded to a whole number of bytes
                bitfield.resize(self.ctx.storage.piece_count, false);
                peer_info!(
                    self,
                    "Peer has {}/{} pieces",
                    bitfield.count_ones(),
                    bitfield.len()
                );
                self.pieces = bitfield;
            }
            Message::Have { piece_index } => {
                if piece_index < self.pieces.len() {
                    peer_debug!(self, "Peer has piece {}", piece_index);
                    self.pieces.set(piece_index, true);
                } else {
                    peer_warn!(self, "Peer has invalid piece {}", piece_index);
                }
            }
            Message::Choke => {
                peer_info!(self, "Peer choked us");
                let choke = self.choke_mut()?;
                choke.peer_choking = true;
                choke.am_interested = false;
            }
            Message::Unchoke => {
                peer_info!(self, "Peer unchoked us");
                self.choke_mut()?.peer_choking = false;
            }
            Message::Interested => {
                peer_info!(self, "Peer became interested");
                let role = self.role;
                let choke = self.choke_mut()?;
                choke.peer_interested = true;
                let unchoke = role == Role::Seeder && choke.am_choking;
                if unchoke {
                    choke.am_choking = false;
                }
                if unchoke {
                    peer_info!(self, "Unchoking peer");
                    self.send(Message::Unchoke).await?;
                }
            }
            Message::NotInterested => {
                peer_info!(self, "Peer no longer interested");
                self.choke_mut()?.peer_interested = false;
                self.close();
            }
            Message::Request(block) => {
                self.serve_request(block).await?;
            }
            Message::Block {
                piece_index,
                offset,
                data,
            } => {
                let block = BlockInfo {
                    piece_index,
                    offset,
                    len: data.len() as u32,
                };
                return Ok(Some((block, data)));
            }
            Message::Cancel(block) => {
                // requests are answered as soon as they arrive, there is
                // nothing queued to cancel
                peer_debug!(self, "Peer cancelled block {}", block);
            }
            Message::Port(port) => {
                peer_debug!(self, "Peer DHT port {}", port);
            }
        }
        Ok(None)
    }

    async fn serve_request(&mut self, block: BlockInfo) -> Result<()> {
        if !self.choke.map_or(false, |choke| choke.can_upload()) {
            peer_warn!(self, "Dropping request {} while choking", block);
            return Ok(());
        }
        if !self.ctx.storage.is_valid_block(
            block.piece_index,
            block.offset,
            block.len,
            self.ctx.conf.max_block_len,
        ) {
            peer_warn!(self, "Dropping invalid request {}", block);
            return Ok(());
        }
        let file = match &self.file {
            Some(file) => Arc::clone(file),
            None => {
                peer_warn!(self, "Dropping request {}, no file", block);
                return Ok(());
            }
        };

        let data = file
            .read_block(block.piece_index, block.offset, block.len)
            .await?;
        peer_debug!(self, "Sending block {}", block);
        self.counters.payload_up += data.len() as u64;
        self.send(Message::Block {
            piece_index: block.piece_index,
            offset: block.offset,
            data,
        })
        .await
    }

    async fn send(&mut self, msg: Message) -> Result<()> {
        self.counters.protocol_up += msg.protocol_len();
        let io_timeout = self.ctx.conf.io_timeout;
        let socket = self.socket.as_mut().ok_or(PeerError::Disconnected)?;
        match time::timeout(io_timeout, socket.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                peer_warn!(self, "Send failed: {}", e);
                self.close();
                Err(e.into())
            }
            Err(_) => {
                peer_warn!(self, "Send timed out");
                self.close();
                Err(PeerError::Timeout)
            }
        }
    }

    /// Receives the next message.
    ///
    /// With a window, `Ok(None)` is returned if nothing arrives within it.
    /// Independently of that, if nothing arrived for the keep-alive period
    /// the session is closed.
    async fn recv(&mut self, window: Option<Duration>) -> Result<Option<Message>> {
        let keep_alive_timeout = self.ctx.conf.keep_alive_timeout;
        let keep_alive_deadline = self.last_message + keep_alive_timeout;
        let deadline = match window {
            Some(window) => keep_alive_deadline.min(Instant::now() + window),
            None => keep_alive_deadline,
        };

        let socket = self.socket.as_mut().ok_or(PeerError::Disconnected)?;
        match time::timeout_at(deadline, socket.next()).await {
            Ok(Some(Ok(msg))) => {
                self.last_message = Instant::now();
                self.counters.protocol_down += msg.protocol_len();
                Ok(Some(msg))
            }
            Ok(Some(Err(e))) => {
                peer_warn!(self, "Receive failed: {}", e);
                self.close();
                Err(e.into())
            }
            Ok(None) => {
                peer_info!(self, "Peer closed the connection");
                self.close();
                Err(PeerError::Disconnected)
            }
            Err(_) if deadline < keep_alive_deadline => Ok(None),
            Err(_) => {
                peer_warn!(self, "Nothing received for {:?}", keep_alive_timeout);
                self.close();
                Err(PeerError::KeepAliveTimeout)
            }
        }
    }
}

/// Switches a socket on which the handshakes were exchanged to the message
/// codec.
///
/// The read buffer of the handshake codec is kept, as it may already contain
/// the first messages the peer sent after its handshake.
pub(crate) fn switch_codec(
    socket: Framed<TcpStream, HandshakeCodec>,
) -> Framed<TcpStream, PeerCodec> {
    let old_parts = socket.into_parts();
    let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
    new_parts.read_buf = old_parts.read_buf;
    new_parts.write_buf = old_parts.write_buf;
    Framed::from_parts(new_parts)
}

/// Checks that the assembled piece has the length the metainfo implies and
/// that its SHA-1 digest equals the piece's hash.
pub fn validate_piece(
    metainfo: &Metainfo,
    index: PieceIndex,
    data: &[u8],
) -> Result<()> {
    let expected = StorageInfo::new(metainfo)
        .piece_len(index)
        .ok_or(PeerError::PieceUnavailable(index))? as usize;
    if data.len() != expected {
        return Err(PeerError::InvalidPieceLength {
            index,
            len: data.len(),
            expected,
        });
    }
    let hash = metainfo
        .piece_hash(index)
        .ok_or(PeerError::PieceUnavailable(index))?;
    if sha1_hash(data).as_slice() != hash {
        return Err(PeerError::InvalidPieceHash(index));
    }
    Ok(())
}
