use std::fmt;

/// At any given time, a connection with a peer is in one of the below states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// The peer connection has not yet been attempted.
    #[default]
    Disconnected,
    /// The outbound TCP connection is being established.
    Connecting,
    /// The TCP connection is up, the handshakes are being exchanged and
    /// validated.
    HandshakePending,
    /// Both handshakes were exchanged and validated, messages may flow.
    Established,
    /// The connection was lost or closed. This is terminal, a session is never
    /// reconnected.
    Closed,
}

/// The choke and interest flags of both sides of an established connection.
///
/// The download side is governed by `am_interested` and `peer_choking`, the
/// upload side by `am_choking` and `peer_interested`. The two pairs change
/// independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChokeState {
    /// We are choking the peer, so its requests are not served.
    pub am_choking: bool,
    /// We told the peer that we want its pieces.
    pub am_interested: bool,
    /// The peer is choking us, so we may not request blocks.
    pub peer_choking: bool,
    /// The peer told us that it wants our pieces.
    pub peer_interested: bool,
}

impl Default for ChokeState {
    /// Both sides start out choking and not interested.
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

impl ChokeState {
    /// Returns true in the only download state in which blocks may be
    /// requested: we are interested and the peer is not choking us.
    pub fn can_download(&self) -> bool {
        self.am_interested && !self.peer_choking
    }

    /// Returns true in the only upload state in which requests are served:
    /// the peer is interested and we are not choking it.
    pub fn can_upload(&self) -> bool {
        self.peer_interested && !self.am_choking
    }
}

impl fmt::Display for ChokeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[am choking: {}, am interested: {}, peer choking: {}, peer interested: {}]",
            self.am_choking,
            self.am_interested,
            self.peer_choking,
            self.peer_interested
        )
    }
}

/// Which side of the exchange the session plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// We connected to the peer to download from it.
    Leecher,
    /// The peer connected to us and we upload to it.
    Seeder,
}
