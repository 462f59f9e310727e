//! Logging macros that prefix the message with the peer's address.
//!
//! They expect to be invoked with a value that has an `addr` field, usually
//! `self` of a [`super::session::PeerSession`].

macro_rules! peer_trace {
    ($self:ident, $($arg:tt)*) => {
        log::trace!("[Peer {}] {}", $self.addr, format_args!($($arg)*))
    };
}

macro_rules! peer_debug {
    ($self:ident, $($arg:tt)*) => {
        log::debug!("[Peer {}] {}", $self.addr, format_args!($($arg)*))
    };
}

macro_rules! peer_info {
    ($self:ident, $($arg:tt)*) => {
        log::info!("[Peer {}] {}", $self.addr, format_args!($($arg)*))
    };
}

macro_rules! peer_warn {
    ($self:ident, $($arg:tt)*) => {
        log::warn!("[Peer {}] {}", $self.addr, format_args!($($arg)*))
    };
}
