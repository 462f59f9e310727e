//! A peer session and the protocol it speaks.

#[macro_use]
mod peer_log;

pub mod codec;
pub mod session;
pub mod state;

pub use session::{validate_piece, PeerSession};
pub use state::{ChokeState, ConnectionState, Role};
