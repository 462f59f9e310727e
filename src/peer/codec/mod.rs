//! Peer wire protocol framing: the fixed length handshake and the length
//! prefixed messages that follow it.

pub mod handshake;
pub mod message;

pub use handshake::*;
pub use message::*;
