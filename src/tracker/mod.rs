//! The HTTP tracker client, the source of the peers of a swarm.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

pub mod announce;
pub mod response;
#[cfg(test)]
mod test;
#[allow(clippy::module_inception)]
pub mod tracker;

pub mod prelude {
    pub use super::announce::*;
    pub use super::response::*;
    pub use super::tracker::*;
    pub use crate::error::tracker::Result;
}

/// The bytes left as they are when percent encoding the raw info hash and
/// peer id, the unreserved characters of RFC 3986.
const URL_ENCODE_RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'~')
    .remove(b'.');
