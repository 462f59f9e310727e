use bitvec::prelude::{BitVec, Msb0};

/// A SHA-1 hash digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// The peer ID is an arbitrary 20 byte string.
///
/// [`Guidelines for choosing a peer ID`](http://bittorrent.org/beps/bep_0020.html).
pub type PeerId = [u8; 20];

/// The type of a piece's index.
///
/// On the wire all integers are sent as 4-byte big endian integers, but in the
/// source code we use `usize` to be consistent with other index types in Rust.
pub type PieceIndex = usize;

/// The bitfield represents the piece availability of a peer.
///
/// It is a compact bool vector of most significant bits to least significant
/// bits, that is, where the highest bit of the first byte represents the
/// first piece (e.g. `0b1100_0001` would mean that we have pieces 0, 1 and 7).
pub type Bitfield = BitVec<u8, Msb0>;

/// The block length requested from peers (except possibly the last block of a
/// piece). It is the widely used and accepted 16 KiB.
pub const BLOCK_LEN: u32 = 0x4000;

/// Returns the SHA-1 digest of `data`.
pub fn sha1_hash(data: &[u8]) -> Sha1Hash {
    use sha1::Digest;

    let digest = sha1::Sha1::digest(data);
    let mut hash = [0; 20];
    hash.copy_from_slice(&digest);
    hash
}
