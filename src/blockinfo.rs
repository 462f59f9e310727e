use std::fmt;

use crate::PieceIndex;

/// A block is a fixed size chunk of a piece, which in turn is a fixed size
/// chunk of a content. Downloading torrents happen at this block level
/// granularity.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct BlockInfo {
    /// The index of the piece of which this is a block.
    pub piece_index: PieceIndex,
    /// The zero-based byte offset into the piece.
    pub offset: u32,
    /// The block's length in bytes.
    pub len: u32,
}

impl BlockInfo {
    /// Returns the index of the block within its piece, given the block
    /// length the piece was chunked with.
    pub fn index_in_piece(&self, max_block_len: u32) -> usize {
        // we need to use "lower than or equal" as this may be the last block
        // in which case it may be shorter than the block length.
        debug_assert!(self.len <= max_block_len);
        debug_assert!(self.len > 0);
        (self.offset / max_block_len) as usize
    }

    /// Returns the offset one past the last byte of the block.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.len as u64
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "(piece: {} offset: {} len: {})",
            self.piece_index, self.offset, self.len
        )
    }
}

/// Returns the length of the block at the index in piece.
///
/// If the piece is not a multiple of the block length, the last block is
/// shorter.
///
/// # Panics
///
/// Panics if the index multiplied by the block length would exceed the
/// piece length.
pub fn block_len(
    piece_len: u32,
    max_block_len: u32,
    block_index: usize,
) -> u32 {
    let block_offset = block_index as u32 * max_block_len;
    assert!(piece_len > block_offset);
    std::cmp::min(piece_len - block_offset, max_block_len)
}

/// Returns the number of blocks in a piece of the given length.
pub fn block_count(piece_len: u32, max_block_len: u32) -> usize {
    // all but the last block are a multiple of the block length, but the last
    // one may be shorter so we round up before dividing.
    (piece_len as usize + (max_block_len as usize - 1))
        / max_block_len as usize
}

/// Returns the blocks that make up a piece, in increasing offset order.
///
/// This is the exact sequence of requests a single-peer piece download
/// issues: each block is `min(max_block_len, remaining)` bytes long.
pub fn blocks_of(
    piece_index: PieceIndex,
    piece_len: u32,
    max_block_len: u32,
) -> impl Iterator<Item = BlockInfo> {
    (0..block_count(piece_len, max_block_len)).map(move |i| {
        BlockInfo {
            piece_index,
            offset: i as u32 * max_block_len,
            len: block_len(piece_len, max_block_len, i),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_LEN;

    // An arbitrary piece length that is an exact multiple of the canonical
    // block length (16 KiB).
    const BLOCK_LEN_MULTIPLE_PIECE_LEN: u32 = 2 * BLOCK_LEN;

    // An arbitrary piece length that is _not_ a multiple of the canonical block
    // length and the amount with which it overlaps the nearest exact multiple
    // value.
    const OVERLAP: u32 = 234;
    const UNEVEN_PIECE_LEN: u32 = 2 * BLOCK_LEN + OVERLAP;

    #[test]
    fn test_block_len() {
        assert_eq!(
            block_len(BLOCK_LEN_MULTIPLE_PIECE_LEN, BLOCK_LEN, 0),
            BLOCK_LEN
        );
        assert_eq!(
            block_len(BLOCK_LEN_MULTIPLE_PIECE_LEN, BLOCK_LEN, 1),
            BLOCK_LEN
        );

        assert_eq!(block_len(UNEVEN_PIECE_LEN, BLOCK_LEN, 0), BLOCK_LEN);
        assert_eq!(block_len(UNEVEN_PIECE_LEN, BLOCK_LEN, 1), BLOCK_LEN);
        assert_eq!(block_len(UNEVEN_PIECE_LEN, BLOCK_LEN, 2), OVERLAP);
    }

    #[test]
    #[should_panic]
    fn test_block_len_invalid_index_panic() {
        block_len(BLOCK_LEN_MULTIPLE_PIECE_LEN, BLOCK_LEN, 2);
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(BLOCK_LEN_MULTIPLE_PIECE_LEN, BLOCK_LEN), 2);
        assert_eq!(block_count(UNEVEN_PIECE_LEN, BLOCK_LEN), 3);
        assert_eq!(block_count(1, BLOCK_LEN), 1);
    }

    #[test]
    fn piece_of_two_blocks_is_requested_at_two_offsets() {
        let blocks: Vec<_> = blocks_of(4, 32768, 16384).collect();
        assert_eq!(
            blocks,
            vec![
                BlockInfo { piece_index: 4, offset: 0, len: 16384 },
                BlockInfo { piece_index: 4, offset: 16384, len: 16384 },
            ]
        );
    }

    #[test]
    fn last_block_is_shortened() {
        let blocks: Vec<_> =
            blocks_of(0, UNEVEN_PIECE_LEN, BLOCK_LEN).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].offset, 2 * BLOCK_LEN);
        assert_eq!(blocks[2].len, OVERLAP);
        assert_eq!(blocks[2].end(), UNEVEN_PIECE_LEN as u64);
        assert_eq!(blocks[1].index_in_piece(BLOCK_LEN), 1);
    }
}
