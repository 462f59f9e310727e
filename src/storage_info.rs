use crate::{metainfo::Metainfo, PieceIndex};

/// Information about the torrent's storage: how the content is split into
/// pieces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageInfo {
    /// The number of pieces in the torrent.
    pub piece_count: usize,
    /// The nominal length of a piece.
    pub piece_len: u32,
    /// The length of the last piece in torrent, which may differ from the
    /// normal piece length if the download size is not an exact multiple of
    /// the normal piece length.
    pub last_piece_len: u32,
    /// The sum of the length of all files in the torrent.
    pub file_size: u64,
}

impl StorageInfo {
    pub fn new(metainfo: &Metainfo) -> Self {
        let piece_count = metainfo.piece_count();
        let piece_len = metainfo.piece_len as u32;
        let file_size = metainfo.file_size;
        let last_piece_len = if piece_count == 0 {
            0
        } else {
            (file_size - piece_len as u64 * (piece_count as u64 - 1)) as u32
        };
        Self {
            piece_count,
            piece_len,
            last_piece_len,
            file_size,
        }
    }

    /// Returns the length of the piece at the index, or `None` if the index
    /// is out of range.
    pub fn piece_len(&self, index: PieceIndex) -> Option<u32> {
        if index + 1 == self.piece_count {
            Some(self.last_piece_len)
        } else if index < self.piece_count {
            Some(self.piece_len)
        } else {
            None
        }
    }

    /// Returns the byte offset of the piece in the file.
    pub fn torrent_offset(&self, index: PieceIndex) -> u64 {
        index as u64 * self.piece_len as u64
    }

    /// Returns true if a block of `len` bytes at `offset` lies within the
    /// piece and is no longer than `max_block_len`.
    pub fn is_valid_block(
        &self,
        index: PieceIndex,
        offset: u32,
        len: u32,
        max_block_len: u32,
    ) -> bool {
        match self.piece_len(index) {
            Some(piece_len) => {
                len > 0
                    && len <= max_block_len
                    && offset as u64 + len as u64 <= piece_len as u64
            }
            None => false,
        }
    }
}
