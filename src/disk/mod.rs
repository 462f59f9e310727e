//! The file handler shared by all peer sessions of a swarm.
//!
//! All sessions read and write the same file. A block's position is computed
//! from its piece index and offset, and the seek plus the subsequent read or
//! write are done as one critical section under the file's lock, as the
//! cursor of the single handle is moved before each operation.

use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

use crate::{
    error::disk::{NewFileError, ReadError, WriteError},
    storage_info::StorageInfo,
    PieceIndex,
};

pub struct SharedFile {
    path: PathBuf,
    info: StorageInfo,
    handle: Mutex<File>,
}

impl SharedFile {
    /// Opens the file in create, read, and write modes.
    pub async fn open(
        path: impl AsRef<Path>,
        info: StorageInfo,
    ) -> Result<Self, NewFileError> {
        let path = path.as_ref().to_path_buf();
        log::trace!("Opening and creating file {:?}", path);

        let handle = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&path)
            .await
            .map_err(|e| {
                log::warn!("Failed to open file {:?}", path);
                NewFileError::Io(e)
            })?;

        Ok(Self {
            path,
            info,
            handle: Mutex::new(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn storage(&self) -> &StorageInfo {
        &self.info
    }

    /// Pre-allocates the whole file, filled with zeros.
    pub async fn initialize_for_download(&self) -> Result<(), NewFileError> {
        log::debug!(
            "Allocating {} bytes for file {:?}",
            self.info.file_size,
            self.path
        );
        let handle = self.handle.lock().await;
        handle.set_len(self.info.file_size).await?;
        handle.sync_all().await?;
        Ok(())
    }

    /// Reads the block of `len` bytes at `offset` in the piece.
    pub async fn read_block(
        &self,
        piece_index: PieceIndex,
        offset: u32,
        len: u32,
    ) -> Result<Vec<u8>, ReadError> {
        let pos = self
            .block_pos(piece_index, offset, len as u64)
            .ok_or(ReadError::InvalidBlock {
                piece_index,
                offset,
                len,
            })?;

        let mut data = vec![0; len as usize];
        let mut handle = self.handle.lock().await;
        handle.seek(SeekFrom::Start(pos)).await?;
        handle.read_exact(&mut data).await.map_err(|e| {
            log::warn!("File {:?} read error: {}", self.path, e);
            ReadError::from(e)
        })?;
        Ok(data)
    }

    /// Writes the block at `offset` in the piece.
    pub async fn write_block(
        &self,
        piece_index: PieceIndex,
        offset: u32,
        data: &[u8],
    ) -> Result<(), WriteError> {
        let pos = self
            .block_pos(piece_index, offset, data.len() as u64)
            .ok_or(WriteError::InvalidBlock {
                piece_index,
                offset,
                len: data.len(),
            })?;

        let mut handle = self.handle.lock().await;
        handle.seek(SeekFrom::Start(pos)).await?;
        handle.write_all(data).await.map_err(|e| {
            log::warn!("File {:?} write error: {}", self.path, e);
            WriteError::Io(e)
        })?;
        handle.flush().await?;
        Ok(())
    }

    /// Returns the absolute file position of the block if it lies within the
    /// piece.
    fn block_pos(
        &self,
        piece_index: PieceIndex,
        offset: u32,
        len: u64,
    ) -> Option<u64> {
        let piece_len = self.info.piece_len(piece_index)?;
        if offset as u64 + len > piece_len as u64 {
            return None;
        }
        Some(self.info.torrent_offset(piece_index) + offset as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metainfo;

    async fn shared_file(dir: &Path, size: usize) -> SharedFile {
        let data = vec![0u8; size];
        let info = StorageInfo::new(&metainfo::for_content(&data, 1024));
        SharedFile::open(dir.join("file.bin"), info).await.unwrap()
    }

    #[tokio::test]
    async fn should_allocate_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = shared_file(dir.path(), 4000).await;
        file.initialize_for_download().await.unwrap();
        let len = std::fs::metadata(file.path()).unwrap().len();
        assert_eq!(len, 4000);
    }

    #[tokio::test]
    async fn should_write_and_read_blocks_of_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let file = shared_file(dir.path(), 4000).await;
        file.initialize_for_download().await.unwrap();

        file.write_block(1, 10, b"hello").await.unwrap();
        file.write_block(3, 0, &[7; 928]).await.unwrap();

        assert_eq!(file.read_block(1, 10, 5).await.unwrap(), b"hello");
        assert_eq!(file.read_block(3, 0, 928).await.unwrap(), vec![7; 928]);

        let raw = std::fs::read(file.path()).unwrap();
        assert_eq!(&raw[1024 + 10..1024 + 15], b"hello");
        assert_eq!(raw[3 * 1024 - 1], 0);
    }

    #[tokio::test]
    async fn should_reject_blocks_outside_of_piece() {
        let dir = tempfile::tempdir().unwrap();
        let file = shared_file(dir.path(), 4000).await;
        file.initialize_for_download().await.unwrap();

        assert!(matches!(
            file.read_block(3, 900, 100).await,
            Err(ReadError::InvalidBlock { .. })
        ));
        assert!(matches!(
            file.write_block(4, 0, b"x").await,
            Err(WriteError::InvalidBlock { .. })
        ));
    }

    #[tokio::test]
    async fn should_serialize_concurrent_writes() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(shared_file(dir.path(), 4000).await);
        file.initialize_for_download().await.unwrap();

        let mut tasks = Vec::new();
        for piece in 0..3 {
            let file = Arc::clone(&file);
            tasks.push(tokio::spawn(async move {
                for offset in (0..1024).step_by(256) {
                    file.write_block(piece, offset, &[piece as u8 + 1; 256])
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let raw = std::fs::read(file.path()).unwrap();
        for piece in 0..3 {
            assert!(raw[piece * 1024..(piece + 1) * 1024]
                .iter()
                .all(|b| *b == piece as u8 + 1));
        }
    }
}
