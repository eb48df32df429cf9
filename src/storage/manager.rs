use std::sync::Arc;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::allocator::ensure_capacity;
use super::error::StorageError;
use super::file::FileAccess;
use super::handle_cache::HandleCache;
use crate::metainfo::{TorrentFile, TorrentInfo};

/// Piece- and block-addressed access to one torrent's files.
///
/// Translates piece coordinates into per-file spans and routes each span
/// through the session's shared [`HandleCache`]. Padding files are never
/// stored: they read back as zeroes and writes to them are dropped.
pub struct TorrentStorage {
    info: Arc<TorrentInfo>,
    cache: Arc<HandleCache>,
}

impl TorrentStorage {
    pub fn new(info: Arc<TorrentInfo>, cache: Arc<HandleCache>) -> Self {
        Self { info, cache }
    }

    pub fn info(&self) -> &TorrentInfo {
        &self.info
    }

    pub fn cache(&self) -> &Arc<HandleCache> {
        &self.cache
    }

    pub fn piece_count(&self) -> u32 {
        self.info.piece_count()
    }

    fn stored_files(&self) -> impl Iterator<Item = &TorrentFile> {
        self.info.files().iter().filter(|f| !f.is_padding)
    }

    /// Creates every non-padding file at its declared length.
    pub async fn preallocate(&self) -> Result<(), StorageError> {
        let mode = self.cache.allocation_mode();
        for file in self.stored_files() {
            let path = file.full_path.clone();
            let length = file.length;
            tokio::task::spawn_blocking(move || {
                ensure_capacity(&path, length, FileAccess::ReadWrite, mode)
            })
            .await
            .map_err(StorageError::join)??;
        }
        Ok(())
    }

    fn block_start(&self, piece_index: u32, offset: u32, length: u32) -> Result<u64, StorageError> {
        let piece = self.info.piece_range(piece_index)?;
        if u64::from(offset) + u64::from(length) > piece.end - piece.start {
            return Err(StorageError::InvalidBlockOffset {
                piece: piece_index,
                offset,
                length,
            });
        }
        Ok(piece.start + u64::from(offset))
    }

    async fn read_range(&self, start: u64, length: u64) -> Result<Bytes, StorageError> {
        let mut data = vec![0u8; length as usize];
        let mut pos = 0usize;

        for span in self.info.file_spans(start, length)? {
            let end = pos + span.length as usize;
            let file = &self.info.files()[span.file_index];
            if !file.is_padding {
                self.cache.read(file, span.file_offset, &mut data[pos..end]).await?;
            }
            pos = end;
        }

        Ok(Bytes::from(data))
    }

    async fn write_range(&self, start: u64, data: &[u8]) -> Result<(), StorageError> {
        let data = Bytes::copy_from_slice(data);
        let mut pos = 0usize;

        for span in self.info.file_spans(start, data.len() as u64)? {
            let end = pos + span.length as usize;
            let file = &self.info.files()[span.file_index];
            if !file.is_padding {
                self.cache
                    .write_bytes(file, span.file_offset, data.slice(pos..end))
                    .await?;
            }
            pos = end;
        }

        Ok(())
    }

    pub async fn read_piece(&self, piece_index: u32) -> Result<Bytes, StorageError> {
        let piece = self.info.piece_range(piece_index)?;
        self.read_range(piece.start, piece.end - piece.start).await
    }

    pub async fn write_piece(&self, piece_index: u32, data: &[u8]) -> Result<(), StorageError> {
        let piece = self.info.piece_range(piece_index)?;
        if data.len() as u64 != piece.end - piece.start {
            return Err(StorageError::InvalidArgument(format!(
                "piece {} is {} bytes, got {}",
                piece_index,
                piece.end - piece.start,
                data.len()
            )));
        }
        self.write_range(piece.start, data).await
    }

    pub async fn read_block(
        &self,
        piece_index: u32,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, StorageError> {
        let start = self.block_start(piece_index, offset, length)?;
        self.read_range(start, u64::from(length)).await
    }

    pub async fn write_block(
        &self,
        piece_index: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let length = u32::try_from(data.len())
            .map_err(|_| StorageError::InvalidArgument(format!("block of {} bytes", data.len())))?;
        let start = self.block_start(piece_index, offset, length)?;
        self.write_range(start, data).await
    }

    /// Reads a piece back and compares its hash with `expected_hash`:
    /// SHA-1 for 20-byte hashes, SHA-256 for 32-byte hashes.
    pub async fn verify_piece(
        &self,
        piece_index: u32,
        expected_hash: &[u8],
    ) -> Result<bool, StorageError> {
        let expected = expected_hash.to_vec();
        if expected.len() != 20 && expected.len() != 32 {
            return Err(StorageError::InvalidArgument(format!(
                "hash length {}",
                expected.len()
            )));
        }

        let data = self.read_piece(piece_index).await?;

        let valid = tokio::task::spawn_blocking(move || {
            if expected.len() == 32 {
                let mut hasher = Sha256::new();
                hasher.update(&data);
                hasher.finalize().to_vec() == expected
            } else {
                let mut hasher = Sha1::new();
                hasher.update(&data);
                hasher.finalize().to_vec() == expected
            }
        })
        .await
        .map_err(StorageError::join)?;

        Ok(valid)
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        for file in self.stored_files() {
            self.cache.flush(file).await?;
        }
        Ok(())
    }

    /// Releases every handle this torrent holds in the shared cache.
    pub async fn close(&self) -> Result<(), StorageError> {
        for file in self.stored_files() {
            self.cache.close(file).await?;
        }
        tracing::debug!("closed storage for {} files", self.info.files().len());
        Ok(())
    }
}
