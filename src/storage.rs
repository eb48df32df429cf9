//! Disk storage and file handle management.
//!
//! This module maps torrent files onto disk and serves positional reads and
//! writes under a hard limit on simultaneously open OS file handles.
//!
//! # Overview
//!
//! Every request names a [`TorrentFile`](crate::metainfo::TorrentFile) and a
//! byte offset inside it. The [`HandleCache`] bounds-checks the request,
//! waits for an admission ticket, checks out an idle handle for that file (or
//! opens a new one, creating the file sparsely on first use) and performs the
//! I/O on the blocking pool. Handles stay open for reuse until the cache is
//! over its limit, when the least recently used one is evicted.
//!
//! # Components
//!
//! - [`HandleCache`] - Shared, bounded cache of open handles
//! - [`TorrentStorage`] - Piece/block addressed access for one torrent
//! - [`FileReaderWriter`] - Positional I/O capability behind each cached slot
//! - [`ensure_capacity`] - Sparse placeholder creation and shrink-on-open
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use rbit_disk::metainfo::{FileSpec, TorrentInfo, TorrentLayout};
//! use rbit_disk::storage::{HandleCache, TorrentStorage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let info = TorrentInfo::new(
//!     TorrentLayout::Legacy,
//!     512,
//!     "./downloads",
//!     vec![FileSpec::new("file1.txt", 1000), FileSpec::new("file2.txt", 500)],
//! )?;
//!
//! let cache = Arc::new(HandleCache::new(64));
//! let storage = TorrentStorage::new(Arc::new(info), cache);
//!
//! storage.write_piece(0, &[0u8; 512]).await?;
//! let block = storage.read_block(0, 0, 256).await?;
//! assert_eq!(block.len(), 256);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Requests for different files run in parallel up to the admission limit.
//! Each cached handle serves one request at a time; a file accumulates extra
//! handles when it sees concurrent requests. Overlapping writes issued
//! concurrently are not ordered against each other.

mod allocator;
mod error;
mod file;
mod handle_cache;
mod limiter;
mod manager;
mod reader_writer;

pub use allocator::ensure_capacity;
pub use error::StorageError;
pub use file::{AllocationMode, FileAccess};
pub use handle_cache::HandleCache;
pub use manager::TorrentStorage;
#[cfg(unix)]
pub use reader_writer::PositionalFile;
pub use reader_writer::{FileReaderWriter, SeekingFile};

#[cfg(test)]
mod tests;
