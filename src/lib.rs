//! rbit-disk - On-disk piece storage for a BitTorrent client
//!
//! This library maps the pieces of v1, v2 and hybrid torrents onto the files
//! they cover and serves positional reads and writes through a bounded cache
//! of open file handles shared by every torrent in a session.
//!
//! # Modules
//!
//! - [`metainfo`] - File layout and piece/offset addressing (BEP-3/47/52)
//! - [`storage`] - Sparse allocation, handle cache and piece/block I/O
//! - [`constants`] - Block size and storage defaults

pub mod constants;
pub mod metainfo;
pub mod storage;

pub use metainfo::{FileSpan, FileSpec, LayoutError, TorrentFile, TorrentInfo, TorrentLayout};
pub use storage::{
    AllocationMode, FileAccess, FileReaderWriter, HandleCache, StorageError, TorrentStorage,
};
