use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a torrent layout or translating between
/// piece indices and byte offsets.
///
/// These always indicate a caller or metadata bug, so nothing in the crate
/// retries on them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// The piece length must be non-zero.
    #[error("invalid piece length: {0}")]
    InvalidPieceLength(u64),

    /// No file owns the requested piece.
    #[error("piece index out of range: {0}")]
    PieceOutOfRange(u32),

    /// The block lies past the end of its piece.
    #[error("block out of range: piece {piece}, block {block}")]
    BlockOutOfRange { piece: u32, block: u32 },

    /// The byte offset lies outside every file in the torrent.
    #[error("byte offset out of range: {0}")]
    OffsetOutOfRange(u64),

    /// A byte range extends past the end of the torrent.
    #[error("byte range out of range: offset {offset}, length {length}")]
    RangeOutOfRange { offset: u64, length: u64 },

    /// A file path would escape the download directory.
    #[error("path traversal detected in file path: {0}")]
    PathTraversal(PathBuf),
}
