//! Piece and byte-offset addressing for v1, v2 and hybrid torrents.

use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use super::error::LayoutError;
use crate::constants::BLOCK_SIZE;

/// How a torrent's piece index space maps onto its files.
///
/// - **Legacy** (BEP-3): files are concatenated into one stream and cut into
///   equal pieces; only the final piece may be short.
/// - **Modern** (BEP-52): every file starts on a fresh piece, so each file's
///   last piece may be short and no piece spans two files.
/// - **Hybrid** (BEP-47): carries both identities but pads files to piece
///   boundaries, so the legacy offset math applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TorrentLayout {
    #[default]
    Legacy,
    Modern,
    Hybrid,
}

impl TorrentLayout {
    /// Returns true if pieces are addressed as one contiguous byte stream.
    pub fn is_contiguous(&self) -> bool {
        !matches!(self, TorrentLayout::Modern)
    }

    /// Returns true if the torrent has a v1 (SHA-1) identity.
    pub fn has_v1_identity(&self) -> bool {
        matches!(self, TorrentLayout::Legacy | TorrentLayout::Hybrid)
    }

    /// Returns true if the torrent has a v2 (SHA-256) identity.
    pub fn has_v2_identity(&self) -> bool {
        matches!(self, TorrentLayout::Modern | TorrentLayout::Hybrid)
    }
}

/// Input description of one file, in torrent order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub length: u64,
    pub is_padding: bool,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
            is_padding: false,
        }
    }

    /// A padding file (BEP-47). Padding is addressed but never stored.
    pub fn padding(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
            is_padding: true,
        }
    }
}

/// A file placed within a torrent's piece space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Path relative to the download directory.
    pub path: PathBuf,
    /// Path on disk; this is the file's identity in the handle cache.
    pub full_path: PathBuf,
    /// Declared length in bytes.
    pub length: u64,
    /// Byte offset of the file's first byte within the torrent.
    pub offset_in_torrent: u64,
    /// First piece holding data of this file.
    pub start_piece: u32,
    /// Last piece holding data of this file (inclusive).
    pub end_piece: u32,
    pub is_padding: bool,
}

impl TorrentFile {
    pub fn byte_range(&self) -> Range<u64> {
        self.offset_in_torrent..self.offset_in_torrent + self.length
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        self.byte_range().contains(&offset)
    }

    pub fn contains_piece(&self, piece_index: u32) -> bool {
        piece_index >= self.start_piece && piece_index <= self.end_piece
    }

    /// Returns true if both files hold data and share at least one piece.
    pub fn overlaps(&self, other: &TorrentFile) -> bool {
        self.length > 0
            && other.length > 0
            && self.start_piece <= other.end_piece
            && other.start_piece <= self.end_piece
    }
}

/// A slice of a torrent byte range that falls inside a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

/// Piece geometry of a torrent: its layout, piece length and placed files.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    layout: TorrentLayout,
    piece_length: u64,
    files: Vec<TorrentFile>,
    total_size: u64,
    piece_count: u32,
}

fn validate_file_path(file_path: &Path) -> Result<(), LayoutError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(LayoutError::PathTraversal(file_path.to_path_buf()));
            }
            _ => {}
        }
    }
    Ok(())
}

fn to_piece_index(value: u64, offset: u64) -> Result<u32, LayoutError> {
    u32::try_from(value).map_err(|_| LayoutError::OffsetOutOfRange(offset))
}

impl TorrentInfo {
    /// Places `files` under `base_path` according to `layout`.
    ///
    /// # Errors
    ///
    /// Fails if `piece_length` is zero, a path escapes `base_path`, or the
    /// torrent has more pieces than 32-bit piece numbers can count.
    pub fn new(
        layout: TorrentLayout,
        piece_length: u64,
        base_path: impl AsRef<Path>,
        files: impl IntoIterator<Item = FileSpec>,
    ) -> Result<Self, LayoutError> {
        if piece_length == 0 {
            return Err(LayoutError::InvalidPieceLength(piece_length));
        }

        let base_path = base_path.as_ref();
        let mut placed = Vec::new();
        let mut offset = 0u64;
        let mut next_piece = 0u32;

        for spec in files {
            validate_file_path(&spec.path)?;

            let (start_piece, end_piece) = if layout.is_contiguous() {
                let start = to_piece_index(offset / piece_length, offset)?;
                let end = match spec.length {
                    0 => start,
                    len => to_piece_index((offset + len - 1) / piece_length, offset)?,
                };
                (start, end)
            } else if spec.length == 0 {
                // Empty files own no piece in a v2 torrent.
                let borrowed = next_piece.saturating_sub(1);
                (borrowed, borrowed)
            } else {
                let count = to_piece_index(spec.length.div_ceil(piece_length), offset)?;
                let start = next_piece;
                next_piece = start
                    .checked_add(count)
                    .ok_or(LayoutError::OffsetOutOfRange(offset))?;
                (start, next_piece - 1)
            };

            let end_offset = offset
                .checked_add(spec.length)
                .ok_or(LayoutError::RangeOutOfRange {
                    offset,
                    length: spec.length,
                })?;

            placed.push(TorrentFile {
                full_path: base_path.join(&spec.path),
                path: spec.path,
                length: spec.length,
                offset_in_torrent: offset,
                start_piece,
                end_piece,
                is_padding: spec.is_padding,
            });
            offset = end_offset;
        }

        let piece_count = if layout.is_contiguous() {
            u32::try_from(offset.div_ceil(piece_length)).map_err(|_| {
                LayoutError::RangeOutOfRange {
                    offset: 0,
                    length: offset,
                }
            })?
        } else {
            next_piece
        };

        Ok(Self {
            layout,
            piece_length,
            files: placed,
            total_size: offset,
            piece_count,
        })
    }

    pub fn layout(&self) -> TorrentLayout {
        self.layout
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn files(&self) -> &[TorrentFile] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Option<&TorrentFile> {
        self.files.get(index)
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Size in bytes of `piece_index`.
    ///
    /// For contiguous layouts every piece but the last is `piece_length`. For
    /// the modern layout the last piece of every file may be short.
    pub fn bytes_in_piece(&self, piece_index: u32) -> Result<u64, LayoutError> {
        if self.layout.is_contiguous() {
            let count = self.piece_count();
            if piece_index >= count {
                return Err(LayoutError::PieceOutOfRange(piece_index));
            }
            if piece_index < count - 1 {
                return Ok(self.piece_length);
            }
            return Ok(self.total_size - self.piece_to_offset(piece_index)?);
        }

        self.files
            .iter()
            .find(|f| f.length > 0 && f.contains_piece(piece_index))
            .map(|f| {
                let consumed = u64::from(piece_index - f.start_piece) * self.piece_length;
                (f.length - consumed).min(self.piece_length)
            })
            .ok_or(LayoutError::PieceOutOfRange(piece_index))
    }

    /// Number of [`BLOCK_SIZE`] blocks in `piece_index`, counting a short tail.
    pub fn blocks_in_piece(&self, piece_index: u32) -> Result<u32, LayoutError> {
        let bytes = self.bytes_in_piece(piece_index)?;
        Ok(bytes.div_ceil(u64::from(BLOCK_SIZE)) as u32)
    }

    /// Size in bytes of block `block_index` within `piece_index`.
    pub fn bytes_in_block(&self, piece_index: u32, block_index: u32) -> Result<u32, LayoutError> {
        let piece_bytes = self.bytes_in_piece(piece_index)?;
        let start = u64::from(block_index) * u64::from(BLOCK_SIZE);
        if start >= piece_bytes {
            return Err(LayoutError::BlockOutOfRange {
                piece: piece_index,
                block: block_index,
            });
        }
        Ok((piece_bytes - start).min(u64::from(BLOCK_SIZE)) as u32)
    }

    /// Maps a torrent byte offset to the piece containing it.
    pub fn offset_to_piece(&self, byte_offset: u64) -> Result<u32, LayoutError> {
        if self.layout.is_contiguous() {
            if byte_offset >= self.total_size {
                return Err(LayoutError::OffsetOutOfRange(byte_offset));
            }
            return to_piece_index(byte_offset / self.piece_length, byte_offset);
        }

        let file = self
            .files
            .iter()
            .find(|f| f.contains_offset(byte_offset))
            .ok_or(LayoutError::OffsetOutOfRange(byte_offset))?;
        let within = (byte_offset - file.offset_in_torrent) / self.piece_length;
        Ok(file.start_piece + to_piece_index(within, byte_offset)?)
    }

    /// Maps a piece to the torrent byte offset of its first byte.
    pub fn piece_to_offset(&self, piece_index: u32) -> Result<u64, LayoutError> {
        if self.layout.is_contiguous() {
            return self
                .piece_length
                .checked_mul(u64::from(piece_index))
                .ok_or(LayoutError::PieceOutOfRange(piece_index));
        }

        self.files
            .iter()
            .find(|f| f.length > 0 && f.contains_piece(piece_index))
            .map(|f| f.offset_in_torrent + u64::from(piece_index - f.start_piece) * self.piece_length)
            .ok_or(LayoutError::PieceOutOfRange(piece_index))
    }

    /// Torrent byte range covered by `piece_index`.
    pub fn piece_range(&self, piece_index: u32) -> Result<Range<u64>, LayoutError> {
        let start = self.piece_to_offset(piece_index)?;
        let len = self.bytes_in_piece(piece_index)?;
        Ok(start..start + len)
    }

    /// Splits the torrent byte range `[offset, offset + length)` into the
    /// per-file spans it covers, in file order.
    pub fn file_spans(&self, offset: u64, length: u64) -> Result<Vec<FileSpan>, LayoutError> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.total_size)
            .ok_or(LayoutError::RangeOutOfRange { offset, length })?;

        let mut spans = Vec::new();
        let mut current = offset;

        for (file_index, file) in self.files.iter().enumerate() {
            if current >= end {
                break;
            }
            if !file.contains_offset(current) {
                continue;
            }

            let take = (end - current).min(file.byte_range().end - current);
            spans.push(FileSpan {
                file_index,
                file_offset: current - file.offset_in_torrent,
                length: take,
            });
            current += take;
        }

        Ok(spans)
    }
}
