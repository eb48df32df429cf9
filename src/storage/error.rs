use thiserror::Error;

use crate::metainfo::LayoutError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("access out of range: offset {offset}, length {length}, file length {file_length}")]
    OutOfRange {
        offset: u64,
        length: u64,
        file_length: u64,
    },

    #[error("invalid block offset: piece {piece}, offset {offset}, length {length}")]
    InvalidBlockOffset { piece: u32, offset: u32, length: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported access: {0}")]
    UnsupportedAccess(&'static str),
}

impl StorageError {
    /// Returns true for every error caused by an offset, length or index
    /// falling outside the file or torrent it addresses.
    pub fn is_out_of_range(&self) -> bool {
        match self {
            StorageError::OutOfRange { .. } | StorageError::InvalidBlockOffset { .. } => true,
            StorageError::Layout(e) => !matches!(
                e,
                LayoutError::InvalidPieceLength(_) | LayoutError::PathTraversal(_)
            ),
            _ => false,
        }
    }

    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        StorageError::Io(std::io::Error::other(err))
    }
}
