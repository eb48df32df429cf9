//! Placeholder file creation and shrink-on-open.
//!
//! Everything here blocks; callers run it on the blocking pool.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use super::error::StorageError;
use super::file::{AllocationMode, FileAccess};
use crate::constants::ALLOCATION_CHUNK_SIZE;

/// Makes sure `path` exists with room for `target_length` bytes.
///
/// A missing file is created, along with its parent directories, already at
/// `target_length`. An existing file is never grown here; when `access`
/// allows writing and the file is longer than `target_length` it is
/// truncated.
///
/// Concurrent first opens of the same file must be serialized by the caller.
pub fn ensure_capacity(
    path: &Path,
    target_length: u64,
    access: FileAccess,
    mode: AllocationMode,
) -> Result<(), StorageError> {
    match fs::metadata(path) {
        Ok(metadata) => {
            if access.can_write() && metadata.len() > target_length {
                truncate(path, target_length)?;
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            create(path, target_length, mode)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn create(path: &Path, length: u64, mode: AllocationMode) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    match mode {
        AllocationMode::Sparse => file.set_len(length)?,
        AllocationMode::Full => {
            let zeroes = vec![0u8; ALLOCATION_CHUNK_SIZE];
            let mut remaining = length;
            while remaining > 0 {
                let take = remaining.min(ALLOCATION_CHUNK_SIZE as u64) as usize;
                file.write_all(&zeroes[..take])?;
                remaining -= take as u64;
            }
            file.sync_data()?;
        }
    }

    tracing::trace!("created {} at {} bytes ({:?})", path.display(), length, mode);
    Ok(())
}

fn truncate(path: &Path, length: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(length)?;
    tracing::debug!("truncated {} to {} bytes", path.display(), length);
    Ok(())
}
