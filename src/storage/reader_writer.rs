//! Positional readers and writers bound to a single file.
//!
//! Two tiers exist, chosen at build time:
//!
//! - On Unix, [`PositionalFile`] issues `pread`/`pwrite` against a handle
//!   shared by every slot of the same file, so no cursor is shared.
//! - Elsewhere, [`SeekingFile`] owns its own handle and seeks before each
//!   operation.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::error::StorageError;
use super::file::FileAccess;

/// The capability every cached slot exposes.
///
/// Implementations block; the handle cache calls them from the blocking pool.
pub trait FileReaderWriter: Send + Sync {
    fn can_write(&self) -> bool;

    /// Declared length of the file this handle is bound to.
    fn length(&self) -> u64;

    /// Fills `buf` from `offset`. Either the whole buffer is read or an
    /// error is returned.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError>;

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError>;

    /// Releases the underlying handle. Calling it twice is harmless.
    fn dispose(&self);
}

pub(crate) fn check_range(offset: u64, len: usize, file_length: u64) -> Result<(), StorageError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= file_length => Ok(()),
        _ => Err(StorageError::OutOfRange {
            offset,
            length: len as u64,
            file_length,
        }),
    }
}

fn disposed() -> StorageError {
    StorageError::Io(io::Error::other("file handle disposed"))
}

fn open_options(access: FileAccess) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true);
    if access.can_write() {
        options.write(true).create(true);
    }
    options
}

/// OS handles an entry keeps open for reuse by all of its slots.
#[derive(Default)]
pub(crate) struct SharedHandles {
    #[cfg_attr(not(unix), allow(dead_code))]
    read: Option<Arc<File>>,
    #[cfg_attr(not(unix), allow(dead_code))]
    read_write: Option<Arc<File>>,
}

impl SharedHandles {
    /// Opens a reader/writer for `path`, reusing an already open handle of
    /// the same access where the platform allows it.
    #[cfg(unix)]
    pub(crate) fn open(
        &mut self,
        path: &Path,
        length: u64,
        access: FileAccess,
    ) -> Result<Arc<dyn FileReaderWriter>, StorageError> {
        let cached = match access {
            FileAccess::Read => &mut self.read,
            FileAccess::ReadWrite => &mut self.read_write,
        };
        let handle = match cached {
            Some(handle) => Arc::clone(handle),
            None => {
                let handle = Arc::new(open_options(access).open(path)?);
                *cached = Some(Arc::clone(&handle));
                handle
            }
        };
        Ok(Arc::new(PositionalFile::new(handle, length, access)))
    }

    #[cfg(not(unix))]
    pub(crate) fn open(
        &mut self,
        path: &Path,
        length: u64,
        access: FileAccess,
    ) -> Result<Arc<dyn FileReaderWriter>, StorageError> {
        Ok(Arc::new(SeekingFile::open(path, length, access)?))
    }

    pub(crate) fn clear(&mut self) {
        self.read = None;
        self.read_write = None;
    }
}

#[cfg(unix)]
pub use positional::PositionalFile;

#[cfg(unix)]
mod positional {
    use std::fs::File;
    use std::os::unix::fs::FileExt;
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::{check_range, disposed, FileReaderWriter};
    use crate::storage::error::StorageError;
    use crate::storage::file::FileAccess;

    pub struct PositionalFile {
        handle: RwLock<Option<Arc<File>>>,
        length: u64,
        access: FileAccess,
    }

    impl PositionalFile {
        pub fn new(handle: Arc<File>, length: u64, access: FileAccess) -> Self {
            Self {
                handle: RwLock::new(Some(handle)),
                length,
                access,
            }
        }

        fn handle(&self) -> Result<Arc<File>, StorageError> {
            self.handle.read().clone().ok_or_else(disposed)
        }
    }

    impl FileReaderWriter for PositionalFile {
        fn can_write(&self) -> bool {
            self.access.can_write()
        }

        fn length(&self) -> u64 {
            self.length
        }

        fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
            check_range(offset, buf.len(), self.length)?;
            self.handle()?.read_exact_at(buf, offset)?;
            Ok(buf.len())
        }

        fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), StorageError> {
            if !self.can_write() {
                return Err(StorageError::UnsupportedAccess("write through read-only handle"));
            }
            check_range(offset, buf.len(), self.length)?;
            self.handle()?.write_all_at(buf, offset)?;
            Ok(())
        }

        fn flush(&self) -> Result<(), StorageError> {
            if self.can_write() {
                self.handle()?.sync_data()?;
            }
            Ok(())
        }

        fn dispose(&self) {
            self.handle.write().take();
        }
    }
}

/// A reader/writer that owns its handle and seeks before every operation.
pub struct SeekingFile {
    file: parking_lot::Mutex<Option<File>>,
    length: u64,
    access: FileAccess,
}

impl SeekingFile {
    pub fn open(path: &Path, length: u64, access: FileAccess) -> Result<Self, StorageError> {
        let file = open_options(access).open(path)?;
        Ok(Self {
            file: parking_lot::Mutex::new(Some(file)),
            length,
            access,
        })
    }
}

impl FileReaderWriter for SeekingFile {
    fn can_write(&self) -> bool {
        self.access.can_write()
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        use std::io::{Read, Seek, SeekFrom};

        check_range(offset, buf.len(), self.length)?;
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(disposed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(buf.len())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), StorageError> {
        use std::io::{Seek, SeekFrom, Write};

        if !self.can_write() {
            return Err(StorageError::UnsupportedAccess("write through read-only handle"));
        }
        check_range(offset, buf.len(), self.length)?;
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(disposed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        use std::io::Write;

        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            file.flush()?;
            if self.can_write() {
                file.sync_data()?;
            }
        }
        Ok(())
    }

    fn dispose(&self) {
        self.file.lock().take();
    }
}
