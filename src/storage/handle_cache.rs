//! Bounded cache of open file handles.
//!
//! Every file gets a [`FileEntry`] holding one or more slots. A slot is one
//! reader/writer plus its own async lock; at most one request uses a slot at
//! a time. Slots stay open after use and are reused by later requests until
//! the global open-handle count exceeds the configured maximum, at which
//! point the least recently used slot across all files is evicted.
//!
//! Lock order: file lock (async) → registry → entry slot list. The registry
//! and slot-list locks are never held across an `.await`. Eviction runs
//! without the file lock, so a new slot can leave the count one above the
//! maximum until its creator has evicted.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};

use super::allocator::ensure_capacity;
use super::error::StorageError;
use super::file::{AllocationMode, FileAccess};
use super::limiter::{AdmissionLimiter, Ticket};
use super::reader_writer::{check_range, FileReaderWriter, SharedHandles};
use crate::constants::DEFAULT_MAX_OPEN_FILES;
use crate::metainfo::TorrentFile;

type SharedReaderWriter = Arc<dyn FileReaderWriter>;
type SlotIo = Option<SharedReaderWriter>;

struct HandleSlot {
    /// Creation sequence; breaks ties between equal `last_used` stamps.
    id: u64,
    last_used: AtomicU64,
    io: Arc<TokioMutex<SlotIo>>,
}

impl HandleSlot {
    fn new(id: u64, stamp: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            last_used: AtomicU64::new(stamp),
            io: Arc::new(TokioMutex::new(None)),
        })
    }

    fn try_acquire(&self) -> Option<OwnedMutexGuard<SlotIo>> {
        Arc::clone(&self.io).try_lock_owned().ok()
    }

    fn age(&self) -> (u64, u64) {
        (self.last_used.load(Ordering::Relaxed), self.id)
    }
}

struct FileEntry {
    /// Serializes slot creation, flush, close and move for this file.
    lock: TokioMutex<()>,
    slots: Mutex<Vec<Arc<HandleSlot>>>,
    /// Held across create-or-truncate, open and rename on disk.
    disk: Mutex<SharedHandles>,
}

impl FileEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: TokioMutex::new(()),
            slots: Mutex::new(Vec::new()),
            disk: Mutex::new(SharedHandles::default()),
        })
    }

    fn release_handles(&self) {
        self.disk.lock().clear();
    }
}

struct Registry {
    files: HashMap<PathBuf, Arc<FileEntry>>,
    open_handles: usize,
}

impl Registry {
    fn is_current(&self, key: &Path, entry: &Arc<FileEntry>) -> bool {
        self.files.get(key).is_some_and(|e| Arc::ptr_eq(e, entry))
    }

    fn remove_if_empty(&mut self, key: &Path, entry: &Arc<FileEntry>) -> bool {
        if entry.slots.lock().is_empty() && self.is_current(key, entry) {
            self.files.remove(key);
            return true;
        }
        false
    }

    fn oldest_slot(&self) -> Option<(PathBuf, Arc<FileEntry>, Arc<HandleSlot>)> {
        let mut oldest: Option<(&PathBuf, &Arc<FileEntry>, Arc<HandleSlot>)> = None;
        for (key, entry) in &self.files {
            for slot in entry.slots.lock().iter() {
                if oldest.as_ref().is_none_or(|(_, _, o)| slot.age() < o.age()) {
                    oldest = Some((key, entry, Arc::clone(slot)));
                }
            }
        }
        oldest.map(|(key, entry, slot)| (key.clone(), Arc::clone(entry), slot))
    }
}

/// A published slot whose handle is not open yet. Unless disarmed, dropping
/// it takes the slot back out, including when the request is cancelled
/// mid-open.
struct PendingSlot<'a> {
    cache: &'a HandleCache,
    key: &'a Path,
    entry: &'a Arc<FileEntry>,
    slot: &'a Arc<HandleSlot>,
    armed: bool,
}

impl PendingSlot<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.discard_slot(self.key, self.entry, self.slot);
        }
    }
}

/// A slot checked out for one operation.
struct SlotLease {
    reader_writer: SharedReaderWriter,
    _slot: OwnedMutexGuard<SlotIo>,
    _ticket: Ticket,
}

/// Shared cache of open file handles for every torrent in a session.
///
/// Construct one per session and share it behind an [`Arc`].
///
/// # Examples
///
/// ```no_run
/// use rbit_disk::metainfo::{FileSpec, TorrentInfo, TorrentLayout};
/// use rbit_disk::storage::HandleCache;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let info = TorrentInfo::new(
///     TorrentLayout::Legacy,
///     16384,
///     "./downloads",
///     vec![FileSpec::new("file.dat", 1000)],
/// )?;
/// let file = &info.files()[0];
///
/// let cache = HandleCache::new(64);
/// cache.write(file, 0, b"hello").await?;
///
/// let mut buf = [0u8; 5];
/// cache.read(file, 0, &mut buf).await?;
/// assert_eq!(&buf, b"hello");
/// # Ok(())
/// # }
/// ```
pub struct HandleCache {
    registry: Mutex<Registry>,
    limiter: Arc<AdmissionLimiter>,
    clock: AtomicU64,
    next_slot_id: AtomicU64,
    allocation_mode: AllocationMode,
}

impl HandleCache {
    /// Creates a cache allowing at most `max_open_files` open handles
    /// (0 = unlimited).
    pub fn new(max_open_files: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                files: HashMap::new(),
                open_handles: 0,
            }),
            limiter: AdmissionLimiter::new(max_open_files),
            clock: AtomicU64::new(0),
            next_slot_id: AtomicU64::new(0),
            allocation_mode: AllocationMode::Sparse,
        }
    }

    pub fn with_allocation_mode(mut self, mode: AllocationMode) -> Self {
        self.allocation_mode = mode;
        self
    }

    pub fn allocation_mode(&self) -> AllocationMode {
        self.allocation_mode
    }

    /// Number of slots currently holding (or about to hold) an open handle.
    pub fn open_files(&self) -> usize {
        self.registry.lock().open_handles
    }

    pub fn maximum_open_files(&self) -> usize {
        self.limiter.capacity()
    }

    /// Changes the open-handle limit. Requests already admitted keep their
    /// tickets; the next slot creation evicts down to the new bound.
    pub fn set_maximum_open_files(&self, max_open_files: usize) {
        self.limiter.set_capacity(max_open_files);
        tracing::debug!("maximum open files set to {}", max_open_files);
    }

    /// Reads `buf.len()` bytes of `file` starting at `offset`.
    pub async fn read(
        &self,
        file: &TorrentFile,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, StorageError> {
        check_range(offset, buf.len(), file.length)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let lease = self.acquire(file, FileAccess::Read).await?;
        let len = buf.len();

        // The lease moves into the task so the slot and ticket stay held
        // until the I/O ends, even if this future is dropped.
        let data = tokio::task::spawn_blocking(move || {
            let mut data = vec![0u8; len];
            lease.reader_writer.read_at(&mut data, offset)?;
            Ok::<_, StorageError>(data)
        })
        .await
        .map_err(StorageError::join)??;

        buf.copy_from_slice(&data);
        Ok(len)
    }

    /// Writes all of `data` to `file` starting at `offset`.
    pub async fn write(
        &self,
        file: &TorrentFile,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.write_bytes(file, offset, Bytes::copy_from_slice(data)).await
    }

    pub async fn write_bytes(
        &self,
        file: &TorrentFile,
        offset: u64,
        data: Bytes,
    ) -> Result<(), StorageError> {
        check_range(offset, data.len(), file.length)?;
        if data.is_empty() {
            return Ok(());
        }

        let lease = self.acquire(file, FileAccess::ReadWrite).await?;

        tokio::task::spawn_blocking(move || lease.reader_writer.write_at(&data, offset))
            .await
            .map_err(StorageError::join)??;
        Ok(())
    }

    /// Returns true if `file` is present on disk. Does not touch the cache.
    pub async fn exists(&self, file: &TorrentFile) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(&file.full_path).await?)
    }

    /// Flushes every open slot of `file`.
    pub async fn flush(&self, file: &TorrentFile) -> Result<(), StorageError> {
        let Some(entry) = self.registry.lock().files.get(&file.full_path).cloned() else {
            return Ok(());
        };

        let _guard = entry.lock.lock().await;
        let slots = entry.slots.lock().clone();
        for slot in slots {
            let io = Arc::clone(&slot.io).lock_owned().await;
            if let Some(writer) = io.clone() {
                tokio::task::spawn_blocking(move || {
                    let _io = io;
                    writer.flush()
                })
                .await
                .map_err(StorageError::join)??;
            }
        }
        Ok(())
    }

    /// Closes every slot of `file` and drops its entry.
    pub async fn close(&self, file: &TorrentFile) -> Result<(), StorageError> {
        let Some(entry) = self.registry.lock().files.remove(&file.full_path) else {
            return Ok(());
        };

        let _guard = entry.lock.lock().await;
        let closed = self.close_slots(&entry).await;
        entry.release_handles();
        tracing::debug!("closed {} ({} handles)", file.full_path.display(), closed);
        Ok(())
    }

    /// Closes every file in the cache.
    pub async fn close_all(&self) {
        let entries: Vec<_> = self.registry.lock().files.drain().collect();
        for (path, entry) in entries {
            let _guard = entry.lock.lock().await;
            let closed = self.close_slots(&entry).await;
            entry.release_handles();
            tracing::trace!("closed {} ({} handles)", path.display(), closed);
        }
    }

    /// Closes `file` and renames it on disk to `new_path`.
    ///
    /// If `new_path` exists it is replaced when `overwrite` is set; otherwise
    /// the move fails and the destination is left alone. A source that was
    /// never created makes this a no-op.
    pub async fn move_file(
        &self,
        file: &TorrentFile,
        new_path: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let entry = self.entry_for(&file.full_path);
        let _guard = entry.lock.lock().await;
        self.close_slots(&entry).await;

        let source = file.full_path.clone();
        let destination = new_path.as_ref().to_path_buf();
        let disk_entry = Arc::clone(&entry);

        let result = tokio::task::spawn_blocking(move || {
            let mut handles = disk_entry.disk.lock();
            handles.clear();
            move_on_disk(&source, &destination, overwrite)
        })
        .await
        .map_err(StorageError::join)
        .and_then(|r| r.map_err(StorageError::from));

        self.registry.lock().remove_if_empty(&file.full_path, &entry);

        if result.is_ok() {
            tracing::debug!(
                "moved {} to {}",
                file.full_path.display(),
                new_path.as_ref().display()
            );
        }
        result
    }

    fn entry_for(&self, key: &Path) -> Arc<FileEntry> {
        let mut registry = self.registry.lock();
        Arc::clone(
            registry
                .files
                .entry(key.to_path_buf())
                .or_insert_with(FileEntry::new),
        )
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Checks out a slot of `file` able to serve `access`, reusing a free one
    /// or opening a new one.
    async fn acquire(
        &self,
        file: &TorrentFile,
        access: FileAccess,
    ) -> Result<SlotLease, StorageError> {
        let ticket = self.limiter.acquire().await?;

        loop {
            let entry = self.entry_for(&file.full_path);
            let guard = entry.lock.lock().await;

            if let Some((reader_writer, slot)) = self.find_free_slot(&entry, file, access) {
                return Ok(SlotLease {
                    reader_writer,
                    _slot: slot,
                    _ticket: ticket,
                });
            }

            let slot = HandleSlot::new(
                self.next_slot_id.fetch_add(1, Ordering::Relaxed),
                self.tick(),
            );
            // Locked before it is published so eviction cannot dispose it
            // while the handle is being opened.
            let mut slot_guard = Arc::clone(&slot.io).lock_owned().await;

            {
                let mut registry = self.registry.lock();
                if !registry.is_current(&file.full_path, &entry) {
                    // Closed or evicted while we waited for the file lock.
                    drop(registry);
                    drop(guard);
                    continue;
                }
                entry.slots.lock().push(Arc::clone(&slot));
                registry.open_handles += 1;
            }
            let pending = PendingSlot {
                cache: self,
                key: &file.full_path,
                entry: &entry,
                slot: &slot,
                armed: true,
            };
            drop(guard);

            self.evict_over_capacity(&mut self.registry.lock());

            tracing::trace!(
                "opening slot {} for {} ({:?})",
                slot.id,
                file.full_path.display(),
                access
            );

            return match self.open_slot(&entry, file, access).await {
                Ok(reader_writer) => {
                    *slot_guard = Some(Arc::clone(&reader_writer));
                    pending.disarm();
                    Ok(SlotLease {
                        reader_writer,
                        _slot: slot_guard,
                        _ticket: ticket,
                    })
                }
                Err(e) => {
                    drop(slot_guard);
                    drop(pending);
                    tracing::warn!(
                        "failed to open {}: {}",
                        file.full_path.display(),
                        e
                    );
                    Err(e)
                }
            };
        }
    }

    /// A free slot is compatible when it can serve `access` and was opened
    /// with the same declared length, since that length is its bound.
    fn find_free_slot(
        &self,
        entry: &FileEntry,
        file: &TorrentFile,
        access: FileAccess,
    ) -> Option<(SharedReaderWriter, OwnedMutexGuard<SlotIo>)> {
        let slots = entry.slots.lock();
        for slot in slots.iter() {
            let Some(guard) = slot.try_acquire() else {
                continue;
            };
            let compatible = guard
                .as_ref()
                .filter(|rw| rw.length() == file.length)
                .filter(|rw| !access.can_write() || rw.can_write())
                .cloned();
            if let Some(reader_writer) = compatible {
                slot.last_used.store(self.tick(), Ordering::Relaxed);
                tracing::trace!("reusing slot {} ({:?})", slot.id, access);
                return Some((reader_writer, guard));
            }
        }
        None
    }

    async fn open_slot(
        &self,
        entry: &Arc<FileEntry>,
        file: &TorrentFile,
        access: FileAccess,
    ) -> Result<SharedReaderWriter, StorageError> {
        let entry = Arc::clone(entry);
        let path = file.full_path.clone();
        let length = file.length;
        let mode = self.allocation_mode;

        tokio::task::spawn_blocking(move || {
            let mut handles = entry.disk.lock();
            ensure_capacity(&path, length, access, mode)?;
            handles.open(&path, length, access)
        })
        .await
        .map_err(StorageError::join)?
    }

    /// Takes back a slot whose handle never opened. A slot without a handle
    /// is never handed out, so only the bookkeeping needs undoing.
    fn discard_slot(&self, key: &Path, entry: &Arc<FileEntry>, slot: &Arc<HandleSlot>) {
        let mut registry = self.registry.lock();

        let removed = {
            let mut slots = entry.slots.lock();
            let before = slots.len();
            slots.retain(|s| !Arc::ptr_eq(s, slot));
            slots.len() < before
        };
        // Eviction may already have taken it out of the count.
        if removed {
            registry.open_handles -= 1;
        }
        // Whoever holds the file lock (close, move) still owns the entry.
        if let Ok(_guard) = entry.lock.try_lock() {
            registry.remove_if_empty(key, entry);
        }
    }

    /// Evicts least recently used slots until the open count fits the limit.
    fn evict_over_capacity(&self, registry: &mut Registry) {
        let maximum = self.limiter.capacity();
        if maximum == 0 {
            return;
        }

        while registry.open_handles > maximum {
            let Some((key, entry, victim)) = registry.oldest_slot() else {
                break;
            };

            entry.slots.lock().retain(|s| !Arc::ptr_eq(s, &victim));
            registry.open_handles -= 1;
            let emptied = registry.remove_if_empty(&key, &entry);

            tracing::debug!("evicting slot {} of {}", victim.id, key.display());
            dispose_later(victim, emptied.then_some(entry));
        }
    }

    /// Takes every slot out of `entry`, waits for each to go idle and
    /// disposes it. Returns the number of slots closed.
    async fn close_slots(&self, entry: &FileEntry) -> usize {
        let slots = {
            let mut registry = self.registry.lock();
            let slots = std::mem::take(&mut *entry.slots.lock());
            registry.open_handles -= slots.len();
            slots
        };

        for slot in &slots {
            let mut io = slot.io.lock().await;
            if let Some(reader_writer) = io.take() {
                reader_writer.dispose();
            }
        }
        slots.len()
    }

    #[cfg(test)]
    fn slot_ids(&self, file: &TorrentFile) -> Vec<u64> {
        self.registry
            .lock()
            .files
            .get(&file.full_path)
            .map(|e| e.slots.lock().iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    /// Slots of `file` that are idle and hold an open handle.
    #[cfg(test)]
    fn usable_slots(&self, file: &TorrentFile) -> usize {
        self.registry
            .lock()
            .files
            .get(&file.full_path)
            .map(|e| {
                e.slots
                    .lock()
                    .iter()
                    .filter(|s| s.io.try_lock().is_ok_and(|io| io.is_some()))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for HandleCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OPEN_FILES)
    }
}

/// Disposes an evicted slot once any operation still holding it finishes.
fn dispose_later(slot: Arc<HandleSlot>, emptied: Option<Arc<FileEntry>>) {
    tokio::spawn(async move {
        let mut io = slot.io.lock().await;
        if let Some(reader_writer) = io.take() {
            reader_writer.dispose();
        }
        drop(io);

        if let Some(entry) = emptied {
            entry.release_handles();
        }
    });
}

fn move_on_disk(source: &Path, destination: &Path, overwrite: bool) -> io::Result<()> {
    if !source.try_exists()? {
        return Ok(());
    }

    if destination.try_exists()? {
        if !overwrite {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", destination.display()),
            ));
        }
        fs::remove_file(destination)?;
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(source, destination)
}
