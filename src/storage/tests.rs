use super::*;
use crate::metainfo::{FileSpec, TorrentFile, TorrentInfo, TorrentLayout};
use rand::Rng;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn single_file_info(temp: &TempDir, piece_length: u64, file_size: u64) -> Arc<TorrentInfo> {
    Arc::new(
        TorrentInfo::new(
            TorrentLayout::Legacy,
            piece_length,
            temp.path(),
            vec![FileSpec::new("test.dat", file_size)],
        )
        .expect("test layout"),
    )
}

fn create_test_storage(temp: &TempDir, piece_length: u64, file_size: u64) -> TorrentStorage {
    TorrentStorage::new(
        single_file_info(temp, piece_length, file_size),
        Arc::new(HandleCache::default()),
    )
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[tokio::test]
async fn test_preallocate() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 16384, 65536);

    storage.preallocate().await.unwrap();

    let path = temp.path().join("test.dat");
    let metadata = tokio::fs::metadata(&path).await.unwrap();
    assert_eq!(metadata.len(), 65536);
}

#[tokio::test]
async fn test_write_and_read_piece() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 16384, 32768);

    let data = pattern(16384);
    storage.write_piece(0, &data).await.unwrap();

    let read_data = storage.read_piece(0).await.unwrap();
    assert_eq!(read_data.as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_write_and_read_block() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 32768, 65536);

    let block_data = pattern(16384);

    storage.write_block(0, 0, &block_data).await.unwrap();
    storage.write_block(0, 16384, &block_data).await.unwrap();

    let read_block = storage.read_block(0, 0, 16384).await.unwrap();
    assert_eq!(read_block.as_ref(), block_data.as_slice());

    let read_block2 = storage.read_block(0, 16384, 16384).await.unwrap();
    assert_eq!(read_block2.as_ref(), block_data.as_slice());
}

#[tokio::test]
async fn test_multifile_storage() {
    let temp = TempDir::new().unwrap();
    let info = TorrentInfo::new(
        TorrentLayout::Legacy,
        16384,
        temp.path(),
        vec![
            FileSpec::new("file1.dat", 10000),
            FileSpec::new("file2.dat", 10000),
        ],
    )
    .unwrap();
    let storage = TorrentStorage::new(Arc::new(info), Arc::new(HandleCache::new(4)));

    let data = pattern(16384);
    storage.write_piece(0, &data).await.unwrap();

    let read_data = storage.read_piece(0).await.unwrap();
    assert_eq!(read_data.as_ref(), data.as_slice());

    let second = std::fs::read(temp.path().join("file2.dat")).unwrap();
    assert_eq!(second.len(), 10000);
    assert_eq!(&second[..6384], &data[10000..]);
    assert_eq!(storage.cache().open_files(), 2);
}

#[tokio::test]
async fn test_modern_layout_pieces_stay_in_one_file() {
    let temp = TempDir::new().unwrap();
    let info = TorrentInfo::new(
        TorrentLayout::Modern,
        8,
        temp.path(),
        vec![FileSpec::new("a.bin", 10), FileSpec::new("b.bin", 5)],
    )
    .unwrap();
    let storage = TorrentStorage::new(Arc::new(info), Arc::new(HandleCache::new(4)));

    storage.write_piece(1, b"xy").await.unwrap();
    storage.write_piece(2, b"hello").await.unwrap();

    assert_eq!(storage.read_block(2, 1, 3).await.unwrap().as_ref(), b"ell");
    let a = std::fs::read(temp.path().join("a.bin")).unwrap();
    assert_eq!(&a[8..], b"xy");
}

#[tokio::test]
async fn test_padding_files_are_not_stored() {
    let temp = TempDir::new().unwrap();
    let info = TorrentInfo::new(
        TorrentLayout::Hybrid,
        16,
        temp.path(),
        vec![
            FileSpec::new("a.bin", 10),
            FileSpec::padding(".pad/6", 6),
            FileSpec::new("b.bin", 16),
        ],
    )
    .unwrap();
    let storage = TorrentStorage::new(Arc::new(info), Arc::new(HandleCache::new(4)));

    storage.write_piece(0, &[0xAA; 16]).await.unwrap();

    assert!(!temp.path().join(".pad").exists());
    let piece = storage.read_piece(0).await.unwrap();
    assert_eq!(&piece[..10], &[0xAA; 10]);
    assert_eq!(&piece[10..], &[0u8; 6]);
}

#[tokio::test]
async fn test_invalid_piece_index() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 16384, 32768);

    let result = storage.read_piece(999).await;
    assert!(result.unwrap_err().is_out_of_range());
}

#[tokio::test]
async fn test_invalid_block_offset() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 16384, 32768);

    let result = storage.read_block(0, 20000, 1000).await;
    assert!(matches!(
        result,
        Err(StorageError::InvalidBlockOffset { piece: 0, offset: 20000, .. })
    ));
}

#[tokio::test]
async fn test_write_piece_rejects_wrong_length() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 16, 20);

    let result = storage.write_piece(1, &[0u8; 16]).await;
    assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_verify_piece() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 64, 100);
    let data = pattern(64);
    storage.write_piece(0, &data).await.unwrap();

    let sha1: Vec<u8> = Sha1::digest(&data).to_vec();
    let sha256: Vec<u8> = Sha256::digest(&data).to_vec();

    assert!(storage.verify_piece(0, &sha1).await.unwrap());
    assert!(storage.verify_piece(0, &sha256).await.unwrap());
    assert!(!storage.verify_piece(0, &[0u8; 20]).await.unwrap());
    assert!(matches!(
        storage.verify_piece(0, &[0u8; 7]).await,
        Err(StorageError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_flush_and_close() {
    let temp = TempDir::new().unwrap();
    let storage = create_test_storage(&temp, 16, 32);

    storage.write_block(1, 0, b"flushed").await.unwrap();
    storage.flush().await.unwrap();
    assert_eq!(storage.cache().open_files(), 1);

    storage.close().await.unwrap();
    assert_eq!(storage.cache().open_files(), 0);

    let on_disk = std::fs::read(temp.path().join("test.dat")).unwrap();
    assert_eq!(&on_disk[16..23], b"flushed");
}

fn cache_file(temp: &TempDir, name: &str, length: u64) -> TorrentFile {
    TorrentInfo::new(
        TorrentLayout::Legacy,
        16384,
        temp.path(),
        vec![FileSpec::new(name, length)],
    )
    .unwrap()
    .files()[0]
        .clone()
}

#[tokio::test]
async fn test_round_trip_full_file() {
    let temp = TempDir::new().unwrap();
    let file = cache_file(&temp, "whole.dat", 5000);
    let cache = HandleCache::new(4);
    let data = pattern(5000);

    cache.write(&file, 0, &data).await.unwrap();
    let mut read_back = vec![0u8; 5000];
    assert_eq!(cache.read(&file, 0, &mut read_back).await.unwrap(), 5000);
    assert_eq!(read_back, data);
}

#[tokio::test]
async fn test_exists() {
    let temp = TempDir::new().unwrap();
    let file = cache_file(&temp, "maybe.dat", 10);
    let cache = HandleCache::new(4);

    assert!(!cache.exists(&file).await.unwrap());
    cache.write(&file, 0, b"1").await.unwrap();
    assert!(cache.exists(&file).await.unwrap());
}

#[tokio::test]
async fn test_write_open_truncates_oversized_file() {
    let temp = TempDir::new().unwrap();
    let file = cache_file(&temp, "shrink.dat", 8);
    std::fs::write(&file.full_path, vec![1u8; 32]).unwrap();
    let cache = HandleCache::new(4);

    let mut buf = [0u8; 8];
    cache.read(&file, 0, &mut buf).await.unwrap();
    assert_eq!(std::fs::metadata(&file.full_path).unwrap().len(), 32);

    cache.write(&file, 0, b"x").await.unwrap();
    assert_eq!(std::fs::metadata(&file.full_path).unwrap().len(), 8);
}

#[tokio::test]
async fn test_full_allocation_mode() {
    let temp = TempDir::new().unwrap();
    let file = cache_file(&temp, "full.dat", 3000);
    let cache = HandleCache::new(4).with_allocation_mode(AllocationMode::Full);

    cache.write(&file, 2999, b"z").await.unwrap();

    let data = std::fs::read(&file.full_path).unwrap();
    assert_eq!(data.len(), 3000);
    assert_eq!(data[2999], b'z');
}

#[tokio::test]
async fn test_move_without_overwrite_keeps_destination() {
    let temp = TempDir::new().unwrap();
    let file = cache_file(&temp, "source.dat", 4);
    let destination = temp.path().join("dest.dat");
    let cache = HandleCache::new(4);

    cache.write(&file, 0, b"src!").await.unwrap();
    std::fs::write(&destination, b"keep").unwrap();

    let err = cache.move_file(&file, &destination, false).await.unwrap_err();
    assert!(matches!(err, StorageError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
    assert_eq!(std::fs::read(&destination).unwrap(), b"keep");
    assert!(file.full_path.exists());
    assert_eq!(cache.open_files(), 0);
}

#[tokio::test]
async fn test_move_with_overwrite_replaces_destination() {
    let temp = TempDir::new().unwrap();
    let file = cache_file(&temp, "source.dat", 4);
    let destination = temp.path().join("nested/dir/dest.dat");
    let cache = HandleCache::new(4);

    cache.write(&file, 0, b"src!").await.unwrap();
    std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
    std::fs::write(&destination, b"old").unwrap();

    cache.move_file(&file, &destination, true).await.unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), b"src!");
    assert!(!file.full_path.exists());
    assert_eq!(cache.open_files(), 0);
}

#[tokio::test]
async fn test_move_creates_parent_and_missing_source_is_noop() {
    let temp = TempDir::new().unwrap();
    let file = cache_file(&temp, "never.dat", 4);
    let destination = temp.path().join("out/never.dat");
    let cache = HandleCache::new(4);

    cache.move_file(&file, &destination, false).await.unwrap();
    assert!(!destination.exists());

    cache.write(&file, 0, b"late").await.unwrap();
    cache.move_file(&file, &destination, false).await.unwrap();
    assert_eq!(std::fs::read(&destination).unwrap(), b"late");
}

#[tokio::test]
async fn test_close_all() {
    let temp = TempDir::new().unwrap();
    let cache = HandleCache::new(8);
    let files: Vec<_> = (0..3)
        .map(|i| cache_file(&temp, &format!("c{i}.dat"), 4))
        .collect();

    for file in &files {
        cache.write(file, 0, b"data").await.unwrap();
    }
    assert_eq!(cache.open_files(), 3);

    cache.close_all().await;
    assert_eq!(cache.open_files(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_one_serializes_files() {
    let temp = TempDir::new().unwrap();
    let cache = Arc::new(HandleCache::new(1));
    let files = Arc::new(vec![
        cache_file(&temp, "one.dat", 1024),
        cache_file(&temp, "two.dat", 1024),
    ]);

    let done = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicUsize::new(0));
    let monitor = {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        let peak = Arc::clone(&peak);
        tokio::spawn(async move {
            while !done.load(Ordering::Relaxed) {
                peak.fetch_max(cache.open_files(), Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        })
    };

    let workers: Vec<_> = (0..32)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let files = Arc::clone(&files);
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                cache.read(&files[i % 2], 64, &mut buf).await.unwrap();
            })
        })
        .collect();

    for worker in futures::future::join_all(workers).await {
        worker.unwrap();
    }
    done.store(true, Ordering::Relaxed);
    monitor.await.unwrap();

    // One ticket means one creator at a time, so the only excess ever seen
    // is its new slot before it evicts.
    assert!(peak.load(Ordering::Relaxed) <= 2);
    assert_eq!(cache.open_files(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_concurrent_acquisitions_stay_bounded() {
    let temp = TempDir::new().unwrap();
    const FILE_LEN: u64 = 4096;

    for maximum in 1..=3usize {
        let cache = Arc::new(HandleCache::new(maximum));
        let files: Arc<Vec<_>> = Arc::new(
            (0..6)
                .map(|i| cache_file(&temp, &format!("m{maximum}-{i}.dat"), FILE_LEN))
                .collect(),
        );

        let plan: Vec<(usize, bool, u64)> = {
            let mut rng = rand::rng();
            (0..96)
                .map(|_| {
                    (
                        rng.random_range(0..files.len()),
                        rng.random_bool(0.5),
                        rng.random_range(0..FILE_LEN - 16),
                    )
                })
                .collect()
        };

        let tasks: Vec<_> = plan
            .into_iter()
            .map(|(index, is_write, offset)| {
                let cache = Arc::clone(&cache);
                let files = Arc::clone(&files);
                tokio::spawn(async move {
                    let file = &files[index];
                    if is_write {
                        cache.write(file, offset, &[index as u8; 16]).await.unwrap();
                    } else {
                        let mut buf = [0u8; 16];
                        cache.read(file, offset, &mut buf).await.unwrap();
                    }
                    // Every in-flight creator may be one slot over until it evicts.
                    assert!(cache.open_files() <= 2 * maximum);
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }
        assert!(cache.open_files() <= maximum);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_block_writes_round_trip() {
    let temp = TempDir::new().unwrap();
    let piece_length = 16384u64;
    let storage = Arc::new(TorrentStorage::new(
        single_file_info(&temp, piece_length, piece_length * 8),
        Arc::new(HandleCache::new(3)),
    ));

    let writes: Vec<_> = (0..8u32)
        .map(|piece| {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move {
                let data = vec![piece as u8 + 1; piece_length as usize];
                storage.write_piece(piece, &data).await.unwrap();
            })
        })
        .collect();
    for write in futures::future::join_all(writes).await {
        write.unwrap();
    }

    for piece in 0..8u32 {
        let data = storage.read_piece(piece).await.unwrap();
        assert!(data.iter().all(|b| *b == piece as u8 + 1), "piece {piece}");
    }
    assert!(storage.cache().open_files() <= 3);
}
