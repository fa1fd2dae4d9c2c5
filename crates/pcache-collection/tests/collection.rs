#![forbid(unsafe_code)]

use std::{io, num::NonZeroUsize, path::PathBuf, sync::Arc, time::Duration};

use parking_lot::Mutex;
use pcache_backend::{
    Backend, BackendError, BackendParams, BackendResult, BackendType, EntryMetadata, LogBackend,
    LogCache,
};
use pcache_collection::{
    CacheError, CollectionBuilder, CollectionOptions, PersistentCacheCollection,
};
use pcache_params::BackendParamsManager;
use pcache_test_utils::{file_count, total_size, tracing_setup};
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn temp_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}

fn collection(temp_dir: &TempDir) -> PersistentCacheCollection {
    PersistentCacheCollection::new(BackendParamsManager::new(temp_dir.path()))
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// Log engine that records every open.
#[derive(Clone, Default)]
struct CountingBackend {
    opened: Arc<Mutex<Vec<PathBuf>>>,
}

impl CountingBackend {
    fn opens(&self) -> usize {
        self.opened.lock().len()
    }
}

impl Backend for CountingBackend {
    type Cache = LogCache;

    fn open(&self, params: BackendParams) -> BackendResult<LogCache> {
        self.opened.lock().push(params.db_path().to_owned());
        LogBackend.open(params)
    }
}

/// Engine whose open always fails.
struct BrokenBackend;

impl Backend for BrokenBackend {
    type Cache = LogCache;

    fn open(&self, _params: BackendParams) -> BackendResult<LogCache> {
        Err(BackendError::Io(io::Error::other("engine unavailable")))
    }
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn insert_then_find(temp_dir: TempDir) {
    tracing_setup();
    let mut caches = collection(&temp_dir);
    let metadata = EntryMetadata::with_input_signature(17);

    caches.insert("shaders", "main.vert", b"compiled", metadata).unwrap();
    let entry = caches.find("shaders", "main.vert").unwrap();

    assert_eq!(entry.content(), b"compiled");
    assert_eq!(entry.metadata().input_signature, 17);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn unknown_cache_or_key_is_a_miss(temp_dir: TempDir) {
    let mut caches = collection(&temp_dir);
    assert!(caches.find("never-written", "k").is_none());

    caches.insert("c", "k", b"v", EntryMetadata::default()).unwrap();
    assert!(caches.find("c", "other").is_none());
    assert!(caches.find("other", "k").is_none());
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn reinsert_overwrites(temp_dir: TempDir) {
    let mut caches = collection(&temp_dir);
    caches.insert("c", "k", b"old", EntryMetadata::with_input_signature(1)).unwrap();
    caches.insert("c", "k", b"new", EntryMetadata::with_input_signature(2)).unwrap();

    let entry = caches.find("c", "k").unwrap();
    assert_eq!(entry.content(), b"new");
    assert_eq!(entry.metadata().input_signature, 2);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn caches_are_isolated_by_id(temp_dir: TempDir) {
    let mut caches = collection(&temp_dir);
    caches.insert("a", "k", b"from a", EntryMetadata::default()).unwrap();
    caches.insert("b", "k", b"from b", EntryMetadata::default()).unwrap();

    assert_eq!(caches.find("a", "k").unwrap().content(), b"from a");
    assert_eq!(caches.find("b", "k").unwrap().content(), b"from b");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn entries_survive_clear_and_restart(temp_dir: TempDir) {
    {
        let mut caches = collection(&temp_dir);
        caches.insert("c", "k", b"durable", EntryMetadata::default()).unwrap();
        caches.clear_for_testing();
        assert!(caches.is_empty());
        assert_eq!(caches.find("c", "k").unwrap().content(), b"durable");
    }

    let mut caches = collection(&temp_dir);
    assert_eq!(caches.find("c", "k").unwrap().content(), b"durable");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn open_instances_are_bounded(temp_dir: TempDir) {
    let mut caches = PersistentCacheCollection::with_backend(
        BackendParamsManager::new(temp_dir.path()),
        LogBackend,
        capacity(2),
    );

    for id in ["a", "b", "c"] {
        caches.insert(id, "k", id.as_bytes(), EntryMetadata::default()).unwrap();
    }
    assert_eq!(caches.len(), 2);
    assert!(!caches.contains("a"));
    assert!(caches.contains("b") && caches.contains("c"));

    assert_eq!(caches.find("a", "k").unwrap().content(), b"a");
    assert!(caches.contains("a"));
    assert!(!caches.contains("b"), "b became the least recently used");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn instances_are_opened_once_while_resident(temp_dir: TempDir) {
    let backend = CountingBackend::default();
    let mut caches = CollectionBuilder::new()
        .root_dir(temp_dir.path())
        .backend(backend.clone())
        .build();

    caches.insert("c", "k1", b"1", EntryMetadata::default()).unwrap();
    caches.insert("c", "k2", b"2", EntryMetadata::default()).unwrap();
    assert!(caches.find("c", "k1").is_some());
    assert_eq!(backend.opens(), 1);

    caches.clear_for_testing();
    assert!(caches.find("c", "k2").is_some());
    assert_eq!(backend.opens(), 2);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn broken_engine_fails_insert_and_misses_find(temp_dir: TempDir) {
    let mut caches = CollectionBuilder::new()
        .root_dir(temp_dir.path())
        .backend(BrokenBackend)
        .build();

    let err = caches
        .insert("c", "k", b"v", EntryMetadata::default())
        .unwrap_err();
    assert_eq!(err.cache_id(), "c");
    assert!(matches!(
        err,
        CacheError::Backend {
            source: BackendError::Io(_),
            ..
        }
    ));
    assert!(caches.find("c", "k").is_none());
    assert!(caches.is_empty());
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn unusable_root_fails_insert(temp_dir: TempDir) {
    let root = temp_dir.path().join("occupied");
    std::fs::write(&root, b"file, not dir").unwrap();
    let mut caches = CollectionBuilder::new().root_dir(&root).build();

    assert!(matches!(
        caches.insert("c", "k", b"v", EntryMetadata::default()),
        Err(CacheError::Backend {
            source: BackendError::InvalidParams,
            ..
        })
    ));
    assert!(caches.find("c", "k").is_none());
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn delete_all_files_empties_everything(temp_dir: TempDir) {
    let mut caches = collection(&temp_dir);
    for id in ["a", "b", "c"] {
        caches.insert(id, "k", b"v", EntryMetadata::default()).unwrap();
    }
    assert!(file_count(temp_dir.path()) > 0);

    caches.delete_all_files();
    assert_eq!(file_count(temp_dir.path()), 0);
    assert!(caches.is_empty());
    assert!(caches.find("a", "k").is_none());

    caches.insert("a", "k", b"again", EntryMetadata::default()).unwrap();
    assert_eq!(caches.find("a", "k").unwrap().content(), b"again");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn footprint_is_brought_under_budget(temp_dir: TempDir) {
    const TARGET: u64 = 20_000;
    let mut caches = collection(&temp_dir);
    let content = vec![0xAB; usize::try_from(TARGET / 10 + 100).unwrap()];
    for i in 0..10 {
        caches
            .insert(&format!("cache-{i}"), "blob", &content, EntryMetadata::default())
            .unwrap();
    }
    assert!(total_size(temp_dir.path()) > TARGET);

    let freed = caches.bring_down_total_footprint_of_files(TARGET);
    assert!(freed > 0);
    assert!(total_size(temp_dir.path()) <= TARGET);
    assert!(caches.is_empty());

    let survivors = (0..10)
        .filter(|i| caches.find(&format!("cache-{i}"), "blob").is_some())
        .count();
    assert!(survivors > 0 && survivors < 10);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
fn builder_applies_options(temp_dir: TempDir) {
    let caches = CollectionBuilder::new()
        .options(
            CollectionOptions::new(temp_dir.path())
                .with_cache_capacity(capacity(3))
                .with_params_capacity(capacity(5)),
        )
        .backend_type(BackendType::Log)
        .build();

    assert_eq!(caches.capacity(), capacity(3));
    assert_eq!(caches.backend_type(), BackendType::Log);
    assert_eq!(caches.manager().root_dir(), temp_dir.path());
}

#[rstest]
#[cfg(debug_assertions)]
#[timeout(Duration::from_secs(5))]
fn read_only_accessors_check_the_sequence(temp_dir: TempDir) {
    let caches = collection(&temp_dir);
    let joined = std::thread::spawn(move || caches.contains("c")).join();
    assert!(joined.is_err());
}
