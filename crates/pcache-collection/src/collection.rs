#![forbid(unsafe_code)]

use std::{fmt, num::NonZeroUsize};

use lru::LruCache;
use pcache_backend::{
    AccessRights, Backend, BackendResult, BackendType, Entry, EntryMetadata, LogBackend,
    PersistentCache,
};
use pcache_params::BackendParamsManager;
use pcache_platform::SequenceChecker;
use tracing::{debug, trace, warn};

use crate::{
    error::{CacheError, CacheResult},
    options::DEFAULT_CACHE_CAPACITY,
};

/// Open persistent caches keyed by cache id, bounded by an in-memory LRU.
///
/// ## Normative
/// - Same `cache_id` resolves to the same on-disk cache for the lifetime of
///   the files; instances are opened lazily on first use.
/// - At most `capacity` instances are open at once. Evicting one only closes
///   its handles; its data stays on disk and is reopened on next use.
/// - All calls happen on one sequence, like the [`BackendParamsManager`] it owns.
pub struct PersistentCacheCollection<B: Backend = LogBackend> {
    manager: BackendParamsManager,
    backend: B,
    backend_type: BackendType,
    caches: LruCache<String, B::Cache>,
    sequence: SequenceChecker,
}

impl PersistentCacheCollection<LogBackend> {
    /// Collection over the file-log engine with the default capacity.
    pub fn new(manager: BackendParamsManager) -> Self {
        Self::with_backend(manager, LogBackend, DEFAULT_CACHE_CAPACITY)
    }
}

impl<B: Backend> PersistentCacheCollection<B> {
    pub fn with_backend(manager: BackendParamsManager, backend: B, capacity: NonZeroUsize) -> Self {
        Self::from_parts(manager, backend, BackendType::default(), capacity)
    }

    pub(crate) fn from_parts(
        manager: BackendParamsManager,
        backend: B,
        backend_type: BackendType,
        capacity: NonZeroUsize,
    ) -> Self {
        debug!(%backend_type, capacity = capacity.get(), "cache collection created");
        Self {
            manager,
            backend,
            backend_type,
            caches: LruCache::new(capacity),
            sequence: SequenceChecker::new(),
        }
    }

    /// Look up `key` in the cache named `cache_id`.
    ///
    /// Failures to open or read the cache are logged and reported as a miss.
    pub fn find(&mut self, cache_id: &str, key: &str) -> Option<Entry> {
        self.sequence.check();
        match self.with_cache(cache_id, |cache| cache.find(key)) {
            Ok(Some(entry)) => {
                trace!(cache_id, key, size = entry.content_size(), "hit");
                Some(entry)
            }
            Ok(None) => {
                trace!(cache_id, key, "miss");
                None
            }
            Err(e) => {
                warn!(cache_id, key, error = %e, "lookup failed, treating as miss");
                None
            }
        }
    }

    /// Store `content` under `key` in the cache named `cache_id`, replacing
    /// any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] when the cache cannot be opened or
    /// the engine rejects the write.
    pub fn insert(
        &mut self,
        cache_id: &str,
        key: &str,
        content: &[u8],
        metadata: EntryMetadata,
    ) -> CacheResult<()> {
        self.sequence.check();
        self.with_cache(cache_id, |cache| cache.insert(key, content, metadata))?;
        trace!(cache_id, key, size = content.len(), "stored");
        Ok(())
    }

    /// Close every open instance. Files are left untouched.
    pub fn clear_for_testing(&mut self) {
        self.sequence.check();
        self.caches.clear();
    }

    /// Close every open instance and delete all backend files.
    pub fn delete_all_files(&mut self) {
        self.sequence.check();
        self.caches.clear();
        self.manager.delete_all_files();
    }

    /// Close every open instance and trim the files down to `target` bytes.
    ///
    /// Returns the number of bytes freed.
    pub fn bring_down_total_footprint_of_files(&mut self, target: u64) -> u64 {
        self.sequence.check();
        self.caches.clear();
        self.manager.bring_down_total_footprint_of_files(target)
    }

    /// Number of open instances.
    pub fn len(&self) -> usize {
        self.sequence.check();
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.check();
        self.caches.is_empty()
    }

    /// Whether an instance for `cache_id` is currently open.
    pub fn contains(&self, cache_id: &str) -> bool {
        self.sequence.check();
        self.caches.contains(cache_id)
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.sequence.check();
        self.caches.cap()
    }

    pub fn backend_type(&self) -> BackendType {
        self.sequence.check();
        self.backend_type
    }

    pub fn manager(&self) -> &BackendParamsManager {
        self.sequence.check();
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut BackendParamsManager {
        self.sequence.check();
        &mut self.manager
    }

    /// Forget the owning thread; the next caller becomes the owner.
    pub fn detach_from_sequence(&mut self) {
        self.sequence.detach();
        self.manager.detach_from_sequence();
    }

    /// Run `op` against the instance for `cache_id`, opening it on a miss.
    ///
    /// A freshly opened instance joins the LRU even if `op` fails, since
    /// the failure belongs to the operation and not to the instance.
    fn with_cache<R>(
        &mut self,
        cache_id: &str,
        op: impl FnOnce(&mut B::Cache) -> BackendResult<R>,
    ) -> CacheResult<R> {
        if let Some(cache) = self.caches.get_mut(cache_id) {
            return op(cache).map_err(|e| CacheError::backend(cache_id, e));
        }

        let params =
            self.manager
                .get_or_create_params_sync(self.backend_type, cache_id, AccessRights::ReadWrite);
        let mut cache = self
            .backend
            .open(params)
            .map_err(|e| CacheError::backend(cache_id, e))?;
        debug!(cache_id, "opened cache");

        let result = op(&mut cache);
        if let Some((evicted, _)) = self.caches.push(cache_id.to_owned(), cache) {
            debug!(cache_id = %evicted, "closed least recently used cache");
        }
        result.map_err(|e| CacheError::backend(cache_id, e))
    }
}

impl<B: Backend> fmt::Debug for PersistentCacheCollection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentCacheCollection")
            .field("backend_type", &self.backend_type)
            .field("open", &self.caches.len())
            .field("capacity", &self.caches.cap())
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
