#![forbid(unsafe_code)]

use std::{num::NonZeroUsize, path::PathBuf};

use pcache_backend::{Backend, BackendType, LogBackend};
use pcache_params::{BackendParamsManager, DEFAULT_PARAMS_CAPACITY, ManagerOptions};
use pcache_platform::ThreadPool;

use crate::collection::PersistentCacheCollection;

/// Default number of cache instances kept open.
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(v) => v,
    None => unreachable!(),
};

/// Settings for a [`PersistentCacheCollection`] and the manager it owns.
#[derive(Clone, Debug)]
pub struct CollectionOptions {
    /// Directory for all backend files.
    pub root_dir: PathBuf,
    /// Open instances kept in memory.
    pub cache_capacity: NonZeroUsize,
    /// Params kept in memory by the manager.
    pub params_capacity: NonZeroUsize,
    /// Engine layout used for every cache in the collection.
    pub backend_type: BackendType,
    /// Worker pool for asynchronous params creation.
    pub pool: ThreadPool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("pcache"),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            params_capacity: DEFAULT_PARAMS_CAPACITY,
            backend_type: BackendType::default(),
            pool: ThreadPool::default(),
        }
    }
}

impl CollectionOptions {
    pub fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_params_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.params_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_backend_type(mut self, backend_type: BackendType) -> Self {
        self.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: ThreadPool) -> Self {
        self.pool = pool;
        self
    }

    /// Manager settings derived from these options.
    pub fn to_manager_options(&self) -> ManagerOptions {
        ManagerOptions::new(self.root_dir.clone())
            .with_params_capacity(self.params_capacity)
            .with_pool(self.pool.clone())
    }
}

/// Builder for [`PersistentCacheCollection`].
///
/// # Example
///
/// ```no_run
/// use std::num::NonZeroUsize;
///
/// use pcache_collection::CollectionBuilder;
///
/// let mut caches = CollectionBuilder::new()
///     .root_dir("/path/to/cache")
///     .cache_capacity(NonZeroUsize::new(8).unwrap())
///     .build();
/// assert!(caches.find("shaders", "main.vert").is_none());
/// ```
#[derive(Debug)]
pub struct CollectionBuilder<B = LogBackend> {
    options: CollectionOptions,
    backend: B,
}

impl Default for CollectionBuilder<LogBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionBuilder<LogBackend> {
    /// Builder with default options over the file-log engine.
    pub fn new() -> Self {
        Self {
            options: CollectionOptions::default(),
            backend: LogBackend,
        }
    }
}

impl<B: Backend> CollectionBuilder<B> {
    /// Replace all options at once.
    pub fn options(mut self, options: CollectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root_dir<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.options.root_dir = root.into();
        self
    }

    pub fn cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.options.cache_capacity = capacity;
        self
    }

    pub fn params_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.options.params_capacity = capacity;
        self
    }

    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.options.backend_type = backend_type;
        self
    }

    pub fn pool(mut self, pool: ThreadPool) -> Self {
        self.options.pool = pool;
        self
    }

    /// Swap the storage engine.
    pub fn backend<B2: Backend>(self, backend: B2) -> CollectionBuilder<B2> {
        CollectionBuilder {
            options: self.options,
            backend,
        }
    }

    pub fn build(self) -> PersistentCacheCollection<B> {
        let manager = BackendParamsManager::with_options(self.options.to_manager_options());
        PersistentCacheCollection::from_parts(
            manager,
            self.backend,
            self.options.backend_type,
            self.options.cache_capacity,
        )
    }
}
