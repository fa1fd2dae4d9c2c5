#![forbid(unsafe_code)]

//! # pcache
//!
//! Facade crate for disk-backed persistent caches.
//!
//! ## Quick start
//!
//! ```no_run
//! use pcache::prelude::*;
//!
//! let mut caches = CollectionBuilder::new().root_dir("/path/to/cache").build();
//! caches.insert("shaders", "main.vert", b"compiled", EntryMetadata::with_input_signature(7))?;
//! let entry = caches.find("shaders", "main.vert");
//!
//! // Keep the directory under 64 MiB, evicting least recently used caches.
//! caches.bring_down_total_footprint_of_files(64 << 20);
//! # Ok::<(), pcache::collection::CacheError>(())
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod backend {
    pub use pcache_backend::*;
}

pub mod params {
    pub use pcache_params::*;
}

pub mod collection {
    pub use pcache_collection::*;
}

pub mod platform {
    pub use pcache_platform::*;
}

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use pcache_backend::{
        AccessRights, Backend, BackendParams, BackendType, Entry, EntryMetadata, LogBackend,
        PersistentCache,
    };
    pub use pcache_collection::{
        CacheError, CacheResult, CollectionBuilder, CollectionOptions, PersistentCacheCollection,
    };
    pub use pcache_params::{BackendParamsManager, ManagerOptions};
    pub use pcache_platform::ThreadPool;
}
