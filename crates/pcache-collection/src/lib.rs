#![forbid(unsafe_code)]

//! Named persistent caches on top of [`pcache_params::BackendParamsManager`].
//!
//! [`PersistentCacheCollection`] opens one storage engine instance per cache
//! id on demand and keeps the most recently used ones open.

mod collection;
mod error;
mod options;

pub use collection::PersistentCacheCollection;
pub use error::{CacheError, CacheResult};
pub use options::{CollectionBuilder, CollectionOptions, DEFAULT_CACHE_CAPACITY};
