#![forbid(unsafe_code)]

use pcache_backend::BackendError;
use thiserror::Error;

/// Collection errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache `{cache_id}`: {source}")]
    Backend {
        cache_id: String,
        #[source]
        source: BackendError,
    },
}

impl CacheError {
    pub(crate) fn backend(cache_id: &str, source: BackendError) -> Self {
        Self::Backend {
            cache_id: cache_id.to_owned(),
            source,
        }
    }

    /// Id of the cache the failure belongs to.
    pub fn cache_id(&self) -> &str {
        match self {
            Self::Backend { cache_id, .. } => cache_id,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
