#![forbid(unsafe_code)]

use crate::{BackendParams, BackendResult, Entry, EntryMetadata};

/// One opened backend bound to one [`BackendParams`].
///
/// A durable mapping `key -> (content, metadata)`. Inserting an existing key
/// replaces its value.
pub trait PersistentCache: Send + 'static {
    /// Look up `key`. `Ok(None)` is a miss.
    fn find(&mut self, key: &str) -> BackendResult<Option<Entry>>;

    /// Store `content` under `key`, replacing any previous value.
    fn insert(&mut self, key: &str, content: &[u8], metadata: EntryMetadata) -> BackendResult<()>;
}

/// Capability that opens [`PersistentCache`] instances.
///
/// Callers hold a `Backend` instead of naming a concrete engine, so the
/// storage format can be swapped (or wrapped in tests) without touching
/// the manager or the collection.
pub trait Backend: Send + 'static {
    type Cache: PersistentCache;

    /// Bind an engine instance to `params`.
    ///
    /// # Errors
    ///
    /// Fails when `params` is not valid or the files cannot be recovered.
    fn open(&self, params: BackendParams) -> BackendResult<Self::Cache>;
}
