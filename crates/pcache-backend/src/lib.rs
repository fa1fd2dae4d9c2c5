#![forbid(unsafe_code)]

//! `pcache-backend`
//!
//! Value types and the storage-engine seam for pcache:
//! - [`BackendParams`]: the two open file handles (data + journal) one engine runs on,
//! - [`Entry`] / [`EntryMetadata`]: a stored record,
//! - [`Backend`] / [`PersistentCache`]: the capability the collection opens and queries,
//! - [`LogBackend`]: the default engine, an append-only record log with a redo journal.
//!
//! The engine does not choose file names or manage disk usage; that belongs to
//! the params manager.

mod cache;
mod entry;
mod error;
mod frame;
mod log_cache;
mod params;

pub use cache::{Backend, PersistentCache};
pub use entry::{Entry, EntryMetadata};
pub use error::{BackendError, BackendResult};
pub use log_cache::{COMPACT_MIN_DEAD, LogBackend, LogCache};
pub use params::{AccessRights, BackendParams, BackendType};
