#![forbid(unsafe_code)]

//! On-disk naming of backend files.
//!
//! Every (backend type, cache id) pair maps to one data file and one journal
//! file directly under the root:
//!
//! ```text
//! <root>/<type-tag>-<hex(sha256(cache_id))[..32]>.<db-ext>
//! <root>/<type-tag>-<hex(sha256(cache_id))[..32]>.<journal-ext>
//! ```
//!
//! The mapping is a pure function of its inputs, so it is stable across
//! restarts and never needs an index.

use std::path::{Path, PathBuf};

use pcache_backend::BackendType;
use sha2::{Digest, Sha256};

/// Hex digest of a cache id, truncated to 16 bytes.
#[must_use]
pub fn cache_id_digest(cache_id: &str) -> String {
    let hash = Sha256::digest(cache_id.as_bytes());
    hex::encode(&hash[..16])
}

/// File-name stem shared by the data and journal files of one cache.
#[must_use]
pub fn file_stem(backend_type: BackendType, cache_id: &str) -> String {
    format!("{}-{}", backend_type.tag(), cache_id_digest(cache_id))
}

/// Path resolver rooted at the cache directory.
#[derive(Clone, Debug)]
pub struct FileLayout {
    root: PathBuf,
}

impl FileLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn db_path(&self, backend_type: BackendType, cache_id: &str) -> PathBuf {
        self.root.join(format!(
            "{}.{}",
            file_stem(backend_type, cache_id),
            backend_type.db_extension()
        ))
    }

    #[must_use]
    pub fn journal_path(&self, backend_type: BackendType, cache_id: &str) -> PathBuf {
        self.root.join(format!(
            "{}.{}",
            file_stem(backend_type, cache_id),
            backend_type.journal_extension()
        ))
    }

    /// Which backend type wrote `path`, if any.
    ///
    /// Only direct children of the root with a known `<tag>-` prefix and a
    /// matching extension qualify.
    #[must_use]
    pub fn classify(&self, path: &Path) -> Option<BackendType> {
        if path.parent()? != self.root.as_path() {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let ext = path.extension()?.to_str()?;
        BackendType::ALL.into_iter().find(|ty| {
            ty.owns_extension(ext)
                && stem
                    .strip_prefix(ty.tag())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .is_some_and(|digest| {
                        digest.len() == 32 && digest.bytes().all(|b| b.is_ascii_hexdigit())
                    })
        })
    }
}
