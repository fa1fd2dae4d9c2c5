#![forbid(unsafe_code)]

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::{self, OpenOptions},
    io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use lru::LruCache;
use pcache_backend::{AccessRights, BackendParams, BackendType};
use pcache_platform::{SequenceChecker, ThreadPool};
use tracing::{debug, info, trace, warn};

use crate::{
    footprint::{self, TrackedFile},
    layout::FileLayout,
};

/// Default bound on the in-memory params cache.
pub const DEFAULT_PARAMS_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(v) => v,
    None => unreachable!(),
};

/// Completion callback for [`BackendParamsManager::get_params_sync_or_create_async`].
pub type ParamsCallback = Box<dyn FnOnce(BackendParams) + Send + 'static>;

/// Configuration for [`BackendParamsManager`].
#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// Directory holding every backend file.
    pub root_dir: PathBuf,
    /// Maximum number of params kept in memory.
    pub params_capacity: NonZeroUsize,
    /// Pool that runs asynchronous file creation.
    pub pool: ThreadPool,
}

impl ManagerOptions {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_params_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.params_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: ThreadPool) -> Self {
        self.pool = pool;
        self
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("pcache"),
            params_capacity: DEFAULT_PARAMS_CAPACITY,
            pool: ThreadPool::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ParamsKey {
    backend_type: BackendType,
    cache_id: String,
    rights: AccessRights,
}

impl ParamsKey {
    fn new(backend_type: BackendType, cache_id: &str, rights: AccessRights) -> Self {
        Self {
            backend_type,
            cache_id: cache_id.to_owned(),
            rights,
        }
    }
}

/// Result of one worker-side creation, sent back to the owner.
struct Reply {
    key: ParamsKey,
    generation: u64,
    params: BackendParams,
}

/// Hands out [`BackendParams`] for named caches and keeps their on-disk
/// footprint in check.
///
/// ## Normative
/// - All calls happen on one sequence (checked by [`SequenceChecker`]).
///   Use [`detach_from_sequence`](Self::detach_from_sequence) before moving
///   the manager to another thread.
/// - The same `(type, cache_id)` always maps to the same two files, across
///   calls and across restarts.
/// - Filesystem failures never panic or return errors; they are logged and
///   yield params for which [`BackendParams::is_valid`] is `false`.
/// - Every vend touches both files. Their last-modified time is the recency
///   used by [`bring_down_total_footprint_of_files`](Self::bring_down_total_footprint_of_files).
/// - Once a key has resolved to valid params, later requests for it
///   complete inline even after its params fall out of the in-memory cache.
/// - An asynchronous request for a key that has not been vended yet never
///   runs its callback before returning. The callback runs exactly once,
///   from [`run_pending_replies`](Self::run_pending_replies) or
///   [`run_until_idle`](Self::run_until_idle). Callbacks still pending when
///   the manager is dropped are dropped without running.
pub struct BackendParamsManager {
    layout: FileLayout,
    params: LruCache<ParamsKey, BackendParams>,
    /// Keys vended valid params since their files were last deleted.
    resolved: HashSet<ParamsKey>,
    pool: ThreadPool,
    in_flight: HashMap<ParamsKey, Vec<ParamsCallback>>,
    reply_tx: kanal::Sender<Reply>,
    reply_rx: kanal::Receiver<Reply>,
    /// Bumped by `delete_all_files`; replies from older generations are reopened.
    generation: u64,
    sequence: SequenceChecker,
}

impl BackendParamsManager {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self::with_options(ManagerOptions::new(root_dir))
    }

    pub fn with_options(options: ManagerOptions) -> Self {
        let ManagerOptions {
            root_dir,
            params_capacity,
            pool,
        } = options;

        if let Err(e) = fs::create_dir_all(&root_dir) {
            warn!(root = %root_dir.display(), error = %e, "cannot create cache root");
        }
        debug!(
            root = %root_dir.display(),
            capacity = params_capacity.get(),
            "params manager created"
        );

        let (reply_tx, reply_rx) = kanal::unbounded();
        Self {
            layout: FileLayout::new(root_dir),
            params: LruCache::new(params_capacity),
            resolved: HashSet::new(),
            pool,
            in_flight: HashMap::new(),
            reply_tx,
            reply_rx,
            generation: 0,
            sequence: SequenceChecker::new(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        self.sequence.check();
        self.layout.root()
    }

    /// Forget the owning thread; the next caller becomes the owner.
    pub fn detach_from_sequence(&mut self) {
        self.sequence.detach();
    }

    /// Return params for `cache_id`, creating its files on this thread if needed.
    pub fn get_or_create_params_sync(
        &mut self,
        backend_type: BackendType,
        cache_id: &str,
        rights: AccessRights,
    ) -> BackendParams {
        self.sequence.check();
        let key = ParamsKey::new(backend_type, cache_id, rights);

        if let Some(params) = self.vend_cached(&key) {
            return params;
        }

        let params = self.create_on_sequence(&key);
        self.remember(key, &params);
        params
    }

    /// Hand params for `cache_id` to `callback`.
    ///
    /// Inline if the key was resolved before; otherwise the files are
    /// created on the worker pool and `callback` runs when the reply is
    /// drained. Requests for a key already being created share that creation.
    pub fn get_params_sync_or_create_async<F>(
        &mut self,
        backend_type: BackendType,
        cache_id: &str,
        rights: AccessRights,
        callback: F,
    ) where
        F: FnOnce(BackendParams) + Send + 'static,
    {
        self.sequence.check();
        let key = ParamsKey::new(backend_type, cache_id, rights);

        if let Some(params) = self.vend_cached(&key) {
            callback(params);
            return;
        }

        if let Some(waiting) = self.in_flight.get_mut(&key) {
            trace!(cache_id, waiters = waiting.len() + 1, "joining in-flight creation");
            waiting.push(Box::new(callback));
            return;
        }

        let db_path = self.layout.db_path(backend_type, cache_id);
        let journal_path = self.layout.journal_path(backend_type, cache_id);
        let reply_tx = self.reply_tx.clone();
        let generation = self.generation;
        let reply_key = key.clone();
        self.in_flight.insert(key, vec![Box::new(callback)]);

        debug!(cache_id, %backend_type, "posting params creation");
        self.pool.spawn(move || {
            let params = create_params(db_path, journal_path, backend_type, rights);
            let reply = Reply {
                key: reply_key,
                generation,
                params,
            };
            if reply_tx.send(reply).is_err() {
                debug!("params manager gone, dropping created params");
            }
        });
    }

    /// Number of asynchronous creations whose callbacks have not run yet.
    pub fn pending_count(&self) -> usize {
        self.sequence.check();
        self.in_flight.len()
    }

    /// Run callbacks for every creation that has already finished.
    ///
    /// Never blocks. Returns how many replies were applied.
    pub fn run_pending_replies(&mut self) -> usize {
        self.sequence.check();
        let mut applied = 0;
        while let Ok(Some(reply)) = self.reply_rx.try_recv() {
            self.apply_reply(reply);
            applied += 1;
        }
        applied
    }

    /// Block until every pending asynchronous creation has run its callbacks.
    pub fn run_until_idle(&mut self) {
        self.sequence.check();
        while !self.in_flight.is_empty() {
            match self.reply_rx.recv() {
                Ok(reply) => self.apply_reply(reply),
                Err(e) => {
                    warn!(error = %e, pending = self.in_flight.len(), "reply channel closed");
                    break;
                }
            }
        }
    }

    /// Sum of the sizes of all backend files under the root.
    pub fn total_footprint(&self) -> u64 {
        self.sequence.check();
        footprint::total_size(&footprint::scan(&self.layout))
    }

    /// Delete least-recently-used caches until the footprint is at most `target` bytes.
    ///
    /// Returns the number of bytes actually freed. Files that cannot be
    /// deleted are skipped. Params whose files were deleted are forgotten so
    /// the next request re-creates them.
    pub fn bring_down_total_footprint_of_files(&mut self, target: u64) -> u64 {
        self.reduce_footprint_with(target, footprint::remove)
    }

    /// Delete every backend file under the root and forget all params.
    ///
    /// Creations already in flight still run their callbacks. Their files are
    /// reopened on this sequence first, so the handles never point at
    /// deleted files.
    pub fn delete_all_files(&mut self) {
        self.delete_all_files_with(footprint::remove);
    }

    fn reduce_footprint_with<R>(&mut self, target: u64, mut remove: R) -> u64
    where
        R: FnMut(&Path) -> io::Result<bool>,
    {
        self.sequence.check();
        let mut files = footprint::scan(&self.layout);
        let before = footprint::total_size(&files);
        if before <= target {
            trace!(total = before, target, "footprint within target");
            return 0;
        }

        let mut failed = HashSet::new();
        let mut deleted = HashSet::new();
        let mut freed = 0u64;
        loop {
            let candidates = footprint::eviction_candidates(&files, target, &failed);
            if candidates.is_empty() {
                break;
            }
            for TrackedFile { path, len, .. } in candidates {
                match remove(&path) {
                    Ok(removed) => {
                        if removed {
                            freed += len;
                        }
                        deleted.insert(path);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot evict file");
                        failed.insert(path);
                    }
                }
            }
            files.retain(|f| !deleted.contains(&f.path));
        }

        self.forget_params_for(&deleted);
        info!(
            before,
            freed,
            target,
            files = deleted.len(),
            failed = failed.len(),
            "footprint reduced"
        );
        freed
    }

    fn delete_all_files_with<R>(&mut self, mut remove: R)
    where
        R: FnMut(&Path) -> io::Result<bool>,
    {
        self.sequence.check();
        self.params.clear();
        self.resolved.clear();
        self.generation += 1;

        let mut deleted = 0usize;
        let mut failed = 0usize;
        for file in footprint::scan(&self.layout) {
            match remove(&file.path) {
                Ok(_) => deleted += 1,
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "cannot delete file");
                    failed += 1;
                }
            }
        }
        debug!(deleted, failed, "deleted all backend files");
    }

    fn vend_cached(&mut self, key: &ParamsKey) -> Option<BackendParams> {
        if let Some(params) = self.params.get(key) {
            trace!(cache_id = %key.cache_id, "params cache hit");
            footprint::touch(params.db_path());
            footprint::touch(params.journal_path());
            return Some(params.copy());
        }
        if !self.resolved.contains(key) {
            return None;
        }

        trace!(cache_id = %key.cache_id, "reopening resolved params");
        let params = self.create_on_sequence(key);
        if params.is_valid() {
            self.remember(key.clone(), &params);
        } else {
            self.resolved.remove(key);
        }
        Some(params)
    }

    fn create_on_sequence(&self, key: &ParamsKey) -> BackendParams {
        create_params(
            self.layout.db_path(key.backend_type, &key.cache_id),
            self.layout.journal_path(key.backend_type, &key.cache_id),
            key.backend_type,
            key.rights,
        )
    }

    fn remember(&mut self, key: ParamsKey, params: &BackendParams) {
        if !params.is_valid() {
            return;
        }
        self.resolved.insert(key.clone());
        if let Some((evicted, _)) = self.params.push(key, params.copy()) {
            trace!(cache_id = %evicted.cache_id, "params evicted from memory");
        }
    }

    fn forget_params_for(&mut self, deleted: &HashSet<PathBuf>) {
        let stale: Vec<ParamsKey> = self
            .params
            .iter()
            .filter(|(_, params)| {
                deleted.contains(params.db_path()) || deleted.contains(params.journal_path())
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.params.pop(&key);
        }

        let layout = &self.layout;
        self.resolved.retain(|key| {
            !deleted.contains(&layout.db_path(key.backend_type, &key.cache_id))
                && !deleted.contains(&layout.journal_path(key.backend_type, &key.cache_id))
        });
    }

    fn apply_reply(&mut self, reply: Reply) {
        let Reply {
            key,
            generation,
            params,
        } = reply;
        let callbacks = self.in_flight.remove(&key).unwrap_or_default();

        let params = if generation == self.generation {
            params
        } else {
            debug!(cache_id = %key.cache_id, "reopening params created before delete_all_files");
            drop(params);
            self.create_on_sequence(&key)
        };
        self.remember(key, &params);

        let mut params = Some(params);
        let last = callbacks.len().saturating_sub(1);
        for (i, callback) in callbacks.into_iter().enumerate() {
            let handed = if i == last {
                params.take()
            } else {
                params.as_ref().map(BackendParams::copy)
            };
            if let Some(handed) = handed {
                callback(handed);
            }
        }
    }
}

impl fmt::Debug for BackendParamsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendParamsManager")
            .field("root_dir", &self.layout.root())
            .field("cached_params", &self.params.len())
            .field("resolved", &self.resolved.len())
            .field("pending", &self.in_flight.len())
            .field("pool", &self.pool)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Drop for BackendParamsManager {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            debug!(
                pending = self.in_flight.len(),
                outstanding = self.pool.outstanding(),
                "params manager dropped with pending callbacks"
            );
        }
    }
}

/// Open-or-create both files and open handles on them.
///
/// Never fails: errors are logged and produce invalid params.
fn create_params(
    db_path: PathBuf,
    journal_path: PathBuf,
    backend_type: BackendType,
    rights: AccessRights,
) -> BackendParams {
    match open_or_create(&db_path, &journal_path, backend_type, rights) {
        Ok(params) => {
            debug!(path = %db_path.display(), %backend_type, ?rights, "backend files ready");
            params
        }
        Err(e) => {
            warn!(path = %db_path.display(), error = %e, "cannot create backend files");
            BackendParams::invalid(backend_type, db_path, journal_path)
        }
    }
}

fn open_or_create(
    db_path: &Path,
    journal_path: &Path,
    backend_type: BackendType,
    rights: AccessRights,
) -> io::Result<BackendParams> {
    if let Some(dir) = db_path.parent() {
        fs::create_dir_all(dir)?;
    }
    for path in [db_path, journal_path] {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        footprint::touch(path);
    }
    BackendParams::open(backend_type, db_path, journal_path, rights)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pcache_test_utils::{set_file_time, total_size};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    /// Three 100-byte caches, `a` oldest and `c` newest.
    fn populated(temp_dir: &TempDir) -> BackendParamsManager {
        let mut manager = BackendParamsManager::new(temp_dir.path());
        for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
            let params =
                manager.get_or_create_params_sync(BackendType::Log, id, AccessRights::ReadWrite);
            fs::write(params.db_path(), [0u8; 100]).unwrap();
            let secs = 1_000_000 + 10 * i64::try_from(i).unwrap();
            set_file_time(params.journal_path(), secs);
            set_file_time(params.db_path(), secs + 1);
        }
        manager
    }

    /// Remover that refuses to delete `stuck`.
    fn refusing(stuck: PathBuf) -> impl FnMut(&Path) -> io::Result<bool> {
        move |path| {
            if path == stuck {
                Err(io::Error::other("file is busy"))
            } else {
                footprint::remove(path)
            }
        }
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    fn reduction_continues_past_undeletable_file(temp_dir: TempDir) {
        let mut manager = populated(&temp_dir);
        let stuck = manager.layout.db_path(BackendType::Log, "a");

        let freed = manager.reduce_footprint_with(100, refusing(stuck.clone()));

        assert_eq!(freed, 200, "only confirmed deletions count");
        assert!(stuck.exists());
        for id in ["b", "c"] {
            assert!(!manager.layout.db_path(BackendType::Log, id).exists());
        }
        assert_eq!(total_size(temp_dir.path()), 100);
        assert_eq!(manager.total_footprint(), 100);
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    fn reduction_with_only_undeletable_files_frees_nothing(temp_dir: TempDir) {
        let mut manager = BackendParamsManager::new(temp_dir.path());
        let params =
            manager.get_or_create_params_sync(BackendType::Log, "a", AccessRights::ReadWrite);
        fs::write(params.db_path(), [0u8; 100]).unwrap();
        let stuck = params.db_path().to_owned();

        let freed = manager.reduce_footprint_with(0, refusing(stuck.clone()));

        assert_eq!(freed, 0);
        assert!(stuck.exists());
        assert!(!params.journal_path().exists());
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    fn delete_all_continues_past_undeletable_file(temp_dir: TempDir) {
        let mut manager = populated(&temp_dir);
        let stuck = manager.layout.db_path(BackendType::Log, "b");

        manager.delete_all_files_with(refusing(stuck.clone()));

        assert!(stuck.exists());
        assert_eq!(pcache_test_utils::file_count(temp_dir.path()), 1);
        assert!(manager.params.is_empty());
        assert!(manager.resolved.is_empty());

        let params =
            manager.get_or_create_params_sync(BackendType::Log, "a", AccessRights::ReadWrite);
        assert!(params.is_valid());
        assert!(params.db_path().exists());
    }
}
