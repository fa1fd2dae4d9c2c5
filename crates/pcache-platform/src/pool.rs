//! Worker pool for out-of-line file work.
//!
//! Backend file creation is posted here so the owning sequence never blocks
//! on the filesystem. The pool counts tasks that are queued or running,
//! which the params manager reports when it is dropped with work in flight.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing::trace;

/// Shared pool for blocking filesystem work.
///
/// Either the process-wide rayon pool or a dedicated one named
/// `pcache-worker-<n>`. Clones post to the same threads and share the
/// task counter.
///
/// # Example
///
/// ```
/// use pcache_platform::ThreadPool;
///
/// let pool = ThreadPool::with_num_threads(1).unwrap();
/// let (tx, rx) = std::sync::mpsc::channel();
/// pool.spawn(move || {
///     let _ = tx.send(7);
/// });
/// assert_eq!(rx.recv().unwrap(), 7);
/// ```
#[derive(Clone, Default)]
pub struct ThreadPool {
    dedicated: Option<Arc<rayon::ThreadPool>>,
    outstanding: Arc<AtomicUsize>,
}

/// Decrements the task counter when a task finishes.
struct TaskGuard(Arc<AtomicUsize>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ThreadPool {
    /// Post to the process-wide rayon pool.
    #[must_use]
    pub fn global() -> Self {
        Self::default()
    }

    /// Start a dedicated pool with `n` threads.
    ///
    /// # Errors
    ///
    /// Returns an error if rayon cannot start the threads.
    pub fn with_num_threads(n: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("pcache-worker-{i}"))
            .build()?;
        Ok(Self {
            dedicated: Some(Arc::new(pool)),
            outstanding: Arc::default(),
        })
    }

    /// Whether tasks run on threads owned by this pool.
    pub fn is_dedicated(&self) -> bool {
        self.dedicated.is_some()
    }

    /// Tasks posted through this pool (or its clones) that have not finished.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Post a closure (fire-and-forget).
    ///
    /// Results travel back through whatever channel the closure captures.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let queued = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(dedicated = self.is_dedicated(), queued, "posting file task");

        let guard = TaskGuard(Arc::clone(&self.outstanding));
        let task = move || {
            let _guard = guard;
            f();
        };
        match self.dedicated {
            Some(ref pool) => pool.spawn(task),
            None => rayon::spawn(task),
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ThreadPool");
        match self.dedicated {
            Some(ref pool) => s.field("threads", &pool.current_num_threads()),
            None => s.field("threads", &"global"),
        };
        s.field("outstanding", &self.outstanding()).finish()
    }
}
