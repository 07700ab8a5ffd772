//! Explicit options threaded through readers, writers and statistics.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, warn};

/// Lazily built rayon pool shared by every clone of the [`CodecOptions`]
/// that owns it.
///
/// The pool is built on first use and rebuilt only when the requested size
/// changes. Two handles always compare equal.
#[derive(Clone, Default)]
pub struct WorkerPool(Arc<Mutex<Option<(usize, Arc<ThreadPool>)>>>);

impl WorkerPool {
    pub(crate) fn get(&self, threads: usize) -> Result<Arc<ThreadPool>, ThreadPoolBuildError> {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((size, pool)) = slot.as_ref() {
            if *size == threads {
                return Ok(Arc::clone(pool));
            }
        }
        let pool = Arc::new(ThreadPoolBuilder::new().num_threads(threads).build()?);
        debug!(threads, "built worker pool");
        *slot = Some((threads, Arc::clone(&pool)));
        Ok(pool)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let built = self
            .0
            .lock()
            .map(|slot| slot.as_ref().map(|(size, _)| *size))
            .unwrap_or(None);
        f.debug_tuple("WorkerPool").field(&built).finish()
    }
}

impl PartialEq for WorkerPool {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for WorkerPool {}

/// Behaviour switches for the codec. There is no global state: callers pass
/// an instance (usually `CodecOptions::default()`) into each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    /// Decode, encode and compute statistics across rayon workers.
    pub parallel: bool,
    /// Size of a dedicated worker pool; `None` uses rayon's global pool.
    pub threads: Option<usize>,
    /// Keep every header card when reading. When `false` only structural
    /// keywords (plus EXTNAME) are kept.
    pub populate_nonessential: bool,
    /// Skip malformed header cards instead of failing the read.
    pub skip_malformed_cards: bool,
    /// Log a warning when an edit touches a reserved keyword.
    pub warn_on_restricted: bool,
    /// Pool used when `threads` is set.
    pub pool: WorkerPool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        CodecOptions {
            parallel: true,
            threads: None,
            populate_nonessential: true,
            skip_malformed_cards: false,
            warn_on_restricted: true,
            pool: WorkerPool::default(),
        }
    }
}

impl CodecOptions {
    /// Options for strictly single-threaded operation.
    pub fn serial() -> Self {
        CodecOptions {
            parallel: false,
            ..CodecOptions::default()
        }
    }

    /// Run `op` inside the configured worker pool.
    pub(crate) fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match self.threads {
            Some(n) if self.parallel => {
                match self.pool.get(n) {
                    Ok(pool) => pool.install(op),
                    Err(e) => {
                        warn!("falling back to the global rayon pool: {e}");
                        op()
                    }
                }
            }
            _ => op(),
        }
    }
}
