//! Worker pool that runs result-code completion callbacks.
//!
//! Callbacks never run on the stack of the code that registered them once a
//! result is already settled, and never on the stack of the settling thread.
//! They are queued FIFO onto a small rayon pool, so they start in the order they
//! were queued but may run concurrently when the pool has more than one worker.
//!
//! Each provider owns one dispatcher sized by its `callback_threads` setting.

use std::sync::{Arc, OnceLock};

use tracing::{error, warn};

use crate::error::Result;

static SHARED: OnceLock<Arc<CallbackDispatcher>> = OnceLock::new();

/// Queue plus worker pool for completion callbacks.
pub struct CallbackDispatcher {
    pool: Option<rayon::ThreadPool>,
    prefix: Arc<str>,
}

impl CallbackDispatcher {
    /// Build a dispatcher with `threads` workers named `{prefix}-callback-NNNN`.
    pub fn new(prefix: &str, threads: usize) -> Result<Self> {
        let name_prefix: Arc<str> = prefix.into();
        let thread_prefix = name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{}-callback-{:04}", thread_prefix, i))
            .panic_handler(|_| {
                error!("result code callback panicked");
            })
            .build()?;
        Ok(Self {
            pool: Some(pool),
            prefix: name_prefix,
        })
    }

    /// Fallback dispatcher for codes created outside any provider, built on
    /// first use with one worker.
    ///
    /// Providers own their dispatcher; this one only serves standalone codes.
    /// Falls back to a thread per callback if the pool can't be built.
    pub fn shared() -> Arc<CallbackDispatcher> {
        SHARED
            .get_or_init(|| match Self::new("sdk_metrics", 1) {
                Ok(dispatcher) => Arc::new(dispatcher),
                Err(e) => {
                    warn!(%e, "falling back to detached callback threads");
                    Arc::new(Self {
                        pool: None,
                        prefix: "sdk_metrics".into(),
                    })
                }
            })
            .clone()
    }

    /// Queue `task` for execution on a worker.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.pool {
            Some(pool) => pool.spawn_fifo(task),
            None => {
                let spawned = std::thread::Builder::new()
                    .name(format!("{}-callback", self.prefix))
                    .spawn(task);
                if let Err(e) = spawned {
                    error!(%e, "failed to spawn callback thread");
                }
            }
        }
    }

    /// Number of worker threads, 0 when running detached.
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map(|p| p.current_num_threads())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("prefix", &self.prefix)
            .field("threads", &self.threads())
            .finish()
    }
}
