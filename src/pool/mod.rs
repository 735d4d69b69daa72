//! Worker pool: N independent workers draining the [`WorkQueue`].
//!
//! # Concurrency Model
//!
//! - Each worker runs in its own Tokio task with its own cookie jar and clients
//! - Workers share only the queue, the stats counters and the target directory
//! - The pool finishes when every worker has seen the termination marker
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvest_core::pool::{WorkerConfig, WorkerPool};
//! use harvest_core::queue::{QueueItem, WorkQueue};
//! use harvest_core::session::SessionBundle;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Arc::new(WorkQueue::new());
//! let config = WorkerConfig::new("./media", "https://m.example.com/".parse()?);
//! let pool = WorkerPool::start(4, Arc::clone(&queue), &SessionBundle::default(), &config).await?;
//! queue.push(QueueItem::Terminate);
//! let report = pool.join().await;
//! println!("written: {}", report.written);
//! # Ok(())
//! # }
//! ```

mod throttle;
mod worker;

pub use throttle::{DEFAULT_FLOOR, DEFAULT_JITTER, Throttle};
pub use worker::{Worker, WorkerConfig, WorkerState};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::download::DownloadError;
use crate::queue::{QueueItem, WorkQueue};
use crate::session::SessionBundle;

/// Minimum allowed worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
pub const MAX_WORKERS: usize = 32;

/// Error type for pool construction.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid worker count.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkerCount {
        /// The rejected value.
        value: usize,
    },

    /// A worker's HTTP client could not be built.
    #[error("failed to build worker client: {source}")]
    Client {
        /// Underlying error.
        #[source]
        source: DownloadError,
    },
}

impl PoolError {
    pub(crate) fn client(source: DownloadError) -> Self {
        Self::Client { source }
    }
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    written: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    retries: AtomicUsize,
}

impl PoolStats {
    /// Returns the number of assets written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    /// Returns the number of items skipped because the file existed.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of items that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the total number of delayed asset retries.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    fn increment_written(&self) {
        self.written.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn add_retries(&self, retries: usize) {
        self.retries.fetch_add(retries, Ordering::SeqCst);
    }
}

/// Summary returned by [`WorkerPool::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    /// Assets written.
    pub written: usize,
    /// Items skipped (file already present).
    pub skipped: usize,
    /// Items that failed and were logged.
    pub failed: usize,
    /// Delayed asset retries across all workers.
    pub retries: usize,
    /// Final state of each worker that exited normally, in worker order.
    pub workers: Vec<WorkerState>,
    /// Workers whose task panicked.
    pub panicked: usize,
}

impl PoolReport {
    /// Items processed in any way.
    #[must_use]
    pub fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

/// A running set of workers.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerState>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Connects `workers` workers (each with its own copy of `bundle`) and
    /// starts them consuming `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidWorkerCount`] outside `1..=32` and
    /// [`PoolError::Client`] if a worker's clients cannot be built; in that
    /// case the workers already started are stopped and awaited first.
    #[instrument(skip(queue, bundle, config), fields(output_dir = %config.output_dir.display()))]
    pub async fn start(
        workers: usize,
        queue: Arc<WorkQueue>,
        bundle: &SessionBundle,
        config: &WorkerConfig,
    ) -> Result<Self, PoolError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(PoolError::InvalidWorkerCount { value: workers });
        }

        let stats = Arc::new(PoolStats::default());
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = match Worker::connect(id, bundle, config).await {
                Ok(worker) => worker,
                Err(e) => {
                    Self { handles, stats }.abort(&queue).await;
                    return Err(e);
                }
            };
            let queue = Arc::clone(&queue);
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(
                async move { worker.run(&queue, &stats).await }
                    .instrument(info_span!("worker", id)),
            ));
        }
        info!(workers, cookies = bundle.len(), "worker pool started");

        Ok(Self { handles, stats })
    }

    /// Queues a termination marker and waits for the started workers.
    async fn abort(self, queue: &WorkQueue) -> PoolReport {
        warn!(started = self.handles.len(), "stopping workers after failed start");
        queue.push(QueueItem::Terminate);
        self.join().await
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Returns the live counters.
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Waits for every worker to stop.
    pub async fn join(self) -> PoolReport {
        debug!(workers = self.handles.len(), "waiting for workers");
        let mut workers = Vec::with_capacity(self.handles.len());
        let mut panicked = 0;
        for handle in self.handles {
            match handle.await {
                Ok(state) => workers.push(state),
                Err(e) => {
                    warn!(error = %e, "worker task panicked");
                    panicked += 1;
                }
            }
        }

        let report = PoolReport {
            written: self.stats.written(),
            skipped: self.stats.skipped(),
            failed: self.stats.failed(),
            retries: self.stats.retries(),
            workers,
            panicked,
        };
        info!(
            written = report.written,
            skipped = report.skipped,
            failed = report.failed,
            retries = report.retries,
            "worker pool finished"
        );
        report
    }
}
