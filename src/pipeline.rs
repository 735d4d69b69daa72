//! End-to-end run: authenticate, start the pool, enumerate, terminate, join.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

use crate::enumerator::{
    AuthError, Credentials, EnumerationSummary, PageEnumerator, enumerate_into,
};
use crate::pool::{PoolError, PoolReport, WorkerConfig, WorkerPool};
use crate::queue::WorkQueue;
use crate::session::SessionBundle;

/// Errors that abort a run before or while the pool starts.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The destination directory is missing or not a directory.
    #[error("output directory does not exist: {path}")]
    MissingDirectory {
        /// The configured path.
        path: PathBuf,
    },

    /// Authentication failed; nothing was enumerated.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The worker pool could not be started.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Where the session comes from.
#[derive(Debug, Clone)]
pub enum SessionSource {
    /// Sign in through the enumerator.
    Login(Credentials),
    /// Use a previously exported session.
    Bundle(SessionBundle),
}

/// Run configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of workers.
    pub workers: usize,
    /// Pagination cursor to start from.
    pub start_offset: usize,
    /// Per-worker settings; its retry policy and throttle also drive enumeration.
    pub worker: WorkerConfig,
}

impl PipelineConfig {
    /// Creates a single-worker configuration starting at offset 0.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, root_url: Url) -> Self {
        Self {
            workers: 1,
            start_offset: 0,
            worker: WorkerConfig::new(output_dir, root_url),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// How enumeration ended.
    pub enumeration: EnumerationSummary,
    /// What the workers did.
    pub pool: PoolReport,
}

/// Runs the whole harvest.
///
/// Cancelling `cancel` stops pagination and queues the termination marker at
/// once; items already queued are still processed.
///
/// # Errors
///
/// Returns [`PipelineError::MissingDirectory`] before any request is made,
/// [`PipelineError::Auth`] if sign-in fails and [`PipelineError::Pool`] if
/// the workers cannot be started. Per-item failures are logged and counted
/// in the report instead.
#[instrument(skip_all, fields(output_dir = %config.worker.output_dir.display(), workers = config.workers))]
pub async fn run(
    enumerator: &dyn PageEnumerator,
    session: SessionSource,
    config: &PipelineConfig,
    cancel: CancellationToken,
) -> Result<PipelineReport, PipelineError> {
    ensure_directory(&config.worker.output_dir)?;

    let bundle = match session {
        SessionSource::Login(credentials) => enumerator.authenticate(&credentials).await?,
        SessionSource::Bundle(bundle) => {
            enumerator.adopt_session(&bundle)?;
            bundle
        }
    };
    info!(cookies = bundle.len(), "session ready");

    let queue = Arc::new(WorkQueue::new());
    let pool = WorkerPool::start(config.workers, Arc::clone(&queue), &bundle, &config.worker).await?;

    let enumeration = enumerate_into(
        enumerator,
        &queue,
        config.start_offset,
        &config.worker.retry,
        &config.worker.throttle,
        &cancel,
    )
    .await;
    info!(
        pushed = enumeration.pushed,
        next_offset = enumeration.next_offset,
        end = ?enumeration.end,
        "enumeration finished"
    );

    let pool = pool.join().await;
    Ok(PipelineReport { enumeration, pool })
}

fn ensure_directory(path: &Path) -> Result<(), PipelineError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::MissingDirectory {
            path: path.to_path_buf(),
        })
    }
}
