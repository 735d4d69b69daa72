//! A single pool worker and its state machine.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::cookie::Jar;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use super::throttle::Throttle;
use super::{PoolError, PoolStats};
use crate::download::{
    AssetWriter, ClientOptions, DownloadOutcome, Downloader, HttpClient, RetryPolicy,
};
use crate::metadata::{EmbedOptions, MetadataEmbedder};
use crate::queue::{PageRef, QueueItem, WorkQueue};
use crate::resolver::{PageResolver, RedirectStrategy};
use crate::session::SessionBundle;

/// Per-worker lifecycle.
///
/// `Idle → Fetching → {Writing | Skipping | Failing} → Idle`, with `Stopped`
/// terminal once the termination marker is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next queue item.
    Idle,
    /// Resolving a page and fetching its asset.
    Fetching,
    /// A new asset file was persisted.
    Writing,
    /// The asset already existed.
    Skipping,
    /// The item failed and was logged.
    Failing,
    /// Saw the termination marker and exited.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Writing => "writing",
            Self::Skipping => "skipping",
            Self::Failing => "failing",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Everything a worker needs to build its own session context.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Destination directory (must exist).
    pub output_dir: PathBuf,
    /// Site root each worker visits before installing the session cookies.
    pub root_url: Url,
    /// Options for the page client (mobile user agent).
    pub page_client: ClientOptions,
    /// Options for the asset client.
    pub asset_client: ClientOptions,
    /// How photo asset references become final URLs.
    pub redirect: RedirectStrategy,
    /// Retry policy for page and asset fetches.
    pub retry: RetryPolicy,
    /// Metadata comment layout.
    pub embed: EmbedOptions,
    /// Write legacy JSON sidecars.
    pub sidecar: bool,
    /// Politeness delay before each pop and navigation.
    pub throttle: Throttle,
}

impl WorkerConfig {
    /// Creates a configuration with default clients, unbounded retry and the default throttle.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, root_url: Url) -> Self {
        Self {
            output_dir: output_dir.into(),
            root_url,
            page_client: ClientOptions::for_pages(),
            asset_client: ClientOptions::default(),
            redirect: RedirectStrategy::default(),
            retry: RetryPolicy::default(),
            embed: EmbedOptions::default(),
            sidecar: false,
            throttle: Throttle::default(),
        }
    }
}

/// One worker: its own cookie jar, page client, resolver and downloader.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    resolver: PageResolver,
    downloader: Downloader,
    throttle: Throttle,
    state: WorkerState,
}

impl Worker {
    /// Builds a worker context: fresh jar, visit the site root, install `bundle`.
    ///
    /// A failed root visit is logged and tolerated; the bundle is installed
    /// regardless.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Client`] if an HTTP client cannot be built.
    #[instrument(skip(bundle, config), fields(root = %config.root_url))]
    pub async fn connect(
        id: usize,
        bundle: &SessionBundle,
        config: &WorkerConfig,
    ) -> Result<Self, PoolError> {
        let jar = Arc::new(Jar::default());
        let page_client = HttpClient::with_cookie_jar(Arc::clone(&jar), &config.page_client)
            .map_err(PoolError::client)?;

        if let Err(e) = page_client.get(&config.root_url, None).await {
            warn!(worker = id, error = %e, "could not reach site root");
        }
        let installed = bundle.install_into(&jar);
        debug!(worker = id, cookies = installed, "session installed");

        let resolver = PageResolver::new(
            page_client,
            jar,
            config.redirect,
            config.retry.clone(),
        )
        .with_throttle(config.throttle);
        let downloader = Downloader::new(
            HttpClient::new(&config.asset_client).map_err(PoolError::client)?,
            AssetWriter::new(config.output_dir.clone()),
            config.retry.clone(),
            MetadataEmbedder::new(config.embed),
        )
        .with_sidecar(config.sidecar);

        Ok(Self {
            id,
            resolver,
            downloader,
            throttle: config.throttle,
            state: WorkerState::Idle,
        })
    }

    /// Returns this worker's index.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Consumes the queue until the termination marker, which is pushed back
    /// for the next worker before returning.
    pub async fn run(mut self, queue: &WorkQueue, stats: &PoolStats) -> WorkerState {
        loop {
            self.throttle.pause().await;
            match queue.pop().await {
                QueueItem::Terminate => {
                    queue.push(QueueItem::Terminate);
                    self.transition(WorkerState::Stopped);
                    info!(worker = self.id, "termination marker received, stopping");
                    return self.state;
                }
                QueueItem::Page(page) => {
                    self.process(&page, stats).await;
                    self.transition(WorkerState::Idle);
                }
            }
        }
    }

    async fn process(&mut self, page: &PageRef, stats: &PoolStats) {
        self.transition(WorkerState::Fetching);
        self.throttle.pause().await;

        let resolved = match self.resolver.resolve(page).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.transition(WorkerState::Failing);
                error!(worker = self.id, page = %page, error = %e, "could not resolve page, skipping");
                stats.increment_failed();
                return;
            }
        };

        match self
            .downloader
            .save(&resolved.item, resolved.cookies.as_ref())
            .await
        {
            Ok(DownloadOutcome::Written { retries, .. }) => {
                self.transition(WorkerState::Writing);
                stats.increment_written();
                stats.add_retries(retries);
            }
            Ok(DownloadOutcome::AlreadyExists { .. }) => {
                self.transition(WorkerState::Skipping);
                stats.increment_skipped();
            }
            Err(e) => {
                self.transition(WorkerState::Failing);
                error!(worker = self.id, page = %page, error = %e, "download failed, skipping");
                stats.increment_failed();
            }
        }
    }

    fn transition(&mut self, next: WorkerState) {
        trace!(worker = self.id, from = %self.state, to = %next, "state change");
        self.state = next;
    }
}
