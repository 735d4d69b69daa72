//! Tagged-media harvester core library.
//!
//! Signs in once, pages through the media a user is tagged in, and has a pool
//! of independent workers resolve, download, tag and persist each item exactly
//! once.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`queue`] - Work queue and termination marker protocol
//! - [`session`] - Session bundle captured once and replicated per worker
//! - [`enumerator`] - Authentication and paginated listing (`PageEnumerator`)
//! - [`resolver`] - Page reference to typed `MediaItem`, interstitial redirects
//! - [`download`] - HTTP client, retry/backoff, idempotent asset persistence
//! - [`metadata`] - EXIF provenance embedding for photos
//! - [`sidecar`] - Optional JSON descriptor next to each asset
//! - [`pool`] - Worker pool and per-worker state machine
//! - [`pipeline`] - End-to-end run wiring

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod enumerator;
pub mod metadata;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod sidecar;
pub mod user_agent;

// Re-export commonly used types
pub use download::{DownloadError, DownloadOutcome, Downloader, HttpClient, RetryPolicy};
pub use enumerator::{
    AuthError, Credentials, EnumerateError, MobileSiteEnumerator, PageEnumerator, SiteConfig,
};
pub use metadata::{CommentStyle, EmbedOptions, MetadataEmbedder};
pub use pipeline::{PipelineConfig, PipelineError, PipelineReport, SessionSource};
pub use pool::{PoolReport, WorkerConfig, WorkerPool, WorkerState};
pub use queue::{PageRef, QueueItem, WorkQueue};
pub use resolver::{MediaItem, MediaKind, PageResolver, RedirectStrategy, ResolveError};
pub use session::{SessionBundle, SessionCookie};
