//! Asset fetching and persistence.
//!
//! # Features
//!
//! - One reqwest-backed [`HttpClient`] per worker, optionally bound to a cookie jar
//! - [`RetryPolicy`] with exponential backoff, unbounded by default
//! - Filenames derived from the final path segment of the asset URL
//! - Writes through a temporary file and rename, so a partial transfer never
//!   occupies the destination name
//! - [`Downloader::save`] skips any item whose destination already exists
//!
//! # Example
//!
//! ```no_run
//! use harvest_core::download::{AssetWriter, ClientOptions, Downloader, HttpClient, RetryPolicy};
//! use harvest_core::metadata::{EmbedOptions, MetadataEmbedder};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(
//!     HttpClient::new(&ClientOptions::default())?,
//!     AssetWriter::new("./media"),
//!     RetryPolicy::unbounded(),
//!     MetadataEmbedder::new(EmbedOptions::default()),
//! );
//! # let _ = downloader;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod filename;
mod persist;
mod retry;
mod writer;

pub use client::{ClientOptions, FetchedAsset, FetchedPage, HttpClient};
pub use error::DownloadError;
pub use filename::filename_from_url;
pub use persist::{DownloadOutcome, Downloader};
pub use retry::{
    Backoff, ExponentialBackoff, FailureType, Retried, RetryDecision, RetryPolicy, Retryable,
    classify_error,
};
pub use writer::AssetWriter;

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
