//! Asset download: idempotency check, retried fetch, metadata embedding and write.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use super::error::DownloadError;
use super::filename::filename_from_url;
use super::retry::RetryPolicy;
use super::writer::AssetWriter;
use crate::metadata::{MetadataEmbedder, PhotoTags};
use crate::resolver::{MediaDetails, MediaItem};
use crate::session::SessionCookies;
use crate::sidecar::write_sidecar;

/// What [`Downloader::save`] did with an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The asset was fetched and written.
    Written {
        /// Destination path.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
        /// Retries needed before the fetch succeeded.
        retries: usize,
    },
    /// A file with the derived name already existed; nothing was written.
    AlreadyExists {
        /// The existing path.
        path: PathBuf,
    },
}

/// Fetches assets and persists them at most once per derived filename.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: HttpClient,
    writer: AssetWriter,
    retry: RetryPolicy,
    embedder: MetadataEmbedder,
    sidecar: bool,
}

impl Downloader {
    /// Creates a downloader writing into `writer`'s directory.
    #[must_use]
    pub fn new(
        client: HttpClient,
        writer: AssetWriter,
        retry: RetryPolicy,
        embedder: MetadataEmbedder,
    ) -> Self {
        Self {
            client,
            writer,
            retry,
            embedder,
            sidecar: false,
        }
    }

    /// Enables the legacy JSON sidecar for newly written assets.
    #[must_use]
    pub fn with_sidecar(mut self, enabled: bool) -> Self {
        self.sidecar = enabled;
        self
    }

    /// Downloads `item` unless its destination already exists.
    ///
    /// Photos are buffered, tagged with EXIF provenance and written; videos are
    /// streamed to disk unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NoFilename`] when the asset URL has no final path
    /// segment, or the last fetch/write error once the retry policy gives up.
    #[instrument(skip(self, item, cookies), fields(page = %item.details().source_page, asset = %item.asset_url()))]
    pub async fn save(
        &self,
        item: &MediaItem,
        cookies: Option<&SessionCookies>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let url = item.asset_url();
        let path = self.destination_for(url)?;
        if self.writer.exists(&path).await? {
            info!(path = %path.display(), "already exists, skipping");
            return Ok(DownloadOutcome::AlreadyExists { path });
        }

        let outcome = match item {
            MediaItem::Photo(details) => self.save_photo(details, cookies, path).await?,
            MediaItem::Video(_) => self.save_video(url, cookies, &path).await?,
        };

        if let DownloadOutcome::Written { path, bytes, .. } = &outcome {
            info!(path = %path.display(), bytes, kind = %item.kind(), "saved");
            if self.sidecar
                && let Err(e) = write_sidecar(path, item).await
            {
                warn!(path = %path.display(), error = %e, "failed to write sidecar");
            }
        }
        Ok(outcome)
    }

    fn destination_for(&self, url: &Url) -> Result<PathBuf, DownloadError> {
        let name = filename_from_url(url).ok_or_else(|| DownloadError::no_filename(url.as_str()))?;
        Ok(self.writer.destination(&name))
    }

    async fn save_photo(
        &self,
        details: &MediaDetails,
        cookies: Option<&SessionCookies>,
        path: PathBuf,
    ) -> Result<DownloadOutcome, DownloadError> {
        let retried = self
            .retry
            .run("asset", || self.client.get_bytes(&details.asset_url, cookies))
            .await?;
        let retries = retried.delays.len();
        let raw = retried.value.bytes;

        let tags = PhotoTags {
            actor: &details.actor,
            caption: &details.caption,
            date: &details.date,
            source_link: details.source_page.canonical_link(),
        };
        let bytes = match self.embedder.embed(raw.clone(), &tags) {
            Ok(tagged) => tagged,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metadata not embedded; writing original bytes");
                raw
            }
        };

        let written = self.writer.write_bytes(&path, &bytes).await?;
        Ok(DownloadOutcome::Written {
            path,
            bytes: written,
            retries,
        })
    }

    /// Streams a video. The name is re-derived from the post-redirect URL
    /// and checked again before the body is read.
    async fn save_video(
        &self,
        url: &Url,
        cookies: Option<&SessionCookies>,
        requested: &Path,
    ) -> Result<DownloadOutcome, DownloadError> {
        let retried = self
            .retry
            .run("asset", || self.fetch_video(url, cookies, requested))
            .await?;

        let retries = retried.delays.len();
        Ok(match retried.value {
            DownloadOutcome::Written { path, bytes, .. } => DownloadOutcome::Written {
                path,
                bytes,
                retries,
            },
            exists @ DownloadOutcome::AlreadyExists { .. } => exists,
        })
    }

    async fn fetch_video(
        &self,
        url: &Url,
        cookies: Option<&SessionCookies>,
        requested: &Path,
    ) -> Result<DownloadOutcome, DownloadError> {
        let response = self.client.get(url, cookies).await?;
        let path = match filename_from_url(response.url()) {
            Some(name) => self.writer.destination(&name),
            None => requested.to_path_buf(),
        };
        if path != requested && self.writer.exists(&path).await? {
            info!(path = %path.display(), "redirect target already exists, skipping");
            return Ok(DownloadOutcome::AlreadyExists { path });
        }
        let bytes = self.writer.write_stream(&path, response).await?;
        Ok(DownloadOutcome::Written {
            path,
            bytes,
            retries: 0,
        })
    }
}
