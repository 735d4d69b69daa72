//! Idempotent asset persistence.
//!
//! Bytes are written to a hidden temporary file in the destination directory
//! and renamed into place, so a destination path either does not exist or holds
//! a complete asset. When two writers race on one name the last rename wins.

use std::path::{Path, PathBuf};

use rand::Rng;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::client::stream_to_file;
use super::error::DownloadError;

/// Writes assets into a single output directory.
#[derive(Debug, Clone)]
pub struct AssetWriter {
    output_dir: PathBuf,
}

impl AssetWriter {
    /// Creates a writer rooted at `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the destination path for `filename`.
    #[must_use]
    pub fn destination(&self, filename: &str) -> PathBuf {
        self.output_dir.join(filename)
    }

    /// Returns true if `path` already exists.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] if existence cannot be determined.
    pub async fn exists(&self, path: &Path) -> Result<bool, DownloadError> {
        fs::try_exists(path)
            .await
            .map_err(|e| DownloadError::io(path, e))
    }

    /// Writes `bytes` to `path` through a temporary file and rename.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] on any file system failure; the temporary
    /// file is removed on a best-effort basis.
    pub async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<u64, DownloadError> {
        let temp_path = self.temp_path_for(path);
        let result: Result<u64, DownloadError> = async {
            let mut file = create_new(&temp_path).await?;
            file.write_all(bytes)
                .await
                .map_err(|e| DownloadError::io(&temp_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| DownloadError::io(&temp_path, e))?;
            Ok(bytes.len() as u64)
        }
        .await;
        self.finish(&temp_path, path, result).await
    }

    /// Streams a response body to `path` through a temporary file and rename.
    ///
    /// # Errors
    ///
    /// Returns the network or IO error that interrupted the transfer; the
    /// temporary file is removed on a best-effort basis.
    pub async fn write_stream(
        &self,
        path: &Path,
        response: reqwest::Response,
    ) -> Result<u64, DownloadError> {
        let temp_path = self.temp_path_for(path);
        let url = response.url().to_string();
        let result: Result<u64, DownloadError> = async {
            let file = create_new(&temp_path).await?;
            stream_to_file(file, response, &url, &temp_path).await
        }
        .await;
        self.finish(&temp_path, path, result).await
    }

    async fn finish(
        &self,
        temp_path: &Path,
        path: &Path,
        result: Result<u64, DownloadError>,
    ) -> Result<u64, DownloadError> {
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                discard(temp_path).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(temp_path, path).await {
            discard(temp_path).await;
            return Err(DownloadError::io(path, e));
        }
        debug!(path = %path.display(), bytes = written, "asset persisted");
        Ok(written)
    }

    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let nonce: u32 = rand::thread_rng().r#gen();
        self.output_dir.join(format!(".{name}.{nonce:08x}.part"))
    }
}

async fn create_new(path: &Path) -> Result<fs::File, DownloadError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn discard(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %temp_path.display(), error = %e, "failed to remove temporary file");
    }
}
