//! Legacy JSON sidecar descriptors for downloaded assets.
//!
//! When enabled, each newly written asset gets a `<file name>.json` next to it
//! holding the raw scraped fields. Session cookies are never written.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::resolver::{MediaItem, MediaKind};

/// Errors produced by sidecar generation.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// I/O error writing the sidecar file to disk.
    #[error("I/O error writing sidecar: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error (shouldn't occur for well-formed structs).
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sidecar document root.
#[derive(Debug, Serialize)]
struct Descriptor<'a> {
    kind: MediaKind,
    actor: &'a str,
    caption: &'a str,
    date: &'a str,
    asset_url: &'a str,
    page: &'a str,
    file: &'a str,
}

/// Writes the sidecar for `item` next to `asset_path`.
///
/// Returns `None` when the sidecar already exists (never overwritten) and
/// `Some(sidecar_path)` on success.
///
/// # Errors
///
/// Returns [`SidecarError`] on I/O or serialization failure; a partially
/// written sidecar is removed.
#[instrument(level = "debug", skip(item), fields(path = %asset_path.display()))]
pub async fn write_sidecar(
    asset_path: &Path,
    item: &MediaItem,
) -> Result<Option<PathBuf>, SidecarError> {
    let sidecar_path = sidecar_path_for(asset_path);
    let details = item.details();
    let file_name = asset_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let descriptor = Descriptor {
        kind: item.kind(),
        actor: &details.actor,
        caption: &details.caption,
        date: &details.date,
        asset_url: details.asset_url.as_str(),
        page: details.source_page.as_str(),
        file: &file_name,
    };

    let json = serde_json::to_vec_pretty(&descriptor)?;

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&sidecar_path)
        .await
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            debug!(path = %sidecar_path.display(), "sidecar already exists, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let written = match file.write_all(&json).await {
        Ok(()) => file.flush().await,
        Err(err) => Err(err),
    };
    if let Err(err) = written {
        drop(file);
        if let Err(e) = fs::remove_file(&sidecar_path).await {
            warn!(path = %sidecar_path.display(), error = %e, "failed to remove partial sidecar");
        }
        return Err(err.into());
    }

    debug!(path = %sidecar_path.display(), "sidecar created");
    Ok(Some(sidecar_path))
}

/// Appends `.json` to the asset file name: `a.jpg` → `a.jpg.json`.
#[must_use]
pub fn sidecar_path_for(asset_path: &Path) -> PathBuf {
    let mut name = asset_path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}
