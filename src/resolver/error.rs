//! Error types for page resolution.

use thiserror::Error;

use crate::download::{DownloadError, FailureType, Retryable, classify_error};

/// Errors that can occur while turning a page reference into a [`MediaItem`](super::MediaItem).
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A required element is missing from the page; the item is skipped.
    #[error("{page}: required element not found: {element}")]
    ElementNotFound {
        /// The page reference being resolved.
        page: String,
        /// Description of the missing element.
        element: &'static str,
    },

    /// The interstitial page did not yield a redirect target.
    #[error("no redirect target in interstitial {url}: {reason}")]
    RedirectResolution {
        /// The interstitial URL.
        url: String,
        /// What was wrong with the interstitial response.
        reason: String,
    },

    /// Loading the page or interstitial failed.
    #[error("failed to load {page}: {source}")]
    Fetch {
        /// The page reference being resolved.
        page: String,
        /// The underlying download error.
        #[source]
        source: DownloadError,
    },

    /// The page reference is not an absolute URL.
    #[error("invalid page reference: {page}")]
    InvalidPageRef {
        /// The offending reference.
        page: String,
    },
}

impl ResolveError {
    /// Creates an element-not-found error.
    pub fn element_not_found(page: impl Into<String>, element: &'static str) -> Self {
        Self::ElementNotFound {
            page: page.into(),
            element,
        }
    }

    /// Creates a redirect resolution error.
    pub fn redirect(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RedirectResolution {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a fetch error.
    pub fn fetch(page: impl Into<String>, source: DownloadError) -> Self {
        Self::Fetch {
            page: page.into(),
            source,
        }
    }

    /// Creates an invalid page reference error.
    pub fn invalid_page_ref(page: impl Into<String>) -> Self {
        Self::InvalidPageRef { page: page.into() }
    }
}

impl Retryable for ResolveError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Fetch { source, .. } => classify_error(source),
            Self::ElementNotFound { .. }
            | Self::RedirectResolution { .. }
            | Self::InvalidPageRef { .. } => FailureType::Permanent,
        }
    }
}
