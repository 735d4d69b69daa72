//! Queue item types.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque locator of a single tagged-media detail page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageRef(String);

impl PageRef {
    /// Wraps a page locator.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw locator string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the locator as an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`url::ParseError`] when the locator is not an absolute URL.
    pub fn to_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.0)
    }

    /// Returns a stable identifier for the page, when the locator carries one.
    ///
    /// Looks for the well-known media id query parameters first, then falls back
    /// to the last all-digit path segment.
    #[must_use]
    pub fn stable_id(&self) -> Option<String> {
        let url = self.to_url().ok()?;
        for key in ["fbid", "story_fbid", "v", "id"] {
            if let Some((_, value)) = url.query_pairs().find(|(name, _)| name == key)
                && !value.is_empty()
            {
                return Some(value.into_owned());
            }
        }
        url.path_segments()?
            .filter(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
            .next_back()
            .map(str::to_string)
    }

    /// Returns the canonical source link: the locator truncated at the first `&`.
    #[must_use]
    pub fn canonical_link(&self) -> &str {
        self.0.split('&').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PageRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A unit of work travelling through the [`WorkQueue`](super::WorkQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    /// A page reference to resolve and download.
    Page(PageRef),
    /// Producer completion marker; every worker observes it once and requeues it.
    Terminate,
}

impl QueueItem {
    /// Returns true for the termination marker.
    #[must_use]
    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }
}

impl From<PageRef> for QueueItem {
    fn from(page: PageRef) -> Self {
        Self::Page(page)
    }
}
