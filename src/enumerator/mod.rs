//! Page enumeration: authentication and paginated listing of page references.
//!
//! The interactive part of the site (login, listings) is isolated behind the
//! [`PageEnumerator`] trait. The core only calls [`PageEnumerator::authenticate`]
//! once and then pages through [`PageEnumerator::next_page`] via
//! [`enumerate_into`], which owns the termination protocol.
//!
//! # Example
//!
//! ```no_run
//! use harvest_core::download::RetryPolicy;
//! use harvest_core::enumerator::{MobileSiteEnumerator, SiteConfig, enumerate_into};
//! use harvest_core::pool::Throttle;
//! use harvest_core::queue::WorkQueue;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let enumerator = MobileSiteEnumerator::new(SiteConfig::new("https://m.example.com".parse()?));
//! let queue = WorkQueue::new();
//! let summary = enumerate_into(
//!     &enumerator,
//!     &queue,
//!     0,
//!     &RetryPolicy::default(),
//!     &Throttle::default(),
//!     &CancellationToken::new(),
//! )
//! .await;
//! println!("pushed {} page references", summary.pushed);
//! # Ok(())
//! # }
//! ```

mod mobile;

pub use mobile::{DEFAULT_LISTING_PATH, DEFAULT_LOGIN_PATH, MobileSiteEnumerator, SiteConfig};

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::download::{DownloadError, FailureType, RetryPolicy, Retryable, classify_error};
use crate::pool::Throttle;
use crate::queue::{PageRef, QueueItem, WorkQueue};
use crate::session::SessionBundle;

/// Login credentials. The password is redacted in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the account name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password. Never log it.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Authentication failure. Always fatal to the run.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The site did not issue a session for these credentials.
    #[error("login rejected for {username}: no session cookie issued")]
    Rejected {
        /// Account name that was tried.
        username: String,
    },

    /// A supplied session lacks the cookie that identifies the account.
    #[error("session has no {name} cookie; export cookies from a signed-in browser")]
    MissingSessionCookie {
        /// Name of the missing cookie.
        name: String,
    },

    /// The site asked for an interactive step (checkpoint, two-factor).
    #[error("login requires an interactive challenge at {url}")]
    Challenge {
        /// URL of the challenge page.
        url: String,
    },

    /// No login form was found on the login page.
    #[error("no login form found at {url}")]
    LoginFormNotFound {
        /// URL of the page that was searched.
        url: String,
    },

    /// The login exchange redirected more often than allowed.
    #[error("too many redirects during login, last at {url}")]
    TooManyRedirects {
        /// Last URL reached.
        url: String,
    },

    /// The login exchange could not be completed.
    #[error("login request failed: {source}")]
    Transport {
        /// Underlying error.
        #[source]
        source: DownloadError,
    },
}

impl AuthError {
    pub(crate) fn transport(source: DownloadError) -> Self {
        Self::Transport { source }
    }
}

/// Failure to fetch or read one listing page.
#[derive(Debug, Error)]
pub enum EnumerateError {
    /// The listing page could not be fetched.
    #[error("failed to fetch listing at offset {offset}: {source}")]
    Fetch {
        /// Pagination cursor.
        offset: usize,
        /// Underlying error.
        #[source]
        source: DownloadError,
    },

    /// The listing URL could not be built.
    #[error("invalid listing URL for offset {offset}: {reason}")]
    InvalidListing {
        /// Pagination cursor.
        offset: usize,
        /// What went wrong.
        reason: String,
    },

    /// `next_page` was called before a session was established.
    #[error("no session: authenticate or adopt a session bundle first")]
    NotAuthenticated,
}

impl Retryable for EnumerateError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Fetch { source, .. } => classify_error(source),
            Self::InvalidListing { .. } | Self::NotAuthenticated => FailureType::Permanent,
        }
    }
}

/// Source of page references.
///
/// `next_page` must be a pure function of the cursor: it returns the page
/// references at `offset`, or an empty list once the listing is exhausted.
#[async_trait]
pub trait PageEnumerator: Send + Sync {
    /// Signs in once and exports the resulting session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on rejected credentials or an interactive challenge.
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionBundle, AuthError>;

    /// Uses an externally obtained session instead of [`Self::authenticate`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the bundle cannot identify an account.
    fn adopt_session(&self, bundle: &SessionBundle) -> Result<(), AuthError>;

    /// Returns the page references at `offset`; empty when exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`EnumerateError`] if the listing cannot be fetched or read.
    async fn next_page(&self, offset: usize) -> Result<Vec<PageRef>, EnumerateError>;
}

/// Why pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationEnd {
    /// An empty page was returned.
    Exhausted,
    /// The cancellation token fired.
    Interrupted,
    /// A listing fetch failed permanently.
    Failed,
}

/// Result of [`enumerate_into`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationSummary {
    /// Non-empty listing pages seen.
    pub pages: usize,
    /// Page references pushed to the queue.
    pub pushed: usize,
    /// Cursor at which enumeration stopped; pass it as the next start offset to resume.
    pub next_offset: usize,
    /// Why enumeration stopped.
    pub end: EnumerationEnd,
}

/// Pages through `enumerator` from `start_offset`, pushing every reference to `queue`.
///
/// Stops at the first empty page, on cancellation or on a listing error the
/// retry policy gives up on, and then pushes exactly one
/// [`QueueItem::Terminate`]. Cancellation interrupts a pending listing fetch;
/// references already pushed stay queued.
#[instrument(skip(enumerator, queue, retry, throttle, cancel))]
pub async fn enumerate_into(
    enumerator: &dyn PageEnumerator,
    queue: &WorkQueue,
    start_offset: usize,
    retry: &RetryPolicy,
    throttle: &Throttle,
    cancel: &CancellationToken,
) -> EnumerationSummary {
    let mut offset = start_offset;
    let mut pages = 0;
    let mut pushed = 0;

    let end = loop {
        if cancel.is_cancelled() {
            break EnumerationEnd::Interrupted;
        }
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = async {
                throttle.pause().await;
                retry.run("listing", || enumerator.next_page(offset)).await
            } => Some(result),
        };
        let Some(fetched) = fetched else {
            break EnumerationEnd::Interrupted;
        };

        match fetched {
            Ok(retried) if retried.value.is_empty() => {
                info!(offset, "listing exhausted");
                break EnumerationEnd::Exhausted;
            }
            Ok(retried) => {
                let count = retried.value.len();
                for page in retried.value {
                    queue.push(QueueItem::Page(page));
                }
                pages += 1;
                pushed += count;
                offset += count;
                debug!(count, next_offset = offset, "listing page queued");
            }
            Err(e) => {
                error!(offset, error = %e, "listing failed, ending enumeration");
                break EnumerationEnd::Failed;
            }
        }
    };

    if end == EnumerationEnd::Interrupted {
        info!(offset, "interrupted, ending enumeration early");
    }
    queue.push(QueueItem::Terminate);

    EnumerationSummary {
        pages,
        pushed,
        next_offset: offset,
        end,
    }
}
