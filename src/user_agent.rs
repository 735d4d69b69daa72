//! Shared User-Agent strings for page and asset HTTP clients.
//!
//! Page navigation presents a basic mobile browser so the site serves its
//! lightweight markup; asset downloads identify the tool.

/// Mobile browser User-Agent used for login, listing and detail pages.
pub const PAGE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

/// Default User-Agent for asset downloads (identifies the tool and version).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("tagged-harvest/{version}")
}
