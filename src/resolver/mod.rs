//! Media resolution: page reference → typed [`MediaItem`] with a final asset URL.
//!
//! # Architecture
//!
//! - [`PageResolver`] - per-worker resolver holding that worker's page client and cookie jar
//! - [`scrape_media_page`] - pure HTML extraction (classification + field lookup)
//! - [`resolve_redirect`] - interstitial `;url=` resolution, selected by [`RedirectStrategy`]
//! - [`MediaItem`] - `Photo` / `Video` tagged variant handed to the downloader

mod error;
mod page;
mod redirect;
mod utils;

pub use error::ResolveError;
pub use page::{ScrapedMedia, scrape_media_page};
pub use redirect::{RedirectStrategy, extract_redirect_target, resolve_redirect};
pub(crate) use utils::{absolutize_url, compile_static_regex, compile_static_selector, element_text};

use std::fmt;
use std::sync::Arc;

use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::download::{HttpClient, RetryPolicy};
use crate::pool::Throttle;
use crate::queue::PageRef;
use crate::session::SessionCookies;

/// Media kind discriminant, used for logging and the sidecar descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image; metadata is embedded before writing.
    Photo,
    /// Video; written byte-for-byte.
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Photo => f.write_str("photo"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Fields shared by both media kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDetails {
    /// Display name of the tagging/posting user (may be empty).
    pub actor: String,
    /// Free-text description (may be empty).
    pub caption: String,
    /// Source-reported timestamp text, loosely formatted.
    pub date: String,
    /// Final, directly fetchable asset URL.
    pub asset_url: Url,
    /// The page this item was derived from.
    pub source_page: PageRef,
}

/// A resolved media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaItem {
    /// A photo.
    Photo(MediaDetails),
    /// A video.
    Video(MediaDetails),
}

impl MediaItem {
    /// Returns the kind discriminant.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Photo(_) => MediaKind::Photo,
            Self::Video(_) => MediaKind::Video,
        }
    }

    /// Returns the shared fields.
    #[must_use]
    pub fn details(&self) -> &MediaDetails {
        match self {
            Self::Photo(details) | Self::Video(details) => details,
        }
    }

    /// Returns the final asset URL.
    #[must_use]
    pub fn asset_url(&self) -> &Url {
        &self.details().asset_url
    }
}

/// A resolved item plus the session cookies the downloader should present.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    /// The media item.
    pub item: MediaItem,
    /// Cookies captured from the worker's jar for the page just loaded.
    pub cookies: Option<SessionCookies>,
}

/// Resolves page references using one worker's own session context.
#[derive(Debug, Clone)]
pub struct PageResolver {
    client: HttpClient,
    jar: Arc<Jar>,
    redirect: RedirectStrategy,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl PageResolver {
    /// Creates a resolver over a jar-backed page client.
    ///
    /// `client` must have been built with `jar` as its cookie provider.
    #[must_use]
    pub fn new(
        client: HttpClient,
        jar: Arc<Jar>,
        redirect: RedirectStrategy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            jar,
            redirect,
            retry,
            throttle: Throttle::disabled(),
        }
    }

    /// Pauses with `throttle` before the interstitial navigation.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Loads `page`, scrapes it and finalizes the asset URL.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::InvalidPageRef`] if `page` is not an absolute URL
    /// - [`ResolveError::Fetch`] if the page cannot be loaded (after retrying transient failures)
    /// - [`ResolveError::ElementNotFound`] if a required element is missing
    /// - [`ResolveError::RedirectResolution`] if the interstitial has no target
    #[instrument(skip(self), fields(page = %page))]
    pub async fn resolve(&self, page: &PageRef) -> Result<ResolvedMedia, ResolveError> {
        let url = page
            .to_url()
            .map_err(|_| ResolveError::invalid_page_ref(page.as_str()))?;

        let fetched = self
            .retry
            .run("page", || self.client.get_text(&url, None))
            .await
            .map_err(|e| ResolveError::fetch(page.as_str(), e))?
            .value;

        let scraped = scrape_media_page(&fetched.body, &fetched.final_url, page)?;
        let cookies = SessionCookies::capture(self.jar.as_ref(), &fetched.final_url);
        debug!(kind = %scraped.kind, asset_ref = %scraped.asset_ref, "scraped page");

        let asset_url = match (scraped.kind, self.redirect) {
            (MediaKind::Photo, RedirectStrategy::Interstitial) => {
                self.throttle.pause().await;
                resolve_redirect(
                    &self.client,
                    &scraped.asset_ref,
                    cookies.as_ref(),
                    &self.retry,
                )
                .await?
            }
            (MediaKind::Photo, RedirectStrategy::Direct) | (MediaKind::Video, _) => {
                scraped.asset_ref.clone()
            }
        };

        Ok(ResolvedMedia {
            item: scraped.into_item(asset_url, page.clone()),
            cookies,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::download::ClientOptions;
    use crate::session::{SessionBundle, SessionCookie};

    fn resolver(bundle: &SessionBundle, redirect: RedirectStrategy) -> PageResolver {
        let jar = bundle.to_jar();
        let client = HttpClient::with_cookie_jar(Arc::clone(&jar), &ClientOptions::for_pages())
            .unwrap();
        PageResolver::new(client, jar, redirect, RetryPolicy::with_max_attempts(1))
    }

    async fn mount_photo(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/photo.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<strong class="actor">Jane Q</strong><abbr>Today</abbr>
                   <a href="/view_full_size/">View full size</a>"#,
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/view_full_size/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<meta http-equiv="refresh" content="0;url={}/cdn/1_2_n.jpg">"#,
                server.uri()
            )))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolve_photo_follows_interstitial_and_captures_cookies() {
        let server = MockServer::start().await;
        mount_photo(&server).await;
        let bundle = SessionBundle::new([SessionCookie::new("c_user", "1000", "127.0.0.1").host_only()]);

        let page = PageRef::new(format!("{}/photo.php?fbid=5", server.uri()));
        let resolved = resolver(&bundle, RedirectStrategy::Interstitial)
            .resolve(&page)
            .await
            .unwrap();

        assert_eq!(resolved.item.kind(), MediaKind::Photo);
        assert_eq!(resolved.item.asset_url().path(), "/cdn/1_2_n.jpg");
        assert_eq!(resolved.item.details().actor, "Jane Q");
        assert_eq!(resolved.item.details().caption, "[5]");
        let cookies = resolved.cookies.unwrap();
        assert_eq!(cookies.header_value().to_str().unwrap(), "c_user=1000");
    }

    #[tokio::test]
    async fn test_resolve_photo_direct_strategy_keeps_reference() {
        let server = MockServer::start().await;
        mount_photo(&server).await;

        let page = PageRef::new(format!("{}/photo.php?fbid=5", server.uri()));
        let resolved = resolver(&SessionBundle::default(), RedirectStrategy::Direct)
            .resolve(&page)
            .await
            .unwrap();

        assert_eq!(resolved.item.asset_url().path(), "/view_full_size/");
        assert!(resolved.cookies.is_none());
    }

    #[tokio::test]
    async fn test_interstitial_navigation_is_throttled() {
        let server = MockServer::start().await;
        mount_photo(&server).await;
        let floor = std::time::Duration::from_millis(500);
        let throttle = Throttle::new(floor, std::time::Duration::ZERO);
        let page = PageRef::new(format!("{}/photo.php?fbid=5", server.uri()));

        let started = std::time::Instant::now();
        resolver(&SessionBundle::default(), RedirectStrategy::Direct)
            .with_throttle(throttle)
            .resolve(&page)
            .await
            .unwrap();
        assert!(started.elapsed() < floor, "direct strategy makes no second navigation");

        let started = std::time::Instant::now();
        let resolved = resolver(&SessionBundle::default(), RedirectStrategy::Interstitial)
            .with_throttle(throttle)
            .resolve(&page)
            .await
            .unwrap();
        assert!(started.elapsed() >= floor);
        assert_eq!(resolved.item.asset_url().path(), "/cdn/1_2_n.jpg");
    }

    #[tokio::test]
    async fn test_resolve_invalid_page_ref() {
        let err = resolver(&SessionBundle::default(), RedirectStrategy::Direct)
            .resolve(&PageRef::new("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidPageRef { .. }));
    }

    #[tokio::test]
    async fn test_resolve_missing_page_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let page = PageRef::new(format!("{}/photo.php?fbid=9", server.uri()));
        let err = resolver(&SessionBundle::default(), RedirectStrategy::Direct)
            .resolve(&page)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Fetch {
                source: crate::download::DownloadError::HttpStatus { status: 404, .. },
                ..
            }
        ));
    }
}
