//! Session bundle: authentication state captured once and replicated per worker.
//!
//! The enumerator performs the login exactly once and exports the resulting
//! cookies as a [`SessionBundle`]. Each worker seeds its own cookie jar from the
//! bundle, so contexts are never shared between concurrent workers.

mod cookies;

pub use cookies::{CookieError, ParsedCookies, parse_netscape_cookies};

use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use tracing::{debug, instrument, warn};
use url::Url;

/// A single cookie record of a session bundle.
///
/// The value is redacted in `Debug` output so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// Cookie name.
    pub name: String,
    value: String,
    /// Domain the cookie belongs to (e.g. `.example.com`).
    pub domain: String,
    /// URL path scope.
    pub path: String,
    /// Only sent over HTTPS.
    pub secure: bool,
    /// Not visible to page scripts.
    pub http_only: bool,
    /// Also sent to subdomains of `domain`.
    pub include_subdomains: bool,
    /// Unix expiry timestamp (0 = session cookie).
    pub expires: u64,
}

impl SessionCookie {
    /// Creates a session-scoped cookie for `domain` with path `/`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            include_subdomains: true,
            expires: 0,
        }
    }

    /// Restricts the cookie to exactly `domain`, excluding subdomains.
    #[must_use]
    pub fn host_only(mut self) -> Self {
        self.include_subdomains = false;
        self
    }

    /// Builds a record from a `Set-Cookie` seen on a response from `origin`.
    ///
    /// Host-only cookies (no `Domain` attribute) take the origin host.
    #[must_use]
    pub fn from_response_cookie(cookie: &reqwest::cookie::Cookie<'_>, origin: &Url) -> Self {
        let (domain, include_subdomains) = match cookie.domain() {
            Some(domain) => (domain.to_string(), true),
            None => (origin.host_str().unwrap_or_default().to_string(), false),
        };
        let expires = cookie
            .expires()
            .and_then(|at| at.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain,
            path: cookie.path().unwrap_or("/").to_string(),
            secure: cookie.secure(),
            http_only: cookie.http_only(),
            include_subdomains,
            expires,
        }
    }

    /// Returns the cookie value. Avoid logging it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.name == other.name
            && self.path == other.path
            && self.domain.trim_start_matches('.') == other.domain.trim_start_matches('.')
    }

    fn to_set_cookie(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];
        if self.include_subdomains {
            parts.push(format!("Domain={}", self.domain));
        }
        parts.push(format!("Path={}", self.path));
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        if self.expires > 0 {
            match i64::try_from(self.expires)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
            {
                Some(at) => parts.push(format!(
                    "Expires={}",
                    at.format("%a, %d %b %Y %H:%M:%S GMT")
                )),
                None => warn!(
                    domain = %self.domain,
                    name = %self.name,
                    expires = self.expires,
                    "cookie expiry out of range; treating as session cookie"
                ),
            }
        }
        parts.join("; ")
    }

    fn origin_url(&self) -> Option<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        let host = self.domain.trim_start_matches('.');
        Url::parse(&format!("{scheme}://{host}{}", self.path)).ok()
    }
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("include_subdomains", &self.include_subdomains)
            .field("expires", &self.expires)
            .finish()
    }
}

/// Ordered, immutable set of cookies exported from an authenticated session.
///
/// Cloning is cheap; all clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct SessionBundle {
    cookies: Arc<[SessionCookie]>,
}

impl SessionBundle {
    /// Builds a bundle, keeping first-seen order.
    ///
    /// A later record for the same name, domain and path replaces the earlier value.
    #[must_use]
    pub fn new(cookies: impl IntoIterator<Item = SessionCookie>) -> Self {
        let mut ordered: Vec<SessionCookie> = Vec::new();
        for cookie in cookies {
            match ordered.iter_mut().find(|existing| existing.same_slot(&cookie)) {
                Some(existing) => *existing = cookie,
                None => ordered.push(cookie),
            }
        }
        Self {
            cookies: ordered.into(),
        }
    }

    /// Returns the records in capture order.
    #[must_use]
    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Returns true if the bundle holds no cookies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Looks up a cookie by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SessionCookie> {
        self.cookies.iter().find(|cookie| cookie.name == name)
    }

    /// Installs every record into `jar`.
    ///
    /// Returns the number of cookies installed; records whose domain cannot
    /// form a URL are skipped with a warning.
    #[instrument(level = "debug", skip(self, jar), fields(cookies = self.len()))]
    pub fn install_into(&self, jar: &Jar) -> usize {
        let mut installed = 0;
        for cookie in self.cookies.iter() {
            let Some(origin) = cookie.origin_url() else {
                warn!(
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "skipping cookie with unusable domain"
                );
                continue;
            };
            jar.add_cookie_str(&cookie.to_set_cookie(), &origin);
            debug!(domain = %cookie.domain, name = %cookie.name, "installed cookie");
            installed += 1;
        }
        installed
    }

    /// Creates a fresh jar seeded with this bundle.
    #[must_use]
    pub fn to_jar(&self) -> Arc<Jar> {
        let jar = Arc::new(Jar::default());
        self.install_into(&jar);
        jar
    }
}

/// `Cookie` header captured from a worker's jar for a page it just loaded.
///
/// The downloader attaches it to interstitial and asset requests, which may go
/// to hosts the jar would not send cookies to on its own.
#[derive(Clone)]
pub struct SessionCookies(HeaderValue);

impl SessionCookies {
    /// Captures the cookies `store` would send to `url`.
    #[must_use]
    pub fn capture(store: &dyn CookieStore, url: &Url) -> Option<Self> {
        store.cookies(url).map(Self)
    }

    /// Builds the header directly from a bundle, ignoring domain scoping.
    #[must_use]
    pub fn from_bundle(bundle: &SessionBundle) -> Option<Self> {
        if bundle.is_empty() {
            return None;
        }
        let header = bundle
            .cookies()
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok().map(Self)
    }

    /// Returns the header value to attach as `Cookie`.
    #[must_use]
    pub fn header_value(&self) -> &HeaderValue {
        &self.0
    }
}

impl fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCookies([REDACTED])")
    }
}
