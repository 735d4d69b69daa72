//! [`PageEnumerator`] over the mobile web site.
//!
//! Login posts the site's own login form and follows redirects by hand so
//! every `Set-Cookie` along the way ends up in the exported bundle. Listings
//! are plain HTML pages addressed by a path template with `{user_id}` and
//! `{offset}` placeholders.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use super::{AuthError, Credentials, EnumerateError, PageEnumerator};
use crate::download::constants::MAX_REDIRECTS;
use crate::download::{ClientOptions, DownloadError, HttpClient};
use crate::queue::PageRef;
use crate::resolver::{absolutize_url, compile_static_regex, compile_static_selector};
use crate::session::{SessionBundle, SessionCookie};

/// Login page path.
pub const DEFAULT_LOGIN_PATH: &str = "/login.php";

/// Listing path template for the photos a user is tagged in.
pub const DEFAULT_LISTING_PATH: &str = "/profile.php?id={user_id}&v=photos&sk=photos_of&offset={offset}";

/// Cookie that carries the signed-in account id.
const SESSION_COOKIE: &str = "c_user";

static LOGIN_FORM: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("form"));
static PASSWORD_INPUT: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"input[name="pass"]"#));
static NAMED_INPUTS: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("input[name]"));
static LINKS: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a[href]"));
static MEDIA_PATH: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"^/(?:photo\.php|video\.php|[^/]+/(?:photos|videos)/[^/]+)/?$")
});
static CHALLENGE_PATH: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)/(?:checkpoint|two_step_verification|two_factor)"));

/// Site layout the enumerator works against.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Site root, e.g. `https://m.facebook.com`.
    pub root_url: Url,
    /// Login page path.
    pub login_path: String,
    /// Listing path template with `{user_id}` and `{offset}` placeholders.
    pub listing_path: String,
    /// HTTP client options (timeouts).
    pub client: ClientOptions,
}

impl SiteConfig {
    /// Creates a configuration with the default paths.
    #[must_use]
    pub fn new(root_url: Url) -> Self {
        Self {
            root_url,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            listing_path: DEFAULT_LISTING_PATH.to_string(),
            client: ClientOptions::for_pages(),
        }
    }

    fn listing_url(&self, user_id: &str, offset: usize) -> Result<Url, url::ParseError> {
        let path = self
            .listing_path
            .replace("{user_id}", user_id)
            .replace("{offset}", &offset.to_string());
        self.root_url.join(&path)
    }
}

/// Listing context established by login or by adopting a bundle.
#[derive(Debug, Clone)]
struct ListingSession {
    client: HttpClient,
    user_id: String,
}

/// Enumerates tagged media through the mobile site's HTML pages.
#[derive(Debug)]
pub struct MobileSiteEnumerator {
    config: SiteConfig,
    session: Mutex<Option<ListingSession>>,
}

impl MobileSiteEnumerator {
    /// Creates an enumerator for `config`. No request is made until
    /// [`PageEnumerator::authenticate`] or [`PageEnumerator::adopt_session`].
    #[must_use]
    pub fn new(config: SiteConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Returns the site configuration.
    #[must_use]
    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn install_session(&self, bundle: &SessionBundle) -> Result<(), AuthError> {
        let Some(user_id) = bundle.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
            return Err(AuthError::MissingSessionCookie {
                name: SESSION_COOKIE.to_string(),
            });
        };
        let client = HttpClient::with_cookie_jar(bundle.to_jar(), &self.config.client)
            .map_err(AuthError::transport)?;
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ListingSession { client, user_id });
        Ok(())
    }

    fn listing_session(&self) -> Option<ListingSession> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// GETs `url` (or POSTs `form` to it) and follows redirects by hand,
    /// recording every cookie set on the way.
    async fn exchange(
        client: &HttpClient,
        url: Url,
        form: Option<String>,
        collected: &mut Vec<SessionCookie>,
    ) -> Result<(Url, String), AuthError> {
        let mut current = url;
        let mut request = match form {
            Some(body) => client
                .inner()
                .post(current.clone())
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body),
            None => client.inner().get(current.clone()),
        };

        for _ in 0..=MAX_REDIRECTS {
            let response = request
                .send()
                .await
                .map_err(|e| AuthError::transport(DownloadError::from_reqwest(current.as_str(), e)))?;
            collected.extend(
                response
                    .cookies()
                    .map(|cookie| SessionCookie::from_response_cookie(&cookie, &current)),
            );

            let status = response.status();
            if status.is_redirection() {
                let next = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|location| absolutize_url(location, &current));
                if let Some(next) = next {
                    debug!(from = %current, to = %next, "following login redirect");
                    current = next;
                    request = client.inner().get(current.clone());
                    continue;
                }
            }
            if !status.is_success() && !status.is_redirection() {
                return Err(AuthError::transport(DownloadError::http_status(
                    current.as_str(),
                    status.as_u16(),
                )));
            }
            let body = response
                .text()
                .await
                .map_err(|e| AuthError::transport(DownloadError::from_reqwest(current.as_str(), e)))?;
            return Ok((current, body));
        }

        Err(AuthError::TooManyRedirects {
            url: current.to_string(),
        })
    }
}

#[async_trait]
impl PageEnumerator for MobileSiteEnumerator {
    #[instrument(skip(self, credentials), fields(username = %credentials.username()))]
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionBundle, AuthError> {
        let jar = Arc::new(Jar::default());
        let client =
            HttpClient::with_cookie_jar(jar, &self.config.client.clone().without_redirects())
                .map_err(AuthError::transport)?;
        let login_url = self
            .config
            .root_url
            .join(&self.config.login_path)
            .map_err(|_| AuthError::LoginFormNotFound {
                url: self.config.login_path.clone(),
            })?;

        let mut collected = Vec::new();
        let (page_url, html) = Self::exchange(&client, login_url, None, &mut collected).await?;
        let (action, fields) = login_form(&html, &page_url, credentials)
            .ok_or_else(|| AuthError::LoginFormNotFound {
                url: page_url.to_string(),
            })?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        let (landing, _) = Self::exchange(&client, action, Some(body), &mut collected).await?;

        if CHALLENGE_PATH.is_match(landing.path()) {
            return Err(AuthError::Challenge {
                url: landing.to_string(),
            });
        }
        let bundle = SessionBundle::new(collected);
        if bundle.get(SESSION_COOKIE).is_none() {
            return Err(AuthError::Rejected {
                username: credentials.username().to_string(),
            });
        }

        info!(cookies = bundle.len(), "signed in");
        self.install_session(&bundle)?;
        Ok(bundle)
    }

    fn adopt_session(&self, bundle: &SessionBundle) -> Result<(), AuthError> {
        self.install_session(bundle)?;
        debug!(cookies = bundle.len(), "adopted session bundle");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn next_page(&self, offset: usize) -> Result<Vec<PageRef>, EnumerateError> {
        let session = self
            .listing_session()
            .ok_or(EnumerateError::NotAuthenticated)?;
        let url = self
            .config
            .listing_url(&session.user_id, offset)
            .map_err(|e| EnumerateError::InvalidListing {
                offset,
                reason: e.to_string(),
            })?;

        let page = session
            .client
            .get_text(&url, None)
            .await
            .map_err(|source| EnumerateError::Fetch { offset, source })?;
        let refs = media_links(&page.body, &page.final_url);
        debug!(offset, count = refs.len(), "listing page parsed");
        Ok(refs)
    }
}

/// Finds the form holding the password field and fills in the credentials.
fn login_form(
    html: &str,
    page_url: &Url,
    credentials: &Credentials,
) -> Option<(Url, Vec<(String, String)>)> {
    let document = Html::parse_document(html);
    let form = document
        .select(&LOGIN_FORM)
        .find(|form| form.select(&PASSWORD_INPUT).next().is_some())?;

    let action = form
        .value()
        .attr("action")
        .and_then(|action| absolutize_url(action, page_url))
        .unwrap_or_else(|| page_url.clone());

    let mut fields: Vec<(String, String)> = form
        .select(&NAMED_INPUTS)
        .filter_map(hidden_field)
        .collect();
    fields.push(("email".to_string(), credentials.username().to_string()));
    fields.push(("pass".to_string(), credentials.password().to_string()));
    Some((action, fields))
}

fn hidden_field(input: ElementRef<'_>) -> Option<(String, String)> {
    let element = input.value();
    let name = element.attr("name")?;
    if matches!(name, "email" | "pass") || element.attr("type") == Some("submit") {
        return None;
    }
    Some((name.to_string(), element.attr("value").unwrap_or_default().to_string()))
}

/// Collects distinct same-site media page links in document order.
fn media_links(html: &str, page_url: &Url) -> Vec<PageRef> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolutize_url(href, page_url))
        .filter(|url| url.host_str() == page_url.host_str())
        .filter(|url| MEDIA_PATH.is_match(url.path()))
        .filter(|url| seen.insert(url.to_string()))
        .map(|url| PageRef::new(url.to_string()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const LOGIN_PAGE: &str = r#"<html><body>
        <form method="post" action="/login/device-based/regular/login/?refsrc=home">
          <input type="hidden" name="lsd" value="AVq1">
          <input type="text" name="email">
          <input type="password" name="pass">
          <input type="submit" name="login" value="Log In">
        </form></body></html>"#;

    fn site(server: &MockServer) -> SiteConfig {
        let mut config = SiteConfig::new(Url::parse(&server.uri()).unwrap());
        config.listing_path = "/{user_id}/tagged?offset={offset}".to_string();
        config
    }

    async fn mount_login(server: &MockServer, landing: &str, set_session: bool) {
        Mock::given(method("GET"))
            .and(path("/login.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "datr=d1; Path=/")
                    .set_body_string(LOGIN_PAGE),
            )
            .mount(server)
            .await;
        let mut redirect = ResponseTemplate::new(302).insert_header("location", landing);
        if set_session {
            redirect = redirect
                .append_header("set-cookie", "c_user=1000; Path=/")
                .append_header("set-cookie", "xs=secret; Path=/; HttpOnly");
        }
        Mock::given(method("POST"))
            .and(path("/login/device-based/regular/login/"))
            .and(body_string_contains("lsd=AVq1"))
            .and(body_string_contains("email=jane%40example.com"))
            .respond_with(redirect)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(landing.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>home</html>"))
            .mount(server)
            .await;
    }

    fn credentials() -> Credentials {
        Credentials::new("jane@example.com", "hunter2")
    }

    #[tokio::test]
    async fn test_authenticate_collects_session_cookies() {
        let server = MockServer::start().await;
        mount_login(&server, "/home.php", true).await;

        let enumerator = MobileSiteEnumerator::new(site(&server));
        let bundle = enumerator.authenticate(&credentials()).await.unwrap();

        assert_eq!(bundle.get("c_user").unwrap().value(), "1000");
        assert!(bundle.get("xs").unwrap().http_only);
        assert!(bundle.get("datr").is_some());
    }

    #[tokio::test]
    async fn test_authenticate_without_session_cookie_is_rejected() {
        let server = MockServer::start().await;
        mount_login(&server, "/login.php", false).await;

        let enumerator = MobileSiteEnumerator::new(site(&server));
        let err = enumerator.authenticate(&credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { ref username } if username == "jane@example.com"));
    }

    #[tokio::test]
    async fn test_authenticate_checkpoint_is_challenge() {
        let server = MockServer::start().await;
        mount_login(&server, "/checkpoint/", true).await;

        let enumerator = MobileSiteEnumerator::new(site(&server));
        let err = enumerator.authenticate(&credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::Challenge { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_without_form() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let enumerator = MobileSiteEnumerator::new(site(&server));
        let err = enumerator.authenticate(&credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::LoginFormNotFound { .. }));
    }

    #[tokio::test]
    async fn test_next_page_after_login_lists_media_links() {
        let server = MockServer::start().await;
        mount_login(&server, "/home.php", true).await;
        Mock::given(method("GET"))
            .and(path("/1000/tagged"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/photo.php?fbid=1&amp;id=9">a</a>
                   <a href="/photo.php?fbid=1&amp;id=9">dup</a>
                   <a href="/jane/videos/55/">v</a>
                   <a href="/home.php">home</a>
                   <a href="https://elsewhere.example/photo.php?fbid=2">off-site</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1000/tagged"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let enumerator = MobileSiteEnumerator::new(site(&server));
        enumerator.authenticate(&credentials()).await.unwrap();

        let refs = enumerator.next_page(0).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs[0].as_str().ends_with("/photo.php?fbid=1&id=9"));
        assert!(refs[1].as_str().ends_with("/jane/videos/55/"));
        assert!(enumerator.next_page(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_next_page_with_adopted_bundle_sends_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/42/tagged"))
            .and(wiremock::matchers::header("cookie", "c_user=42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="/photo.php?fbid=7">x</a>"#))
            .mount(&server)
            .await;

        let enumerator = MobileSiteEnumerator::new(site(&server));
        enumerator.adopt_session(&SessionBundle::new([
            SessionCookie::new("c_user", "42", "127.0.0.1").host_only(),
        ]))
        .unwrap();
        let refs = enumerator.next_page(0).await.unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[tokio::test]
    async fn test_adopt_session_without_account_cookie_is_error() {
        let server = MockServer::start().await;
        let enumerator = MobileSiteEnumerator::new(site(&server));
        let err = enumerator
            .adopt_session(&SessionBundle::new([
                SessionCookie::new("xs", "secret", "127.0.0.1").host_only(),
            ]))
            .unwrap_err();

        assert!(matches!(err, AuthError::MissingSessionCookie { name } if name == "c_user"));
        assert!(matches!(
            enumerator.next_page(0).await.unwrap_err(),
            EnumerateError::NotAuthenticated
        ));
    }

    #[tokio::test]
    async fn test_next_page_before_session_is_error() {
        let server = MockServer::start().await;
        let enumerator = MobileSiteEnumerator::new(site(&server));
        assert!(matches!(
            enumerator.next_page(0).await.unwrap_err(),
            EnumerateError::NotAuthenticated
        ));
    }

    #[test]
    fn test_listing_url_fills_placeholders() {
        let config = SiteConfig::new(Url::parse("https://m.example.com").unwrap());
        assert_eq!(
            config.listing_url("1000", 20).unwrap().as_str(),
            "https://m.example.com/profile.php?id=1000&v=photos&sk=photos_of&offset=20"
        );
    }
}
