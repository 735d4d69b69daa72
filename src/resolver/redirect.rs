//! Interstitial redirect resolution.
//!
//! A "view full size" link may point at an interstitial page that sends the
//! browser on with a `<meta http-equiv="refresh" content="0;url=...">` tag.
//! The first `;url=` target, HTML-unescaped, is the real asset URL.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};
use url::Url;

use super::error::ResolveError;
use super::utils::{absolutize_url, compile_static_regex};
use crate::download::{HttpClient, RetryPolicy};
use crate::session::SessionCookies;

static REFRESH_TARGET: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i);\s*url=(.+?)["']"#));

/// How the asset reference scraped from a photo page becomes a final URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RedirectStrategy {
    /// Fetch the reference and follow its `;url=` refresh target.
    #[default]
    Interstitial,
    /// Treat the reference as the final asset URL.
    Direct,
}

/// Extracts the first `;url=` target from an interstitial body.
///
/// Relative targets are resolved against `base`.
#[must_use]
pub fn extract_redirect_target(body: &str, base: &Url) -> Option<Url> {
    let raw = REFRESH_TARGET.captures(body)?.get(1)?.as_str();
    let decoded = html_escape::decode_html_entities(raw);
    absolutize_url(&decoded, base)
}

/// Fetches an interstitial with the session's cookies and returns the asset URL it points to.
///
/// A response that is already image or video bytes (the site answered with an
/// HTTP redirect) resolves to its final URL without reading the body.
///
/// # Errors
///
/// Returns [`ResolveError::Fetch`] when the interstitial cannot be loaded after
/// retries, and [`ResolveError::RedirectResolution`] when it carries no target.
#[instrument(level = "debug", skip(client, cookies, retry), fields(url = %interstitial))]
pub async fn resolve_redirect(
    client: &HttpClient,
    interstitial: &Url,
    cookies: Option<&SessionCookies>,
    retry: &RetryPolicy,
) -> Result<Url, ResolveError> {
    let response = retry
        .run("interstitial", || client.get(interstitial, cookies))
        .await
        .map_err(|e| ResolveError::fetch(interstitial.as_str(), e))?
        .value;

    let final_url = response.url().clone();
    let is_media = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("image/") || ct.starts_with("video/"));
    if is_media {
        debug!(final_url = %final_url, "interstitial redirected straight to media");
        return Ok(final_url);
    }

    let body = response
        .text()
        .await
        .map_err(|e| ResolveError::redirect(interstitial.as_str(), e.to_string()))?;
    let target = extract_redirect_target(&body, &final_url).ok_or_else(|| {
        ResolveError::redirect(interstitial.as_str(), "no ;url= refresh target in body")
    })?;
    debug!(target = %target, "resolved interstitial");
    Ok(target)
}
