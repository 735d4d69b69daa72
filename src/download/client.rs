//! HTTP client wrapper used for pages, interstitials and assets.
//!
//! One [`HttpClient`] is built per worker (page client with its own cookie
//! jar) plus a jar-less one for asset downloads. Session cookies captured from
//! a page are attached explicitly to interstitial and asset requests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, redirect};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, MAX_REDIRECTS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::session::SessionCookies;
use crate::user_agent;

/// Construction options for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Longest wait for the next chunk of a response. A slow transfer that
    /// keeps making progress never hits it.
    pub read_timeout: Duration,
    /// Follow HTTP redirects automatically.
    pub follow_redirects: bool,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            follow_redirects: true,
            user_agent: user_agent::default_download_user_agent(),
        }
    }
}

impl ClientOptions {
    /// Options for page navigation: mobile browser User-Agent.
    #[must_use]
    pub fn for_pages() -> Self {
        Self {
            user_agent: user_agent::PAGE_USER_AGENT.to_string(),
            ..Self::default()
        }
    }

    /// Overrides the connect and read-idle timeouts (seconds).
    #[must_use]
    pub fn with_timeouts(mut self, connect_secs: u64, read_secs: u64) -> Self {
        self.connect_timeout = Duration::from_secs(connect_secs);
        self.read_timeout = Duration::from_secs(read_secs);
        self
    }

    /// Disables automatic redirect following.
    #[must_use]
    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

/// A fetched HTML (or other text) document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: Url,
    /// `Content-Type` response header, if any.
    pub content_type: Option<String>,
    /// Decoded body.
    pub body: String,
}

/// A fetched binary asset held in memory.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    /// URL after redirects.
    pub final_url: Url,
    /// `Content-Type` response header, if any.
    pub content_type: Option<String>,
    /// Raw body.
    pub bytes: Bytes,
}

/// HTTP client with timeout configuration and status-aware errors.
///
/// Cloning is cheap and shares the connection pool (and cookie jar, if any).
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client without a cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if reqwest cannot build the client.
    pub fn new(options: &ClientOptions) -> Result<Self, DownloadError> {
        build_client(None, options).map(|client| Self { client })
    }

    /// Creates a client whose requests read and update `cookie_jar`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if reqwest cannot build the client.
    #[instrument(level = "debug", skip(cookie_jar))]
    pub fn with_cookie_jar(
        cookie_jar: Arc<Jar>,
        options: &ClientOptions,
    ) -> Result<Self, DownloadError> {
        build_client(Some(cookie_jar), options).map(|client| Self { client })
    }

    /// Sends a GET and fails on non-success status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`]/[`DownloadError::Timeout`] on transport
    /// failure and [`DownloadError::HttpStatus`] for 4xx/5xx responses.
    pub async fn get(
        &self,
        url: &Url,
        cookies: Option<&SessionCookies>,
    ) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(url.clone());
        if let Some(cookies) = cookies {
            request = request.header(COOKIE, cookies.header_value().clone());
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "non-success status");
            return Err(DownloadError::http_status(url.as_str(), status.as_u16()));
        }
        Ok(response)
    }

    /// Fetches a text document.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get`], plus body read failures.
    #[instrument(level = "debug", skip(self, cookies), fields(url = %url))]
    pub async fn get_text(
        &self,
        url: &Url,
        cookies: Option<&SessionCookies>,
    ) -> Result<FetchedPage, DownloadError> {
        let response = self.get(url, cookies).await?;
        let final_url = response.url().clone();
        let content_type = content_type_of(&response);
        let body = response
            .text()
            .await
            .map_err(|e| DownloadError::from_reqwest(url.as_str(), e))?;
        Ok(FetchedPage {
            final_url,
            content_type,
            body,
        })
    }

    /// Fetches a binary asset into memory.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get`], plus body read failures.
    #[instrument(level = "debug", skip(self, cookies), fields(url = %url))]
    pub async fn get_bytes(
        &self,
        url: &Url,
        cookies: Option<&SessionCookies>,
    ) -> Result<FetchedAsset, DownloadError> {
        let response = self.get(url, cookies).await?;
        let final_url = response.url().clone();
        let content_type = content_type_of(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::from_reqwest(url.as_str(), e))?;
        Ok(FetchedAsset {
            final_url,
            content_type,
            bytes,
        })
    }

    /// Returns a reference to the underlying reqwest client.
    ///
    /// This can be used for advanced operations not covered by this wrapper.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn content_type_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Streams a response body to `file`, returning bytes written.
///
/// The caller owns cleanup of `file_path` on error.
pub(crate) async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::from_reqwest(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

fn build_client(
    cookie_jar: Option<Arc<Jar>>,
    options: &ClientOptions,
) -> Result<Client, DownloadError> {
    let redirect_policy = if options.follow_redirects {
        redirect::Policy::limited(MAX_REDIRECTS)
    } else {
        redirect::Policy::none()
    };
    let mut builder = Client::builder()
        .connect_timeout(options.connect_timeout)
        .read_timeout(options.read_timeout)
        .gzip(true)
        .redirect(redirect_policy)
        .user_agent(options.user_agent.clone());
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    builder
        .build()
        .map_err(|source| DownloadError::Client { source })
}
