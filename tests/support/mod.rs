//! Shared fixtures for integration tests: a mock mobile site and a scripted enumerator.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvest_core::enumerator::{AuthError, Credentials, EnumerateError, PageEnumerator};
use harvest_core::pipeline::PipelineConfig;
use harvest_core::pool::Throttle;
use harvest_core::queue::PageRef;
use harvest_core::session::{SessionBundle, SessionCookie};

/// Smallest JPEG the container parser accepts: SOI, JFIF APP0, SOS, EOI.
pub fn tiny_jpeg() -> Vec<u8> {
    vec![
        0xFF, 0xD8, // SOI
        0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
        0x00, 0x01, 0x00, 0x00, // APP0
        0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, // SOS
        0x12, 0x34, 0x56, // scan data
        0xFF, 0xD9, // EOI
    ]
}

/// Session issued by [`ScriptedEnumerator::authenticate`], scoped to the mock host.
pub fn session_bundle() -> SessionBundle {
    SessionBundle::new([SessionCookie::new("c_user", "1000", "127.0.0.1").host_only()])
}

/// Mounts the site root every worker visits before installing its session.
pub async fn mount_root(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>home</html>"))
        .mount(server)
        .await;
}

/// Mounts photo `id`: detail page, interstitial and asset `/cdn/{id}_99_n.jpg`.
pub async fn mount_photo(server: &MockServer, id: u32) {
    Mock::given(method("GET"))
        .and(path("/photo.php"))
        .and(query_param("fbid", id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><head><meta property="og:type" content="article"></head><body>
                 <strong class="actor">Jane Q</strong>
                 <div><span id="voice_replace_id"></span>Photo number {id}</div>
                 <abbr>2023-01-02</abbr>
                 <a href="/view_full_size/?fbid={id}">View full size</a>
               </body></html>"#
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/view_full_size/"))
        .and(query_param("fbid", id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><head><meta http-equiv="refresh" content="0;url={}/cdn/{id}_99_n.jpg?oh=a&amp;oe=b"></head></html>"#,
            server.uri()
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/cdn/{id}_99_n.jpg")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(tiny_jpeg()),
        )
        .mount(server)
        .await;
}

/// Mounts video `id`: detail page and asset `/cdn/clip_{id}.mp4`.
pub async fn mount_video(server: &MockServer, id: u32) {
    Mock::given(method("GET"))
        .and(path("/video.php"))
        .and(query_param("v", id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><head>
                 <meta property="og:type" content="video.other">
                 <meta property="og:video" content="{}/cdn/clip_{id}.mp4">
               </head><body>
                 <strong class="actor">Sam</strong>
                 <div aria-label="Clip {id}"></div>
                 <abbr>Yesterday</abbr>
               </body></html>"#,
            server.uri()
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/cdn/clip_{id}.mp4")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(format!("video-{id}").into_bytes()),
        )
        .mount(server)
        .await;
}

pub fn photo_ref(server: &MockServer, id: u32) -> PageRef {
    PageRef::new(format!("{}/photo.php?fbid={id}&set=t.1000", server.uri()))
}

pub fn video_ref(server: &MockServer, id: u32) -> PageRef {
    PageRef::new(format!("{}/video.php?v={id}", server.uri()))
}

/// Number of requests the server saw for paths starting with `prefix`.
pub async fn requests_under(server: &MockServer, prefix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path().starts_with(prefix))
        .count()
}

/// Pipeline configuration against `server` with throttling off and one retry attempt.
pub fn pipeline_config(server: &MockServer, dir: &std::path::Path, workers: usize) -> PipelineConfig {
    let mut config = PipelineConfig::new(dir, Url::parse(&server.uri()).unwrap());
    config.workers = workers;
    config.worker.throttle = Throttle::disabled();
    config.worker.retry = harvest_core::RetryPolicy::with_max_attempts(1);
    config
}

/// Enumerator serving a fixed offset → page map and recording the offsets asked for.
pub struct ScriptedEnumerator {
    pages: HashMap<usize, Vec<PageRef>>,
    requested: Mutex<Vec<usize>>,
}

impl ScriptedEnumerator {
    /// Splits `refs` into consecutive pages of `page_size`.
    pub fn paged(refs: Vec<PageRef>, page_size: usize) -> Self {
        let pages = refs
            .chunks(page_size)
            .enumerate()
            .map(|(i, chunk)| (i * page_size, chunk.to_vec()))
            .collect();
        Self {
            pages,
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Adds (or replaces) the page served at `offset`.
    pub fn with_page(mut self, offset: usize, refs: Vec<PageRef>) -> Self {
        self.pages.insert(offset, refs);
        self
    }

    pub fn requested(&self) -> Vec<usize> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageEnumerator for ScriptedEnumerator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionBundle, AuthError> {
        if credentials.password() == "wrong" {
            return Err(AuthError::Rejected {
                username: credentials.username().to_string(),
            });
        }
        Ok(session_bundle())
    }

    fn adopt_session(&self, bundle: &SessionBundle) -> Result<(), AuthError> {
        match bundle.get("c_user") {
            Some(_) => Ok(()),
            None => Err(AuthError::MissingSessionCookie {
                name: "c_user".to_string(),
            }),
        }
    }

    async fn next_page(&self, offset: usize) -> Result<Vec<PageRef>, EnumerateError> {
        self.requested.lock().unwrap().push(offset);
        Ok(self.pages.get(&offset).cloned().unwrap_or_default())
    }
}
