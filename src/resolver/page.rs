//! Detail page extraction.
//!
//! Turns the HTML of one tagged-media page into a [`ScrapedMedia`] record. The
//! page is classified by its `og:type` descriptor (or an embedded `<video>`),
//! then the kind-specific fields are looked up with CSS selectors.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::error::ResolveError;
use super::utils::{absolutize_url, compile_static_selector, element_text};
use super::{MediaDetails, MediaItem, MediaKind};
use crate::queue::PageRef;

static OG_TYPE: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"meta[property="og:type"]"#));
static VIDEO_ELEMENT: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("video"));
static ACTOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("strong.actor"));
static DATE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("abbr"));
static LINKS: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a[href]"));
static CAPTION_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("#voice_replace_id"));
static ARIA_LABEL: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("[aria-label]:not(video)"));
static OG_VIDEO: LazyLock<Selector> = LazyLock::new(|| {
    compile_static_selector(
        r#"meta[property="og:video:secure_url"], meta[property="og:video:url"], meta[property="og:video"]"#,
    )
});
static VIDEO_SOURCE: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("video[src], video source[src]"));
static MP4_LINK: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"a[href*=".mp4"]"#));

/// Link text of the photo's original-size asset reference.
const FULL_SIZE_LINK_TEXT: &str = "view full size";

/// Fields scraped from a detail page, before the asset reference is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedMedia {
    /// Photo or video.
    pub kind: MediaKind,
    /// Tagging/posting user (may be empty).
    pub actor: String,
    /// Caption (may be empty).
    pub caption: String,
    /// Site-reported date text.
    pub date: String,
    /// Asset reference: an interstitial for photos, a direct URL for videos.
    pub asset_ref: Url,
}

impl ScrapedMedia {
    /// Builds the [`MediaItem`] once the final asset URL is known.
    #[must_use]
    pub fn into_item(self, asset_url: Url, source_page: PageRef) -> MediaItem {
        let details = MediaDetails {
            actor: self.actor,
            caption: self.caption,
            date: self.date,
            asset_url,
            source_page,
        };
        match self.kind {
            MediaKind::Photo => MediaItem::Photo(details),
            MediaKind::Video => MediaItem::Video(details),
        }
    }
}

/// Classifies and scrapes a detail page.
///
/// `page_url` is the URL the HTML was served from (after redirects) and
/// anchors relative links.
///
/// # Errors
///
/// Returns [`ResolveError::ElementNotFound`] when the date or the asset
/// reference is missing.
pub fn scrape_media_page(
    html: &str,
    page_url: &Url,
    page: &PageRef,
) -> Result<ScrapedMedia, ResolveError> {
    let document = Html::parse_document(html);
    match classify(&document) {
        MediaKind::Photo => scrape_photo(&document, page_url, page),
        MediaKind::Video => scrape_video(&document, page_url, page),
    }
}

fn classify(document: &Html) -> MediaKind {
    let declared = document
        .select(&OG_TYPE)
        .filter_map(|meta| meta.value().attr("content"))
        .next();
    match declared {
        Some(kind) if kind.trim().to_ascii_lowercase().starts_with("video") => MediaKind::Video,
        Some(_) => MediaKind::Photo,
        None if document.select(&VIDEO_ELEMENT).next().is_some() => MediaKind::Video,
        None => MediaKind::Photo,
    }
}

fn scrape_photo(
    document: &Html,
    page_url: &Url,
    page: &PageRef,
) -> Result<ScrapedMedia, ResolveError> {
    let asset_ref = document
        .select(&LINKS)
        .find(|a| element_text(*a).eq_ignore_ascii_case(FULL_SIZE_LINK_TEXT))
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| absolutize_url(href, page_url))
        .ok_or_else(|| ResolveError::element_not_found(page.as_str(), "\"View full size\" link"))?;

    let caption = document
        .select(&CAPTION_ANCHOR)
        .next()
        .and_then(|anchor| anchor.parent())
        .and_then(ElementRef::wrap)
        .map(element_text)
        .unwrap_or_default();

    Ok(ScrapedMedia {
        kind: MediaKind::Photo,
        actor: actor(document),
        caption: augment_caption(caption, page.stable_id().as_deref()),
        date: date(document, page)?,
        asset_ref,
    })
}

fn scrape_video(
    document: &Html,
    page_url: &Url,
    page: &PageRef,
) -> Result<ScrapedMedia, ResolveError> {
    let asset_ref = document
        .select(&OG_VIDEO)
        .filter_map(|meta| meta.value().attr("content"))
        .chain(
            document
                .select(&VIDEO_SOURCE)
                .filter_map(|el| el.value().attr("src")),
        )
        .chain(
            document
                .select(&MP4_LINK)
                .filter_map(|a| a.value().attr("href")),
        )
        .find_map(|candidate| absolutize_url(candidate, page_url))
        .ok_or_else(|| ResolveError::element_not_found(page.as_str(), "video source"))?;

    let caption = document
        .select(&ARIA_LABEL)
        .filter_map(|el| el.value().attr("aria-label"))
        .map(str::trim)
        .find(|label| !label.is_empty())
        .unwrap_or_default()
        .to_string();

    Ok(ScrapedMedia {
        kind: MediaKind::Video,
        actor: actor(document),
        caption,
        date: date(document, page)?,
        asset_ref,
    })
}

fn actor(document: &Html) -> String {
    document
        .select(&ACTOR)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

fn date(document: &Html, page: &PageRef) -> Result<String, ResolveError> {
    document
        .select(&DATE)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ResolveError::element_not_found(page.as_str(), "date (abbr)"))
}

/// Appends the page's stable id to the caption: `caption [id]`.
fn augment_caption(caption: String, stable_id: Option<&str>) -> String {
    match stable_id {
        Some(id) if caption.is_empty() => format!("[{id}]"),
        Some(id) => format!("{caption} [{id}]"),
        None => caption,
    }
}
