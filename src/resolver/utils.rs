//! Shared helpers for page extraction: static regex/selector compilation, text
//! normalization and URL absolutization.

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Compiles a CSS selector at static init; panics on invalid selector.
pub fn compile_static_selector(selector: &str) -> Selector {
    Selector::parse(selector)
        .unwrap_or_else(|e| panic!("invalid static selector '{selector}': {e:?}"))
}

/// Returns the element's text content with whitespace runs collapsed.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves a possibly relative URL string against a base URL.
///
/// Normalizes protocol-relative `//...` to the base scheme.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<Url> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    base_url.join(value).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scraper::Html;

    use super::*;

    #[test]
    fn test_element_text_collapses_whitespace() {
        let html = Html::parse_fragment("<div>  hello \n <b>big</b>\tworld </div>");
        let selector = compile_static_selector("div");
        let div = html.select(&selector).next().unwrap();
        assert_eq!(element_text(div), "hello big world");
    }

    #[test]
    fn test_absolutize_url_variants() {
        let base = Url::parse("https://m.example.com/photo.php?fbid=1").unwrap();
        assert_eq!(
            absolutize_url("/view_full_size/?fbid=1", &base).unwrap().as_str(),
            "https://m.example.com/view_full_size/?fbid=1"
        );
        assert_eq!(
            absolutize_url("//cdn.example.net/a.jpg", &base).unwrap().as_str(),
            "https://cdn.example.net/a.jpg"
        );
        assert_eq!(
            absolutize_url("https://cdn.example.net/b.jpg", &base).unwrap().as_str(),
            "https://cdn.example.net/b.jpg"
        );
        assert!(absolutize_url("  ", &base).is_none());
    }
}
