//! Same-host, schema-valid, normalized outbound link discovery.
//!
//! Grounded in `crawly.rs`'s `Crawler::extract_links` (`scraper::{Html, Selector}` over
//! all `<a href>`), generalized to a fuller filter set and cross-checked against
//! `original_source/src/crawler/link_extractor.py`.

use indexmap::IndexSet;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

const EXCLUDED_PATH_KEYWORDS: &[&str] = &["/login", "/logout", "/signout", "/admin"];

pub struct LinkExtractor {
    base: Url,
    host: String,
    excluded_paths: Regex,
}

impl LinkExtractor {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(base_url)?;
        let host = base.host_str().unwrap_or_default().to_string();
        let pattern = EXCLUDED_PATH_KEYWORDS
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let excluded_paths = Regex::new(&pattern).expect("excluded-path pattern is valid");
        Ok(Self {
            base,
            host,
            excluded_paths,
        })
    }

    /// Returns a deduplicated, insertion-ordered collection of absolute URLs that
    /// share the base host, use `http`/`https`, are not `mailto:`/`tel:`/`javascript:`/
    /// fragment-only, don't match an excluded path, and have their fragment stripped
    /// (query preserved).
    pub fn extract(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("a").expect("'a' is a valid CSS selector");

        let mut links: IndexSet<String> = IndexSet::new();

        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if self.is_ignored_scheme(href) {
                continue;
            }
            let Ok(absolute) = self.base.join(href) else {
                continue;
            };
            if !self.is_valid_target(&absolute) {
                continue;
            }
            links.insert(self.normalize(absolute));
        }

        links.into_iter().collect()
    }

    fn is_ignored_scheme(&self, href: &str) -> bool {
        let trimmed = href.trim().to_lowercase();
        trimmed.starts_with("mailto:")
            || trimmed.starts_with("tel:")
            || trimmed.starts_with("javascript:")
            || trimmed.starts_with('#')
            || trimmed.is_empty()
    }

    fn is_valid_target(&self, url: &Url) -> bool {
        if url.host_str() != Some(self.host.as_str()) {
            return false;
        }
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        if self.excluded_paths.is_match(&url.path().to_lowercase()) {
            return false;
        }
        true
    }

    fn normalize(&self, mut url: Url) -> String {
        url.set_fragment(None);
        url.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_same_host_links_only() {
        let extractor = LinkExtractor::new("https://x.com/").unwrap();
        let html = r#"
            <a href="/p1">p1</a>
            <a href="https://other.com/p2">p2</a>
            <a href="https://x.com/p3#frag">p3</a>
        "#;
        let links = extractor.extract(html);
        assert_eq!(links, vec!["https://x.com/p1", "https://x.com/p3"]);
    }

    #[test]
    fn skips_ignored_schemes_and_excluded_paths() {
        let extractor = LinkExtractor::new("https://x.com/").unwrap();
        let html = r#"
            <a href="mailto:a@b.com">mail</a>
            <a href="tel:12345">tel</a>
            <a href="javascript:void(0)">js</a>
            <a href="#top">frag</a>
            <a href="/admin/panel">admin</a>
            <a href="/login">login</a>
        "#;
        assert!(extractor.extract(html).is_empty());
    }

    #[test]
    fn preserves_query_strips_fragment() {
        let extractor = LinkExtractor::new("https://x.com/").unwrap();
        let html = r#"<a href="/search?q=rust#section">s</a>"#;
        assert_eq!(extractor.extract(html), vec!["https://x.com/search?q=rust"]);
    }

    #[test]
    fn deduplicates_preserving_insertion_order() {
        let extractor = LinkExtractor::new("https://x.com/").unwrap();
        let html = r#"<a href="/a">a</a><a href="/b">b</a><a href="/a">a again</a>"#;
        assert_eq!(extractor.extract(html), vec!["https://x.com/a", "https://x.com/b"]);
    }
}
