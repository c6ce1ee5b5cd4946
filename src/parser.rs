//! The "parse raw HTML -> structured record" collaborator, treated as swappable behind
//! one trait. This module restores a minimal concrete schema and one implementation,
//! grounded in `original_source/src/crawler/parser.py`.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};

use crate::model::{ImageCandidate, PageRecord};

/// Capability set `{parse(url, html) -> PageRecord}`. Worker depends only on this
/// trait; site-specific extractors can be added without touching Worker.
pub trait PageParser: Send + Sync {
    fn parse(&self, url: &str, html: &str) -> Result<PageRecord, String>;
}

const META_DATE_CANDIDATES: &[(&str, &str)] = &[
    ("property", "article:published_time"),
    ("name", "pubdate"),
    ("name", "date"),
    ("itemprop", "datePublished"),
];

/// A general-purpose parser using `scraper`, grounded in `PageParser.parse` /
/// `_extract_date` / `_extract_category` from the original.
pub struct DefaultPageParser;

impl PageParser for DefaultPageParser {
    fn parse(&self, url: &str, html: &str) -> Result<PageRecord, String> {
        let document = Html::parse_document(html);

        let title = extract_title(&document);
        let content = extract_text(&document);
        let published_at = extract_published_at(&document);
        let category = extract_category(url, &document);
        let links = extract_raw_links(&document);
        let images = extract_images(&document);

        Ok(PageRecord {
            url: url.to_string(),
            title,
            content,
            category,
            published_at,
            links,
            images,
        })
    }
}

fn extract_title(document: &Html) -> String {
    let selector = Selector::parse("title").expect("valid selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No Title".to_string())
}

const EXCLUDED_TEXT_TAGS: &[&str] = &["script", "style", "nav", "footer", "header"];

fn extract_text(document: &Html) -> String {
    let mut text = String::new();
    for node in document.root_element().descendants() {
        let Some(text_node) = node.value().as_text() else {
            continue;
        };
        let under_excluded_tag = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| EXCLUDED_TEXT_TAGS.contains(&el.name()))
                .unwrap_or(false)
        });
        if !under_excluded_tag {
            text.push_str(text_node);
            text.push(' ');
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_published_at(document: &Html) -> Option<DateTime<Utc>> {
    let meta_selector = Selector::parse("meta").expect("valid selector");
    for (attr, value) in META_DATE_CANDIDATES {
        for el in document.select(&meta_selector) {
            if el.value().attr(attr) == Some(*value) {
                if let Some(content) = el.value().attr("content") {
                    if let Ok(parsed) = DateTime::parse_from_rfc3339(content) {
                        return Some(parsed.with_timezone(&Utc));
                    }
                }
            }
        }
    }
    None
}

fn extract_category(url: &str, document: &Html) -> String {
    let meta_selector = Selector::parse(r#"meta"#).expect("valid selector");
    for el in document.select(&meta_selector) {
        if el.value().attr("property") == Some("article:section") {
            if let Some(content) = el.value().attr("content") {
                if !content.is_empty() {
                    return content.to_string();
                }
            }
        }
    }

    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(segment) = parsed.path_segments().and_then(|mut s| s.next()) {
            if segment.len() > 2 {
                return segment.to_string();
            }
        }
    }
    "general".to_string()
}

fn extract_raw_links(document: &Html) -> Vec<String> {
    let selector = Selector::parse("a").expect("valid selector");
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href").map(|h| h.to_string()))
        .collect()
}

fn extract_images(document: &Html) -> Vec<ImageCandidate> {
    let selector = Selector::parse("img").expect("valid selector");
    document
        .select(&selector)
        .enumerate()
        .filter_map(|(position, el)| {
            el.value().attr("src").map(|src| ImageCandidate {
                url: src.to_string(),
                alt: el.value().attr("alt").map(|a| a.to_string()),
                position: position as u32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_text_and_category_from_path() {
        let html = r#"
            <html><head><title> Example Page </title></head>
            <body><p>Hello world</p></body></html>
        "#;
        let record = DefaultPageParser
            .parse("https://x.com/news/story", html)
            .unwrap();
        assert_eq!(record.title, "Example Page");
        assert!(record.content.contains("Hello world"));
        assert_eq!(record.category, "news");
    }

    #[test]
    fn falls_back_to_general_category_without_hints() {
        let record = DefaultPageParser.parse("https://x.com/", "<html></html>").unwrap();
        assert_eq!(record.category, "general");
    }

    #[test]
    fn strips_script_and_nav_text() {
        let html = r#"
            <html><body>
                <nav>Home About</nav>
                <script>var x = 1;</script>
                <p>Real content here</p>
            </body></html>
        "#;
        let record = DefaultPageParser.parse("https://x.com/", html).unwrap();
        assert_eq!(record.content, "Real content here");
    }

    #[test]
    fn missing_title_yields_placeholder() {
        let record = DefaultPageParser
            .parse("https://x.com/a", "<html><body>text</body></html>")
            .unwrap();
        assert_eq!(record.title, "No Title");
    }

    #[test]
    fn collects_image_candidates_with_position() {
        let html = r#"<img src="/a.png" alt="first"><img src="/b.png">"#;
        let record = DefaultPageParser.parse("https://x.com/", html).unwrap();
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.images[0].position, 0);
        assert_eq!(record.images[0].alt.as_deref(), Some("first"));
        assert_eq!(record.images[1].alt, None);
    }
}
