//! Upserts pages, associated images, and recomputed search text transactionally.
//!
//! Image hashing and representative-image selection are grounded in
//! `original_source/src/indexer/image_selector.py`; the transactional upsert itself is
//! delegated to [`Repository::upsert_page`] so all durable mutation routes through one
//! place.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;
use crate::model::{ImageAsset, ImageCandidate, PageImageLink, PageRecord, PageUpsert};
use crate::repository::Repository;

pub struct Indexer<R: Repository> {
    repository: R,
}

impl<R: Repository> Indexer<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Builds a [`PageUpsert`] from a parsed [`PageRecord`] — hashing each image
    /// candidate's canonical (query-stripped) URL, joining `search_text` from title +
    /// content + image alt-texts — and writes it through the repository in one
    /// transaction.
    pub async fn index(&self, record: &PageRecord) -> Result<()> {
        let images: Vec<(ImageAsset, PageImageLink)> = record
            .images
            .iter()
            .map(|candidate| {
                let canonical_url = canonicalize_image_url(&candidate.url, &record.url);
                let hash = hash_canonical_url(&canonical_url);
                (
                    ImageAsset {
                        hash: hash.clone(),
                        canonical_url,
                    },
                    PageImageLink {
                        image_hash: hash,
                        alt: candidate.alt.clone(),
                        position: candidate.position,
                    },
                )
            })
            .collect();

        let representative_image_hash = select_representative_image(&record.images)
            .map(|idx| images[idx].0.hash.clone());

        let upsert = PageUpsert {
            url: record.url.clone(),
            title: record.title.clone(),
            content: record.content.clone(),
            category: record.category.clone(),
            published_at: record.published_at,
            images,
            representative_image_hash,
        };

        self.repository.upsert_page(&upsert).await
    }
}

/// Resolves an (possibly relative) image `src` against the page URL and strips its
/// query string, giving the stable identity used for content-address hashing.
fn canonicalize_image_url(src: &str, page_url: &str) -> String {
    let base = Url::parse(page_url).ok();
    let resolved = match &base {
        Some(base) => base.join(src).ok(),
        None => Url::parse(src).ok(),
    };

    match resolved {
        Some(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.into()
        }
        None => src.to_string(),
    }
}

fn hash_canonical_url(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Selects the representative image hash for a page: alt-text presence first
/// (alt longer than 5 characters counts as "meaningful"), then earliest position.
/// Restored from `ImageSelector.select_best_image`.
pub fn select_representative_image(candidates: &[ImageCandidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, candidate)| {
            let has_meaningful_alt = candidate
                .alt
                .as_ref()
                .map(|alt| alt.len() > 5)
                .unwrap_or(false);
            (if has_meaningful_alt { 0 } else { 1 }, candidate.position)
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(alt: Option<&str>, position: u32) -> ImageCandidate {
        ImageCandidate {
            url: format!("/img{position}.png"),
            alt: alt.map(|s| s.to_string()),
            position,
        }
    }

    #[test]
    fn prefers_meaningful_alt_over_earlier_position() {
        let candidates = vec![
            candidate(None, 0),
            candidate(Some("a detailed description"), 1),
        ];
        assert_eq!(select_representative_image(&candidates), Some(1));
    }

    #[test]
    fn falls_back_to_earliest_position_when_no_alt() {
        let candidates = vec![candidate(None, 2), candidate(None, 0), candidate(None, 1)];
        assert_eq!(select_representative_image(&candidates), Some(1));
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert_eq!(select_representative_image(&[]), None);
    }

    #[test]
    fn canonicalization_strips_query_and_fragment() {
        let canonical = canonicalize_image_url("/img.png?v=2#frag", "https://x.com/page");
        assert_eq!(canonical, "https://x.com/img.png");
    }

    #[test]
    fn hash_is_stable_for_same_canonical_url() {
        let a = hash_canonical_url("https://x.com/img.png");
        let b = hash_canonical_url("https://x.com/img.png");
        assert_eq!(a, b);
    }
}
