//! Catalog entry model.

use crate::opds::{self, Link};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Author recorded when a format carries no metadata.
pub const UNKNOWN_AUTHOR: &str = "Unknown author";

/// A cover image extracted from a book, stored by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverAsset {
    /// File name inside the cover directory (`<sha1-hex><ext>`).
    pub filename: String,

    /// MIME type of the image.
    pub mime_type: String,
}

/// One book or file in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable URN identifier.
    pub id: String,

    /// Book title.
    pub title: String,

    /// Author name (may be empty).
    pub author: String,

    /// Language code as written in the book (may be empty).
    pub language: String,

    /// Summary or description (may be empty).
    pub summary: String,

    /// Publication date, free text (may be empty).
    pub date: String,

    /// Path relative to the book root, `/`-separated.
    pub source_path: String,

    /// MIME type of the source file.
    pub content_type: String,

    /// Extracted cover, if any.
    pub cover: Option<CoverAsset>,

    /// File modification time at import.
    pub updated: DateTime<Utc>,
}

impl CatalogEntry {
    /// Create an entry titled after the file stem, with every other field empty.
    pub fn from_filename(source_path: &str, content_type: impl Into<String>) -> Self {
        let title = Path::new(source_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source_path)
            .to_string();

        Self {
            id: String::new(),
            title,
            author: String::new(),
            language: String::new(),
            summary: String::new(),
            date: String::new(),
            source_path: source_path.to_string(),
            content_type: content_type.into(),
            cover: None,
            updated: Utc::now(),
        }
    }

    /// Acquisition and cover links under the given mount root.
    ///
    /// `root` must already be normalized (see [`crate::config::normalize_root`]).
    pub fn links(&self, root: &str) -> Vec<Link> {
        let mut links = vec![Link {
            rel: opds::REL_ACQUISITION.to_string(),
            href: format!("{}/books/{}", root, self.source_path),
            link_type: self.content_type.clone(),
            title: None,
        }];

        if let Some(cover) = &self.cover {
            let href = format!("{}/covers/{}", root, cover.filename);
            links.push(Link {
                rel: opds::REL_IMAGE.to_string(),
                href: href.clone(),
                link_type: cover.mime_type.clone(),
                title: None,
            });
            links.push(Link {
                rel: opds::REL_THUMBNAIL.to_string(),
                href,
                link_type: cover.mime_type.clone(),
                title: None,
            });
        }

        links
    }

    /// Feed entry for this book.
    pub fn to_feed_entry(&self, root: &str) -> opds::Entry {
        opds::Entry {
            id: self.id.clone(),
            title: self.title.clone(),
            updated: self.updated,
            authors: if self.author.is_empty() {
                Vec::new()
            } else {
                vec![self.author.clone()]
            },
            summary: non_empty(&self.summary),
            language: non_empty(&self.language),
            issued: non_empty(&self.date),
            links: self.links(root),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CatalogEntry {
        let mut entry = CatalogEntry::from_filename("fiction/dune.epub", "application/epub+zip");
        entry.id = "urn:sha1:ABC".to_string();
        entry
    }

    #[test]
    fn test_from_filename_strips_extension() {
        let entry = sample();
        assert_eq!(entry.title, "dune");
        assert_eq!(entry.source_path, "fiction/dune.epub");
    }

    #[test]
    fn test_links_without_cover() {
        let links = sample().links("/opds");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel, opds::REL_ACQUISITION);
        assert_eq!(links[0].href, "/opds/books/fiction/dune.epub");
        assert_eq!(links[0].link_type, "application/epub+zip");
    }

    #[test]
    fn test_links_with_cover() {
        let mut entry = sample();
        entry.cover = Some(CoverAsset {
            filename: "abcd.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
        });

        let links = entry.links("");
        assert_eq!(links[0].href, "/books/fiction/dune.epub");
        assert_eq!(links[1].rel, opds::REL_IMAGE);
        assert_eq!(links[1].href, "/covers/abcd.jpg");
        assert_eq!(links[2].rel, opds::REL_THUMBNAIL);
    }

    #[test]
    fn test_feed_entry_skips_empty_fields() {
        let entry = sample().to_feed_entry("");
        assert!(entry.authors.is_empty());
        assert!(entry.summary.is_none());
        assert!(entry.language.is_none());
    }
}
