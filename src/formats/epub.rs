//! EPUB metadata reader.
//!
//! Opens the zip container, follows `META-INF/container.xml` to the package
//! document, parses its Dublin Core metadata and manifest, and pulls out the
//! declared cover image. Nothing here writes to disk.

use crate::error::{AppError, Result};
use crate::formats::xml::decode_document;
use crate::formats::{ImportContext, MAX_ENTRY_SIZE, read_capped};
use crate::library::CatalogEntry;
use roxmltree::Document;
use std::fs::File;
use std::path::Path;
use zip::ZipArchive;

/// MIME type of EPUB files.
pub const EPUB_MIME: &str = "application/epub+zip";

/// Location of the container document inside every EPUB.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// An item from the package manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestItem {
    /// Manifest id.
    pub id: String,
    /// Location relative to the package document.
    pub href: String,
    /// Declared media type.
    pub media_type: String,
    /// Space separated EPUB 3 properties.
    pub properties: String,
}

/// Metadata parsed from the package (OPF) document.
#[derive(Debug, Clone, Default)]
pub struct PackageMetadata {
    /// `dc:title`.
    pub title: String,
    /// `dc:creator` values joined with `, `.
    pub creator: String,
    /// `dc:language`.
    pub language: String,
    /// `dc:date`, free text.
    pub date: String,
    /// `dc:description`.
    pub description: String,
    /// Manifest items in document order.
    pub manifest: Vec<ManifestItem>,
    /// Manifest id named by `<meta name="cover" content="...">`.
    pub cover_id: Option<String>,
}

impl PackageMetadata {
    /// The manifest item holding the cover image, if one is declared.
    ///
    /// Checked in order: the EPUB 3 `cover-image` property, the EPUB 2
    /// `<meta name="cover">` reference, then an image item with id `cover`.
    pub fn cover_item(&self) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|item| {
                item.properties
                    .split_whitespace()
                    .any(|p| p == "cover-image")
            })
            .or_else(|| {
                let id = self.cover_id.as_deref()?;
                self.manifest.iter().find(|item| item.id == id)
            })
            .or_else(|| {
                self.manifest
                    .iter()
                    .find(|item| item.id == "cover" && item.media_type.starts_with("image/"))
            })
    }
}

/// Raw cover image bytes.
#[derive(Debug, Clone)]
pub struct CoverImage {
    /// Image bytes as stored in the archive.
    pub data: Vec<u8>,
    /// Media type declared in the manifest.
    pub media_type: String,
}

/// Everything read from one EPUB.
#[derive(Debug, Clone)]
pub struct EpubMetadata {
    /// Path of the package document inside the archive.
    pub package_path: String,
    /// Parsed package metadata.
    pub package: PackageMetadata,
    /// Cover image, when the manifest declares one.
    pub cover: Option<CoverImage>,
}

/// Read metadata and cover from the EPUB at `path`.
pub fn read_metadata(path: &Path) -> Result<EpubMetadata> {
    let file = File::open(path)
        .map_err(|e| AppError::Archive(format!("{}: {}", path.display(), e)))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| AppError::Archive(format!("{}: {}", path.display(), e)))?;

    let container = read_entry(&mut archive, CONTAINER_PATH).map_err(AppError::Metadata)?;
    let package_path = find_package_path(&decode_document(&container))?;

    let opf = read_entry(&mut archive, &package_path).map_err(AppError::Metadata)?;
    let package = parse_package(&decode_document(&opf))?;

    let cover = match package.cover_item() {
        Some(item) => {
            let entry_name = resolve_href(&package_path, &item.href);
            let data = read_entry(&mut archive, &entry_name).map_err(AppError::Cover)?;
            Some(CoverImage {
                data,
                media_type: item.media_type.clone(),
            })
        }
        None => None,
    };

    Ok(EpubMetadata {
        package_path,
        package,
        cover,
    })
}

/// Read one archive entry fully.
fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> std::result::Result<Vec<u8>, String> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| format!("{}: {}", name, e))?;
    let declared = file.size();
    read_capped(&mut file, declared, MAX_ENTRY_SIZE).map_err(|e| format!("{}: {}", name, e))
}

/// Find the package document path in container.xml.
fn find_package_path(container: &str) -> Result<String> {
    let doc = Document::parse(container)
        .map_err(|e| AppError::Metadata(format!("{}: {}", CONTAINER_PATH, e)))?;

    doc.descendants()
        .filter(|n| n.has_tag_name("rootfile"))
        .find_map(|n| n.attribute("full-path"))
        .map(|p| p.trim_start_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Metadata(format!("No rootfile in {}", CONTAINER_PATH)))
}

/// Parse the package document.
pub fn parse_package(content: &str) -> Result<PackageMetadata> {
    let doc = Document::parse(content)
        .map_err(|e| AppError::Metadata(format!("Package document: {}", e)))?;
    let mut pkg = PackageMetadata::default();
    let mut creators: Vec<String> = Vec::new();

    for node in doc.descendants().filter(|n| n.is_element()) {
        let in_metadata = node
            .parent_element()
            .is_some_and(|p| p.tag_name().name() == "metadata");

        match node.tag_name().name() {
            "title" if in_metadata => set_once(&mut pkg.title, node_text(&node)),
            "creator" if in_metadata => {
                let text = node_text(&node);
                if !text.is_empty() {
                    creators.push(text);
                }
            }
            "language" if in_metadata => set_once(&mut pkg.language, node_text(&node)),
            "date" if in_metadata => set_once(&mut pkg.date, node_text(&node)),
            "description" if in_metadata => set_once(&mut pkg.description, node_text(&node)),
            "meta" if node.attribute("name") == Some("cover") => {
                if pkg.cover_id.is_none() {
                    pkg.cover_id = node.attribute("content").map(String::from);
                }
            }
            "item" => {
                if let (Some(id), Some(href)) = (node.attribute("id"), node.attribute("href")) {
                    pkg.manifest.push(ManifestItem {
                        id: id.to_string(),
                        href: href.to_string(),
                        media_type: node.attribute("media-type").unwrap_or_default().to_string(),
                        properties: node.attribute("properties").unwrap_or_default().to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    pkg.creator = creators.join(", ");
    Ok(pkg)
}

fn node_text(node: &roxmltree::Node<'_, '_>) -> String {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn set_once(field: &mut String, value: String) {
    if field.is_empty() {
        *field = value;
    }
}

/// Resolve a manifest href against the package document's directory.
///
/// Hrefs are URL-encoded and relative to the package document, not to the
/// archive root.
pub fn resolve_href(package_path: &str, href: &str) -> String {
    let without_fragment = href.split('#').next().unwrap_or(href);
    let decoded = urlencoding::decode(without_fragment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| without_fragment.to_string());

    let base = package_path
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or("");

    let mut segments: Vec<&str> = if decoded.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    segments.join("/")
}

/// Map an EPUB's package metadata onto a catalog entry, storing its cover.
pub(crate) fn build_entry(ctx: &ImportContext, relative_path: &str) -> Result<CatalogEntry> {
    let meta = read_metadata(&ctx.absolute(relative_path))?;
    let package = meta.package;

    let mut entry = CatalogEntry::from_filename(relative_path, EPUB_MIME);
    if !package.title.is_empty() {
        entry.title = package.title;
    }
    entry.author = package.creator;
    entry.language = package.language;
    entry.date = package.date;
    entry.summary = package.description;

    if let Some(cover) = meta.cover {
        entry.cover = Some(ctx.covers.save(&cover.data, &cover.media_type)?);
    }

    Ok(entry)
}
