//! Content-addressed cover image storage.

use crate::error::Result;
use crate::library::book::CoverAsset;
use sha1::{Digest, Sha1};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Flat directory of cover images named by the SHA-1 of their bytes.
#[derive(Debug, Clone)]
pub struct CoverStore {
    dir: PathBuf,
}

impl CoverStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the covers.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` under its content-hash name and return the asset.
    ///
    /// Writing an image that is already stored replaces it with identical
    /// bytes. The write goes through a temp file and a rename so a concurrent
    /// reader or writer never observes a partial file.
    pub fn save(&self, data: &[u8], mime_type: &str) -> Result<CoverAsset> {
        let filename = cover_filename(data, mime_type);
        let dest = self.dir.join(&filename);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(data)?;
        tmp.persist(&dest).map_err(|e| e.error)?;

        tracing::debug!(cover = %filename, bytes = data.len(), "Stored cover");

        Ok(CoverAsset {
            filename,
            mime_type: mime_type.to_string(),
        })
    }
}

/// `<sha1-hex><ext>` for the given image bytes.
pub fn cover_filename(data: &[u8], mime_type: &str) -> String {
    let digest = Sha1::digest(data);
    format!("{}{}", hex::encode(digest), extension_for_mime(mime_type))
}

/// File extension (with the dot) for an image MIME type, or `""` if unknown.
pub fn extension_for_mime(mime_type: &str) -> String {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let known = match essence.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        "image/avif" => Some("avif"),
        "image/jxl" => Some("jxl"),
        _ => None,
    };

    known
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&essence).and_then(|exts| exts.first().copied())
        })
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}
