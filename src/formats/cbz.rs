//! CBZ (Comic Book ZIP) importer.
//!
//! CBZ has no metadata standard: the title comes from the filename and the
//! first archive entry is taken as the cover.

use crate::error::{AppError, Result};
use crate::formats::epub::CoverImage;
use crate::formats::{ImportContext, MAX_ENTRY_SIZE, read_capped};
use crate::library::{CatalogEntry, UNKNOWN_AUTHOR};
use std::fs::File;
use std::path::Path;
use zip::ZipArchive;

/// MIME type of CBZ files.
pub const CBZ_MIME: &str = "application/vnd.comicbook+zip";

/// Read the first entry of the zip central directory, in stored order.
///
/// The entry is not checked to be an image; its media type is guessed from
/// its name and defaults to JPEG.
pub fn read_first_entry(path: &Path) -> Result<CoverImage> {
    let file = File::open(path)
        .map_err(|e| AppError::Archive(format!("{}: {}", path.display(), e)))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| AppError::Archive(format!("{}: {}", path.display(), e)))?;

    if archive.is_empty() {
        return Err(AppError::EmptyArchive(path.display().to_string()));
    }

    let mut first = archive
        .by_index(0)
        .map_err(|e| AppError::Cover(format!("{}: {}", path.display(), e)))?;

    let media_type = mime_guess::from_path(first.name())
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string());

    let declared = first.size();
    let data = read_capped(&mut first, declared, MAX_ENTRY_SIZE)
        .map_err(|e| AppError::Cover(format!("{}: {}", path.display(), e)))?;

    Ok(CoverImage { data, media_type })
}

/// Filename-titled entry with the first archive entry stored as cover.
pub(crate) fn build_entry(ctx: &ImportContext, relative_path: &str) -> Result<CatalogEntry> {
    let cover = read_first_entry(&ctx.absolute(relative_path))?;

    let mut entry = CatalogEntry::from_filename(relative_path, CBZ_MIME);
    entry.author = UNKNOWN_AUTHOR.to_string();
    entry.cover = Some(ctx.covers.save(&cover.data, &cover.media_type)?);

    Ok(entry)
}
