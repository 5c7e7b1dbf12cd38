mod cbz;
pub mod epub;
mod generic;
pub mod xml;

pub use cbz::{CBZ_MIME, read_first_entry};
pub use epub::{EPUB_MIME, EpubMetadata, read_metadata};

use crate::config::LibraryConfig;
use crate::db::Database;
use crate::error::Result;
use crate::identity::IdentityMode;
use crate::library::{CatalogEntry, CoverStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Largest archive entry read into memory (container, package, cover).
pub const MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

/// Read an archive entry fully, refusing anything over `limit` bytes.
///
/// `declared_size` comes from the archive header and is checked first; the
/// read is capped as well since the header may understate the real size.
pub(crate) fn read_capped<R: Read>(
    reader: R,
    declared_size: u64,
    limit: u64,
) -> std::result::Result<Vec<u8>, String> {
    if declared_size > limit {
        return Err(format!(
            "declared size {} exceeds limit of {} bytes",
            declared_size, limit
        ));
    }

    let mut data = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|e| e.to_string())?;

    if data.len() as u64 > limit {
        return Err(format!("entry exceeds limit of {} bytes", limit));
    }
    Ok(data)
}

/// Everything an importer needs besides the file itself.
#[derive(Clone)]
pub struct ImportContext {
    /// Root of the book tree; import paths are relative to it.
    pub books_dir: PathBuf,
    /// Identifier strategy.
    pub identity: IdentityMode,
    /// Where extracted covers go.
    pub covers: CoverStore,
    /// Metadata store receiving the new entry.
    pub db: Database,
}

impl ImportContext {
    /// Absolute path of a file given relative to the book root.
    pub fn absolute(&self, relative_path: &str) -> PathBuf {
        self.books_dir.join(relative_path)
    }
}

/// Per-format import strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importer {
    /// Zip container with an OPF package document (EPUB).
    ArchiveMetadata,
    /// Zip of images whose first entry is the cover (CBZ).
    FirstImageCover,
    /// Filename-only entry for formats without readable metadata.
    Generic,
}

impl Importer {
    /// Build the entry for `relative_path`, assign its id and store it.
    ///
    /// Fails with [`crate::error::AppError::DuplicatePath`] when another
    /// import of the same path won the insert.
    pub fn import(&self, ctx: &ImportContext, relative_path: &str) -> Result<CatalogEntry> {
        let absolute = ctx.absolute(relative_path);

        let mut entry = match self {
            Importer::ArchiveMetadata => epub::build_entry(ctx, relative_path)?,
            Importer::FirstImageCover => cbz::build_entry(ctx, relative_path)?,
            Importer::Generic => generic::build_entry(relative_path),
        };

        entry.updated = modified_time(&absolute);
        entry.id = ctx.identity.new_identifier(&absolute)?;
        ctx.db.insert_book(&entry)?;

        tracing::info!(
            path = %relative_path,
            id = %entry.id,
            importer = ?self,
            "Imported book"
        );

        Ok(entry)
    }
}

/// File modification time, or now when unavailable.
fn modified_time(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Extension to importer mapping, fixed after construction.
#[derive(Debug, Clone)]
pub struct ImporterRegistry {
    importers: HashMap<String, Importer>,
    fallback: Option<Importer>,
}

impl ImporterRegistry {
    /// Build the registry from library settings.
    pub fn from_config(config: &LibraryConfig) -> Self {
        let mut importers = HashMap::new();
        for ext in &config.generic_extensions {
            importers.insert(
                ext.trim_start_matches('.').to_ascii_lowercase(),
                Importer::Generic,
            );
        }
        importers.insert("epub".to_string(), Importer::ArchiveMetadata);
        importers.insert("cbz".to_string(), Importer::FirstImageCover);

        Self {
            importers,
            fallback: config.import_unknown.then_some(Importer::Generic),
        }
    }

    /// Importer for a file, chosen by its (case-insensitive) extension.
    ///
    /// Files without an extension only match the fallback.
    pub fn importer_for(&self, path: &Path) -> Option<Importer> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        ext.and_then(|e| self.importers.get(&e).copied())
            .or(self.fallback)
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.importers.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }
}
