//! Directory feeds over the book tree, importing files on first sight.

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::formats::{ImportContext, Importer, ImporterRegistry};
use crate::identity;
use crate::library::{CatalogEntry, CoverStore};
use crate::opds::{Entry, Feed};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Files imported by this run.
    pub imported: usize,
    /// Files already in the store.
    pub cached: usize,
    /// Files whose import failed.
    pub failed: usize,
}

/// The book tree, its metadata store and importers.
#[derive(Clone)]
pub struct Catalog {
    ctx: ImportContext,
    registry: ImporterRegistry,
    root: String,
    title: String,
}

impl Catalog {
    /// Build the catalog from configuration; creates the cover directory.
    pub fn new(config: &Config, db: Database) -> Result<Self> {
        let library = &config.library;
        if !library.books_dir.is_dir() {
            tracing::warn!(
                path = %library.books_dir.display(),
                "Book directory does not exist"
            );
        }

        let ctx = ImportContext {
            books_dir: library.books_dir.clone(),
            identity: library.identity,
            covers: CoverStore::open(&library.covers_dir)?,
            db,
        };

        Ok(Self {
            ctx,
            registry: ImporterRegistry::from_config(library),
            root: config.server.normalized_root(),
            title: config.server.title.clone(),
        })
    }

    /// Metadata store.
    pub fn db(&self) -> &Database {
        &self.ctx.db
    }

    /// Normalized mount root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Root of the book tree.
    pub fn books_dir(&self) -> &Path {
        &self.ctx.books_dir
    }

    /// Directory holding extracted covers.
    pub fn covers_dir(&self) -> &Path {
        self.ctx.covers.dir()
    }

    /// Href of the feed for a cleaned relative directory; the root feed
    /// lives at `<root>/`.
    pub fn catalog_href(&self, relative_dir: &str) -> String {
        if relative_dir.is_empty() {
            format!("{}/", self.root)
        } else {
            format!("{}/catalog/{}", self.root, relative_dir)
        }
    }

    /// Render the feed for one directory of the book tree.
    ///
    /// Sub-directories come first, then files, each group sorted by name.
    /// Files without an importer are left out; files that fail to import are
    /// logged and left out. Only failing to list the directory itself is an
    /// error.
    pub fn render_directory(&self, request_path: &str) -> Result<Feed> {
        let relative = clean_path(request_path);
        let dir = if relative.is_empty() {
            self.ctx.books_dir.clone()
        } else {
            self.ctx.books_dir.join(&relative)
        };

        let (dirs, files) = list_children(&dir)?;

        let title = match relative.rsplit_once('/') {
            _ if relative.is_empty() => self.title.clone(),
            Some((_, name)) => name.to_string(),
            None => relative.clone(),
        };

        let mut feed = Feed::new(self.directory_id(&relative), title)
            .author(env!("CARGO_PKG_NAME"))
            .link("self", self.catalog_href(&relative))
            .link("start", self.catalog_href(""));

        if !relative.is_empty() {
            feed = feed.link("up", self.catalog_href(parent_of(&relative)));
        }

        for name in dirs {
            let child = join_relative(&relative, &name);
            let href = self.catalog_href(&child);
            feed.entries
                .push(Entry::subsection(self.directory_id(&child), name, href));
        }

        for name in files {
            let Some(importer) = self.registry.importer_for(Path::new(&name)) else {
                continue;
            };

            let child = join_relative(&relative, &name);
            match self.lookup_or_import(&child, importer) {
                Ok(entry) => feed.entries.push(entry.to_feed_entry(&self.root)),
                Err(e) => {
                    tracing::warn!(path = %child, error = %e, "Skipping file that failed to import");
                }
            }
        }

        Ok(feed)
    }

    /// Stored entry for `relative_path`, importing it on a miss.
    pub fn lookup_or_import(&self, relative_path: &str, importer: Importer) -> Result<CatalogEntry> {
        if let Some(entry) = self.ctx.db.get_book_by_path(relative_path)? {
            return Ok(entry);
        }

        self.import_or_recover(relative_path, importer)
    }

    /// Import `relative_path`; when a concurrent import stored the path
    /// first, return the stored entry instead.
    fn import_or_recover(&self, relative_path: &str, importer: Importer) -> Result<CatalogEntry> {
        match importer.import(&self.ctx, relative_path) {
            Ok(entry) => Ok(entry),
            Err(AppError::DuplicatePath(_)) => {
                tracing::debug!(path = %relative_path, "Imported concurrently, using stored entry");
                self.ctx.db.get_book_by_path(relative_path)?.ok_or_else(|| {
                    AppError::Internal(format!("Entry for {} missing after insert", relative_path))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Entry by identifier.
    pub fn entry(&self, id: &str) -> Result<Option<CatalogEntry>> {
        self.ctx.db.get_book_by_id(id)
    }

    /// Marker id for a directory; degrades to an unsaved random id on failure.
    fn directory_id(&self, relative_dir: &str) -> String {
        let key = format!("/{}", relative_dir);
        self.ctx.db.directory_id(&key).unwrap_or_else(|e| {
            tracing::warn!(path = %key, error = %e, "Failed to get directory id");
            identity::random_urn()
        })
    }

    /// Import every file of the tree that has an importer and no stored entry.
    pub fn import_all(&self, workers: usize) -> Result<ImportSummary> {
        let start = std::time::Instant::now();
        let books_dir = &self.ctx.books_dir;
        if !books_dir.is_dir() {
            return Err(AppError::NotFound(format!(
                "Book directory {}",
                books_dir.display()
            )));
        }

        let files: Vec<(String, Importer)> = walkdir::WalkDir::new(books_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let importer = self.registry.importer_for(e.path())?;
                let relative = relative_string(e.path().strip_prefix(books_dir).ok()?)?;
                Some((relative, importer))
            })
            .collect();

        let total = files.len();
        tracing::info!(files = total, workers = workers, "Found files to import");

        let imported = AtomicUsize::new(0);
        let cached = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let processed = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build import pool: {}", e)))?;

        pool.install(|| {
            files.par_iter().for_each(|(relative, importer)| {
                match self.ctx.db.get_book_by_path(relative) {
                    Ok(Some(_)) => {
                        cached.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => match importer.import(&self.ctx, relative) {
                        Ok(_) => {
                            imported.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(AppError::DuplicatePath(_)) => {
                            cached.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!(path = %relative, error = %e, "Import failed");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    Err(e) => {
                        tracing::warn!(path = %relative, error = %e, "Lookup failed");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }

                // Progress logging every 100 files
                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done.is_multiple_of(100) {
                    tracing::info!("Importing... {}/{}", done, total);
                }
            });
        });

        let summary = ImportSummary {
            imported: imported.load(Ordering::Relaxed),
            cached: cached.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };

        tracing::info!(
            imported = summary.imported,
            cached = summary.cached,
            failed = summary.failed,
            elapsed = ?start.elapsed(),
            "Import complete"
        );

        Ok(summary)
    }
}

/// Normalize a request path to a `/`-separated path inside the book root.
///
/// Empty and `.` segments are dropped; `..` removes the previous segment and
/// never climbs above the root. Backslashes count as separators.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
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

/// Sorted names of the sub-directories and regular files of `dir`.
fn list_children(dir: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for item in std::fs::read_dir(dir)? {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                continue;
            }
        };

        let name = match item.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!(name = ?raw, "Skipping non UTF-8 file name");
                continue;
            }
        };

        // Follow symlinks so linked folders and books show up
        let (is_dir, is_file) = match std::fs::metadata(item.path()) {
            Ok(meta) => (meta.is_dir(), meta.is_file()),
            Err(e) => {
                tracing::debug!(path = %item.path().display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if is_dir {
            dirs.push(name);
        } else if is_file {
            files.push(name);
        }
    }

    dirs.sort();
    files.sort();
    Ok((dirs, files))
}

fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn parent_of(relative: &str) -> &str {
    relative.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// `/`-joined UTF-8 form of a relative path.
fn relative_string(path: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = path.components().map(|c| c.as_os_str().to_str()).collect();
    let joined = parts?.join("/");
    (!joined.is_empty()).then_some(joined)
}

/// Resolve a request path under `base`, refusing to leave it.
pub fn resolve_under(base: &Path, request_path: &str) -> PathBuf {
    let relative = clean_path(request_path);
    if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::epub::tests::{
        CONTAINER, inflate_declared_size, write_epub, write_zip, write_zip64,
    };
    use crate::opds::REL_ACQUISITION;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.library.books_dir = dir.path().join("books");
        config.library.covers_dir = dir.path().join("covers");
        config.server.root = "opds/".to_string();
        config.server.title = "Test Library".to_string();
        std::fs::create_dir_all(&config.library.books_dir).unwrap();

        let catalog = Catalog::new(&config, Database::open_memory().unwrap()).unwrap();
        (dir, catalog)
    }

    fn titles(feed: &Feed) -> Vec<&str> {
        feed.entries.iter().map(|e| e.title.as_str()).collect()
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(""), "");
        assert_eq!(clean_path("/"), "");
        assert_eq!(clean_path("a//b/./c/"), "a/b/c");
        assert_eq!(clean_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(clean_path("a/../../b"), "b");
        assert_eq!(clean_path("a\\..\\..\\b"), "b");
    }

    #[test]
    fn test_resolve_under_stays_inside() {
        let base = Path::new("/srv/books");
        assert_eq!(resolve_under(base, "../../etc/passwd"), base.join("etc/passwd"));
        assert_eq!(resolve_under(base, ""), base);
    }

    #[test]
    fn test_directories_before_files_sorted() {
        let (_dir, catalog) = setup();
        let books = catalog.books_dir().to_path_buf();
        write_epub(&books.join("b.epub"), "Book b", None);
        write_epub(&books.join("A.epub"), "Book A", None);
        std::fs::create_dir(books.join("sub2")).unwrap();
        std::fs::create_dir(books.join("sub1")).unwrap();

        let feed = catalog.render_directory("/").unwrap();
        assert_eq!(titles(&feed), vec!["sub1", "sub2", "Book A", "Book b"]);
        assert_eq!(feed.title, "Test Library");
        assert!(feed.find_link("up").is_none());
        assert_eq!(feed.find_link("self").unwrap().href, "/opds/");

        let sub1 = &feed.entries[0];
        assert_eq!(sub1.links[0].rel, "subsection");
        assert_eq!(sub1.links[0].href, "/opds/catalog/sub1");

        let book_a = &feed.entries[2];
        let acquisition = book_a
            .links
            .iter()
            .find(|l| l.rel == REL_ACQUISITION)
            .unwrap();
        assert_eq!(acquisition.href, "/opds/books/A.epub");
    }

    #[test]
    fn test_files_are_cached_after_first_render() {
        let (_dir, catalog) = setup();
        let books = catalog.books_dir().to_path_buf();
        write_epub(&books.join("dune.epub"), "Dune", None);

        let first = catalog.render_directory("").unwrap();
        assert!(catalog.db().get_book_by_path("dune.epub").unwrap().is_some());

        // The cached entry wins even if the file changes afterwards
        write_epub(&books.join("dune.epub"), "Changed", None);
        let second = catalog.render_directory("").unwrap();
        assert_eq!(first.entries[0].id, second.entries[0].id);
        assert_eq!(second.entries[0].title, "Dune");
        assert_eq!(catalog.db().stats().unwrap().books, 1);
    }

    #[test]
    fn test_broken_file_skipped_siblings_render() {
        let (_dir, catalog) = setup();
        let books = catalog.books_dir().to_path_buf();
        write_zip(&books.join("broken.epub"), &[("content.opf", b"<package/>".as_slice())]);
        write_epub(&books.join("good.epub"), "Good", None);
        std::fs::write(books.join("photo.xyz"), b"??").unwrap();

        let feed = catalog.render_directory("").unwrap();
        assert_eq!(titles(&feed), vec!["Good"]);
        assert!(catalog.db().get_book_by_path("broken.epub").unwrap().is_none());
    }

    #[test]
    fn test_nested_directory_links() {
        let (_dir, catalog) = setup();
        let books = catalog.books_dir().to_path_buf();
        std::fs::create_dir_all(books.join("sf/classics")).unwrap();
        std::fs::write(books.join("sf/classics/notes.txt"), b"notes").unwrap();

        let feed = catalog.render_directory("sf/classics").unwrap();
        assert_eq!(feed.title, "classics");
        assert_eq!(feed.find_link("up").unwrap().href, "/opds/catalog/sf");
        assert_eq!(feed.find_link("start").unwrap().href, "/opds/");
        assert_eq!(titles(&feed), vec!["notes"]);

        let links = &feed.entries[0].links;
        assert_eq!(links[0].href, "/opds/books/sf/classics/notes.txt");

        let parent = catalog.render_directory("sf").unwrap();
        assert_eq!(parent.find_link("up").unwrap().href, "/opds/");
    }

    #[test]
    fn test_directory_ids_are_stable() {
        let (_dir, catalog) = setup();
        std::fs::create_dir(catalog.books_dir().join("sub")).unwrap();

        let first = catalog.render_directory("").unwrap();
        let second = catalog.render_directory("./").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.entries[0].id, second.entries[0].id);

        let sub = catalog.render_directory("sub").unwrap();
        assert_eq!(sub.id, first.entries[0].id);
    }

    #[test]
    fn test_traversal_is_clamped() {
        let (_dir, catalog) = setup();
        std::fs::write(catalog.books_dir().join("notes.txt"), b"x").unwrap();

        let feed = catalog.render_directory("../../..").unwrap();
        assert_eq!(titles(&feed), vec!["notes"]);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let (_dir, catalog) = setup();
        let result = catalog.render_directory("nope");
        assert!(matches!(result, Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_concurrent_renders_import_once() {
        let (_dir, catalog) = setup();
        let books = catalog.books_dir().to_path_buf();
        for i in 0..5 {
            write_epub(&books.join(format!("book{}.epub", i)), &format!("Book {}", i), None);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                std::thread::spawn(move || catalog.render_directory("").unwrap())
            })
            .collect();

        let feeds: Vec<Feed> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for feed in &feeds {
            assert_eq!(feed.entries.len(), 5);
            assert_eq!(feed.id, feeds[0].id);
        }
        assert_eq!(catalog.db().stats().unwrap().books, 5);
    }

    #[test]
    fn test_lost_insert_returns_stored_entry() {
        let (_dir, catalog) = setup();
        std::fs::write(catalog.books_dir().join("notes.txt"), b"x").unwrap();

        // Another import stored the path between lookup and insert
        let mut winner = CatalogEntry::from_filename("notes.txt", "text/plain");
        winner.id = "urn:uuid:winner".to_string();
        winner.title = "Stored first".to_string();
        catalog.db().insert_book(&winner).unwrap();

        let entry = catalog
            .import_or_recover("notes.txt", Importer::Generic)
            .unwrap();
        assert_eq!(entry.id, "urn:uuid:winner");
        assert_eq!(entry.title, "Stored first");
        assert_eq!(catalog.db().stats().unwrap().books, 1);
    }

    #[test]
    fn test_import_failure_is_not_recovered() {
        let (_dir, catalog) = setup();
        write_zip(&catalog.books_dir().join("bad.epub"), &[]);

        let result = catalog.import_or_recover("bad.epub", Importer::ArchiveMetadata);
        assert!(matches!(result, Err(AppError::Metadata(_) | AppError::Archive(_))));
    }

    #[test]
    fn test_oversized_archive_skipped_siblings_render() {
        let (_dir, catalog) = setup();
        let books = catalog.books_dir().to_path_buf();
        let comic = books.join("huge.cbz");
        write_zip64(&comic, &[("page-001.png", b"page".as_slice())]);
        inflate_declared_size(&comic, "page-001.png");
        std::fs::write(books.join("notes.txt"), b"notes").unwrap();

        let feed = catalog.render_directory("").unwrap();
        assert_eq!(titles(&feed), vec!["notes"]);
        assert!(catalog.db().get_book_by_path("huge.cbz").unwrap().is_none());
    }

    #[test]
    fn test_import_all() {
        let (_dir, catalog) = setup();
        let books = catalog.books_dir().to_path_buf();
        std::fs::create_dir_all(books.join("a/b")).unwrap();
        write_epub(&books.join("a/one.epub"), "One", None);
        std::fs::write(books.join("a/b/two.txt"), b"two").unwrap();
        write_zip(
            &books.join("a/b/bad.epub"),
            &[("META-INF/container.xml", CONTAINER)],
        );
        std::fs::write(books.join("ignored.xyz"), b"?").unwrap();

        let summary = catalog.import_all(2).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                imported: 2,
                cached: 0,
                failed: 1
            }
        );

        let again = catalog.import_all(1).unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.cached, 2);

        assert!(catalog.db().get_book_by_path("a/b/two.txt").unwrap().is_some());
    }
}
