use crate::db::{StoreStats, now_timestamp, timestamp_to_datetime};
use crate::error::{AppError, Result};
use crate::identity;
use crate::library::{CatalogEntry, CoverAsset};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

const BOOK_COLUMNS: &str = "path, urn, title, author, language, summary, date, content_type,
     cover, cover_type, updated_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Cached catalog entries, one per source file
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER NOT NULL PRIMARY KEY,
                path TEXT NOT NULL,
                urn TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL,
                cover TEXT,
                cover_type TEXT,
                updated_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (path)
            );

            -- Stable ids for rendered directories
            CREATE TABLE IF NOT EXISTS directories (
                path TEXT NOT NULL PRIMARY KEY,
                urn TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_urn ON books(urn);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a new catalog entry.
    ///
    /// Fails with [`AppError::DuplicatePath`] if the path is already stored.
    pub fn insert_book(&self, entry: &CatalogEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books (path, urn, title, author, language, summary, date,
                                content_type, cover, cover_type, updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.source_path,
                entry.id,
                entry.title,
                entry.author,
                entry.language,
                entry.summary,
                entry.date,
                entry.content_type,
                entry.cover.as_ref().map(|c| c.filename.as_str()),
                entry.cover.as_ref().map(|c| c.mime_type.as_str()),
                entry.updated.timestamp(),
                now_timestamp(),
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::DuplicatePath(entry.source_path.clone())
            } else {
                AppError::Internal(format!("Failed to insert book: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get book by its path relative to the book root.
    pub fn get_book_by_path(&self, path: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books WHERE path = ?1", BOOK_COLUMNS),
            params![path],
            Self::row_to_entry,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// Get book by its URN. With content-hash ids several paths can share a
    /// URN; the first stored one wins.
    pub fn get_book_by_id(&self, id: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM books WHERE urn = ?1 ORDER BY id LIMIT 1",
                BOOK_COLUMNS
            ),
            params![id],
            Self::row_to_entry,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// List all stored books, ordered by path.
    pub fn list_books(&self) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM books ORDER BY path", BOOK_COLUMNS))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map([], Self::row_to_entry)
            .map_err(|e| AppError::Internal(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Helper to convert row to CatalogEntry.
    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogEntry> {
        let cover: Option<String> = row.get(8)?;
        let cover_type: Option<String> = row.get(9)?;

        Ok(CatalogEntry {
            source_path: row.get(0)?,
            id: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            language: row.get(4)?,
            summary: row.get(5)?,
            date: row.get(6)?,
            content_type: row.get(7)?,
            cover: cover.map(|filename| CoverAsset {
                filename,
                mime_type: cover_type.unwrap_or_default(),
            }),
            updated: timestamp_to_datetime(row.get(10)?),
        })
    }

    // ========== DIRECTORY OPERATIONS ==========

    /// Stable id for a directory path, created on first request.
    ///
    /// The insert and the read happen under one lock, so concurrent callers
    /// for the same path all get the single stored marker.
    pub fn directory_id(&self, path: &str) -> Result<String> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO directories (path, urn, created_at) VALUES (?1, ?2, ?3)",
            params![path, identity::random_urn(), now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create directory id: {}", e)))?;

        conn.query_row(
            "SELECT urn FROM directories WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to get directory id: {}", e)))
    }

    // ========== STATS ==========

    /// Count stored books and directory markers.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| AppError::Internal(format!("Failed to count {}: {}", table, e)))
        };

        Ok(StoreStats {
            books: count("books")?,
            directories: count("directories")?,
        })
    }
}
