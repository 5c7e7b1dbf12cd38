//! shelf-opds: an OPDS catalog over a plain directory tree of ebooks.
//!
//! The book directory is the source of truth. Each directory maps to a
//! navigation feed; each file with a registered importer maps to an entry
//! whose metadata is extracted the first time the file is listed and cached
//! in SQLite from then on.
//!
//! # Features
//!
//! - OPDS 1.2 navigation and acquisition feeds mirroring the directory tree
//! - Lazy import: EPUB metadata from the OPF package, CBZ first-page covers,
//!   filename-only entries for other formats
//! - Content-addressed cover storage
//! - Stable identifiers from file content hashes or random UUIDs
//! - Optional parallel bulk import

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Directory feeds and lazy import.
pub mod catalog;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book format importers.
pub mod formats;
/// Entry identifiers.
pub mod identity;
/// Catalog entry and cover models.
pub mod library;
/// OPDS feed generation.
pub mod opds;
/// HTTP server.
pub mod server;


pub use catalog::{Catalog, ImportSummary};
pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
