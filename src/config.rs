use crate::identity::IdentityMode;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// OPDS catalog server for a directory tree of ebooks.
#[derive(Parser, Debug, Clone)]
#[command(name = "shelf-opds")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "SHELF_OPDS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Directory holding the books.
        #[arg(long)]
        books: Option<PathBuf>,

        /// Directory where extracted covers are written.
        #[arg(long)]
        covers: Option<PathBuf>,

        /// URL prefix the catalog is mounted under.
        #[arg(long)]
        root: Option<String>,
    },

    /// Import every book not yet in the database.
    Import {
        /// Number of parallel import workers.
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// List cached catalog entries.
    List {
        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a single entry by its identifier.
    Show {
        /// Entry identifier (urn:sha1:... or urn:uuid:...).
        id: String,
    },

    /// Write a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Book and cover directories, importer settings.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Bulk import configuration.
    #[serde(default)]
    pub import: ImportConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Catalog title.
    #[serde(default = "default_title")]
    pub title: String,

    /// URL prefix every route and link is mounted under.
    #[serde(default)]
    pub root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
            root: String::new(),
        }
    }
}

impl ServerConfig {
    /// Root prefix with a leading slash and no trailing slash (`""` for `/`).
    pub fn normalized_root(&self) -> String {
        normalize_root(&self.root)
    }
}

/// Normalize a mount prefix: `"opds/"` becomes `"/opds"`, `"/"` becomes `""`.
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_title() -> String {
    "Library".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/catalog.db")
}

/// Library configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the served book tree.
    #[serde(default = "default_books_dir")]
    pub books_dir: PathBuf,

    /// Flat directory for content-addressed cover images.
    #[serde(default = "default_covers_dir")]
    pub covers_dir: PathBuf,

    /// How entry identifiers are generated.
    #[serde(default)]
    pub identity: IdentityMode,

    /// Extensions imported by filename only, without reading the file.
    #[serde(default = "default_generic_extensions")]
    pub generic_extensions: Vec<String>,

    /// Route every extension without a dedicated importer to the generic one.
    #[serde(default)]
    pub import_unknown: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            books_dir: default_books_dir(),
            covers_dir: default_covers_dir(),
            identity: IdentityMode::default(),
            generic_extensions: default_generic_extensions(),
            import_unknown: false,
        }
    }
}

fn default_books_dir() -> PathBuf {
    PathBuf::from("books")
}

fn default_covers_dir() -> PathBuf {
    PathBuf::from("covers")
}

fn default_generic_extensions() -> Vec<String> {
    ["pdf", "txt", "mobi", "azw3", "fb2", "djvu"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Bulk import configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Number of parallel workers for bulk import (1 = sequential).
    /// Keep low for NAS/network storage to avoid saturation.
    #[serde(default = "default_import_workers")]
    pub workers: usize,

    /// Import the whole tree in the background when the server starts.
    #[serde(default)]
    pub on_startup: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            workers: default_import_workers(),
            on_startup: false,
        }
    }
}

fn default_import_workers() -> usize {
    1
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("shelf-opds.toml"),
            dirs::config_dir()
                .map(|p| p.join("shelf-opds").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/shelf-opds/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# shelf-opds configuration

[server]
bind = "0.0.0.0:8080"
title = "Library"
# URL prefix, e.g. "/opds" when behind a reverse proxy
root = ""

[database]
# path = "/var/lib/shelf-opds/catalog.db"

[library]
books_dir = "books"
covers_dir = "covers"
# Identifier scheme: "content-hash" (urn:sha1) or "random" (urn:uuid)
identity = "content-hash"
# Formats listed by filename only
generic_extensions = ["pdf", "txt", "mobi", "azw3", "fb2", "djvu"]
# List files of any other extension too
import_unknown = false

[import]
workers = 1
# Import the whole tree in the background at server start
on_startup = false
"#
        .to_string()
    }
}
