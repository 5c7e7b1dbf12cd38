//! shelf-opds server entry point.

use clap::Parser;
use shelf_opds::{
    catalog::Catalog,
    config::{Cli, Command, Config},
    db::Database,
    server,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelf_opds=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Import { workers }) => cmd_import(config, workers),
        Some(Command::List { json }) => cmd_list(&config, json),
        Some(Command::Show { id }) => cmd_show(&config, &id),
        Some(Command::Serve {
            bind,
            books,
            covers,
            root,
        }) => cmd_serve(config, bind, books, covers, root).await,
        None => {
            // Default: start server
            cmd_serve(config, None, None, None, None).await
        }
    }
}

/// Open the store and build the catalog.
fn open_catalog(config: &Config) -> anyhow::Result<Catalog> {
    let db = Database::open(&config.database.path)?;
    Ok(Catalog::new(config, db)?)
}

/// Write the default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    // Initialize database
    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to point books_dir at your library.");
    println!("Then run: shelf-opds serve");

    Ok(())
}

/// Import every file not yet in the store.
fn cmd_import(config: Config, workers: Option<usize>) -> anyhow::Result<()> {
    let catalog = open_catalog(&config)?;
    let workers = workers.unwrap_or(config.import.workers);

    let summary = catalog.import_all(workers)?;
    println!(
        "Imported: {}, already cached: {}, failed: {}",
        summary.imported, summary.cached, summary.failed
    );

    Ok(())
}

/// Print every stored entry.
fn cmd_list(config: &Config, json: bool) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let entries = db.list_books()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No entries found.");
    } else {
        println!("{:<42} {:<30} PATH", "ID", "TITLE");
        println!("{}", "-".repeat(100));
        for entry in entries {
            println!(
                "{:<42} {:<30} {}",
                entry.id,
                truncate(&entry.title, 30),
                entry.source_path
            );
        }
    }

    Ok(())
}

/// Print one entry.
fn cmd_show(config: &Config, id: &str) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let Some(entry) = db.get_book_by_id(id)? else {
        anyhow::bail!("Entry not found: {}", id);
    };

    println!("ID:       {}", entry.id);
    println!("Title:    {}", entry.title);
    println!("Author:   {}", entry.author);
    if !entry.language.is_empty() {
        println!("Language: {}", entry.language);
    }
    if !entry.date.is_empty() {
        println!("Date:     {}", entry.date);
    }
    println!("Path:     {}", entry.source_path);
    println!("Type:     {}", entry.content_type);
    if let Some(cover) = &entry.cover {
        println!("Cover:    {} ({})", cover.filename, cover.mime_type);
    }
    println!("Updated:  {}", entry.updated.format("%Y-%m-%d %H:%M"));
    if !entry.summary.is_empty() {
        println!("\n{}", entry.summary);
    }

    Ok(())
}

/// Cut a string to `max` characters for table output.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Start the server.
async fn cmd_serve(
    mut config: Config,
    bind: Option<SocketAddr>,
    books: Option<PathBuf>,
    covers: Option<PathBuf>,
    root: Option<String>,
) -> anyhow::Result<()> {
    // Command line overrides
    if let Some(addr) = bind {
        config.server.bind = addr;
    }
    if let Some(books) = books {
        config.library.books_dir = books;
    }
    if let Some(covers) = covers {
        config.library.covers_dir = covers;
    }
    if let Some(root) = root {
        config.server.root = root;
    }

    let catalog = open_catalog(&config)?;

    tracing::info!(
        bind = %config.server.bind,
        books = %config.library.books_dir.display(),
        covers = %config.library.covers_dir.display(),
        database = %config.database.path.display(),
        root = %catalog.root(),
        "Starting shelf-opds server"
    );

    let state = server::AppState::new(config.clone(), catalog);

    if config.import.on_startup {
        tracing::info!("Starting background import...");
        state.start_background_import();
    }

    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
