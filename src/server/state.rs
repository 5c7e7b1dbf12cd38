//! Application state shared across handlers.

use crate::catalog::{Catalog, ImportSummary};
use crate::config::Config;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Book tree and metadata store.
    pub catalog: Arc<Catalog>,
    /// Whether a bulk import is currently in progress.
    importing: Arc<AtomicBool>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: Config, catalog: Catalog) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            importing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Import the whole tree; `None` when another import is already running.
    pub fn run_import(&self) -> Result<Option<ImportSummary>> {
        // Prevent concurrent bulk imports
        if self.importing.swap(true, Ordering::SeqCst) {
            tracing::info!("Import already in progress, skipping");
            return Ok(None);
        }

        let result = self.catalog.import_all(self.config.import.workers);
        self.importing.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    /// Start a bulk import in a background thread.
    pub fn start_background_import(&self) -> std::thread::JoinHandle<()> {
        let state = self.clone();
        std::thread::spawn(move || {
            if let Err(e) = state.run_import() {
                tracing::error!(error = %e, "Background import failed");
            }
        })
    }
}
