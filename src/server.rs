//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router, mounted under the catalog root.
pub fn create_router(state: AppState) -> Router {
    let root = state.catalog.root().to_string();
    let at = |path: &str| format!("{}{}", root, path);

    let mut router = Router::new()
        .route(&at("/"), get(handlers::catalog_root))
        .route(&at("/catalog"), get(handlers::catalog_root))
        .route(&at("/catalog/{*path}"), get(handlers::catalog_dir))
        .route(&at("/books/{*path}"), get(handlers::book_file))
        .route(&at("/covers/{*path}"), get(handlers::cover_file))
        .route(&at("/entry/{id}"), get(handlers::entry_by_id));

    // A non-empty root also answers without the trailing slash
    if !root.is_empty() {
        router = router.route(&root, get(handlers::catalog_root));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
