//! HTTP request handlers.

use crate::catalog::resolve_under;
use crate::error::{AppError, Result};
use crate::opds::{self, Feed};
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::Response,
};
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

/// Build a response, returning 500 on error (which shouldn't happen).
fn build_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

/// Run catalog work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
}

/// Feeds listing books are acquisition feeds; pure directory listings are
/// navigation feeds.
fn feed_content_type(feed: &Feed) -> &'static str {
    let has_books = feed
        .entries
        .iter()
        .flat_map(|e| &e.links)
        .any(|l| l.rel == opds::REL_ACQUISITION);

    if has_books {
        opds::ACQUISITION_MIME
    } else {
        opds::NAVIGATION_MIME
    }
}

// ============================================================================
// OPDS CATALOG
// ============================================================================

/// Catalog root feed.
pub async fn catalog_root(State(state): State<AppState>) -> Result<Response<Body>> {
    render_feed(state, String::new()).await
}

/// Feed for a directory of the book tree.
pub async fn catalog_dir(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response<Body>> {
    render_feed(state, path).await
}

async fn render_feed(state: AppState, path: String) -> Result<Response<Body>> {
    let catalog = state.catalog.clone();
    let feed = blocking(move || catalog.render_directory(&path)).await?;

    Ok(build_response(
        StatusCode::OK,
        feed_content_type(&feed),
        feed.to_xml(),
    ))
}

/// Single entry document by identifier.
pub async fn entry_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    let catalog = state.catalog.clone();
    let lookup = id.clone();
    let entry = blocking(move || catalog.entry(&lookup))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Entry not found: {}", id)))?;

    let xml = entry
        .to_feed_entry(state.catalog.root())
        .to_xml_document();
    Ok(build_response(StatusCode::OK, opds::ENTRY_MIME, xml))
}

// ============================================================================
// FILES
// ============================================================================

/// Book file download.
pub async fn book_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response<Body>> {
    let file_path = resolve_under(state.catalog.books_dir(), &path);
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("book")
        .to_string();

    let mut response = stream_file(file_path).await?;
    if let Ok(value) = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&filename)
    )
    .parse::<header::HeaderValue>()
    {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// Extracted cover image.
pub async fn cover_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response<Body>> {
    let mut response = stream_file(resolve_under(state.catalog.covers_dir(), &path)).await?;

    // Cover names are content hashes
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=86400"),
    );

    Ok(response)
}

/// Stream a regular file with a content type guessed from its name.
async fn stream_file(path: PathBuf) -> Result<Response<Body>> {
    let metadata = tokio::fs::metadata(&path).await?;
    if !metadata.is_file() {
        return Err(AppError::NotFound(path.display().to_string()));
    }

    let file = tokio::fs::File::open(&path).await?;
    let body = Body::from_stream(ReaderStream::new(file));
    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.essence_str())
        .header(header::CONTENT_LENGTH, metadata.len())
        .body(body)
        .unwrap_or_else(|_| Response::default()))
}
