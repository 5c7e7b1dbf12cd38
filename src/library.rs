//! Catalog entries and cover assets.

pub mod book;
pub mod cover;

pub use book::{CatalogEntry, CoverAsset, UNKNOWN_AUTHOR};
pub use cover::CoverStore;
