//! Fallback importer for formats without readable metadata.

use crate::library::{CatalogEntry, UNKNOWN_AUTHOR};

/// Entry titled after the file stem, typed from the extension.
pub(crate) fn build_entry(relative_path: &str) -> CatalogEntry {
    let content_type = mime_guess::from_path(relative_path).first_or_octet_stream();

    let mut entry = CatalogEntry::from_filename(relative_path, content_type.essence_str());
    entry.author = UNKNOWN_AUTHOR.to_string();
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extension() {
        let entry = build_entry("docs/manual.pdf");
        assert_eq!(entry.title, "manual");
        assert_eq!(entry.content_type, "application/pdf");
        assert_eq!(entry.author, UNKNOWN_AUTHOR);
    }

    #[test]
    fn test_unknown_extension_is_octet_stream() {
        let entry = build_entry("weird.zzqq");
        assert_eq!(entry.title, "weird");
        assert_eq!(entry.content_type, "application/octet-stream");
    }
}
