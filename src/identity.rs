//! Stable identifiers for catalog entries.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use uuid::Uuid;

/// Scheme prefix for content-hash identifiers.
pub const SHA1_URN_PREFIX: &str = "urn:sha1:";

/// Scheme prefix for random identifiers.
pub const UUID_URN_PREFIX: &str = "urn:uuid:";

/// Identifier generation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityMode {
    /// `urn:sha1:` of the whole file; identical files share an id.
    #[default]
    ContentHash,
    /// `urn:uuid:` drawn at random; no file read.
    Random,
}

impl IdentityMode {
    /// Generate an identifier for the file at `path`.
    ///
    /// Random mode never touches `path`. Content-hash mode reads the whole
    /// file and fails if it cannot.
    pub fn new_identifier(&self, path: &Path) -> Result<String> {
        match self {
            IdentityMode::Random => Ok(random_urn()),
            IdentityMode::ContentHash => {
                let file = File::open(path)?;
                Ok(hash_reader(file)?)
            }
        }
    }
}

/// A fresh `urn:uuid:` identifier.
pub fn random_urn() -> String {
    format!("{}{}", UUID_URN_PREFIX, Uuid::new_v4())
}

/// Stream `reader` through SHA-1 and format the digest as `urn:sha1:<base32>`.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha1::new();
    io::copy(&mut reader, &mut hasher)?;

    let digest = hasher.finalize();
    let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &digest);
    Ok(format!("{}{}", SHA1_URN_PREFIX, encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_hash_reader_known_digest() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        let urn = hash_reader(Cursor::new(b"abc")).unwrap();
        assert_eq!(urn, "urn:sha1:VGMT4NSHA2AWVOR6EVYXQUGCNSONBWE5");
    }

    /// Yields `Interrupted` before every chunk.
    struct Flaky<'a> {
        data: &'a [u8],
        interrupt: bool,
    }

    impl Read for Flaky<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            let n = buf.len().min(self.data.len()).min(1);
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_hash_reader_retries_interrupted_reads() {
        let reader = Flaky {
            data: b"abc",
            interrupt: false,
        };
        let urn = hash_reader(reader).unwrap();
        assert_eq!(urn, "urn:sha1:VGMT4NSHA2AWVOR6EVYXQUGCNSONBWE5");
    }

    #[test]
    fn test_content_hash_is_path_independent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.epub");
        let b = dir.path().join("nested-b.epub");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let mode = IdentityMode::ContentHash;
        let id_a = mode.new_identifier(&a).unwrap();
        let id_b = mode.new_identifier(&b).unwrap();
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with(SHA1_URN_PREFIX));
        assert!(!id_a.contains('='));
    }

    #[test]
    fn test_content_hash_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = IdentityMode::ContentHash.new_identifier(&dir.path().join("missing"));
        assert!(matches!(result, Err(crate::error::AppError::Io(_))));
    }

    #[test]
    fn test_random_ids_differ() {
        let missing = Path::new("/nonexistent/file.epub");
        let a = IdentityMode::Random.new_identifier(missing).unwrap();
        let b = IdentityMode::Random.new_identifier(missing).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(UUID_URN_PREFIX));
    }

    #[test]
    fn test_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            identity: IdentityMode,
        }
        let w: Wrapper = toml::from_str(r#"identity = "random""#).unwrap();
        assert_eq!(w.identity, IdentityMode::Random);
        let w: Wrapper = toml::from_str(r#"identity = "content-hash""#).unwrap();
        assert_eq!(w.identity, IdentityMode::ContentHash);
    }
}
