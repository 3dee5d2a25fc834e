//! Content checksums for migration scripts.
//!
//! Scripts are hashed with SHA-256 while streaming, so the size of a script
//! never affects memory use.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;

const CHUNK_SIZE: usize = 8 * 1024;

/// Compute the SHA-256 hex digest of everything readable from `reader`
pub fn checksum_reader<R: Read>(reader: R) -> Result<String> {
    let mut reader = BufReader::new(reader);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 hex digest of a file
pub fn checksum_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    checksum_reader(file)
}

/// Compute the SHA-256 hex digest of in-memory content
pub fn checksum_bytes(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_hash() {
        // Known SHA-256 hash for "hello"
        let hash = checksum_reader("hello".as_bytes()).unwrap();
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(checksum_bytes(b"hello"), hash);
    }

    #[test]
    fn test_any_byte_change_changes_digest() {
        let a = checksum_reader("CREATE TABLE a (id INT);".as_bytes()).unwrap();
        let b = checksum_reader("CREATE TABLE a (id INT); ".as_bytes()).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_streams_content_larger_than_chunk() {
        let content = "x".repeat(CHUNK_SIZE * 3 + 17);
        let streamed = checksum_reader(content.as_bytes()).unwrap();
        assert_eq!(streamed, checksum_bytes(content.as_bytes()));
    }

    #[test]
    fn test_checksum_file_matches_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"SELECT 1;").unwrap();

        let hash = checksum_file(file.path()).unwrap();
        assert_eq!(hash, checksum_bytes(b"SELECT 1;"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = checksum_file(Path::new("/definitely/not/here.sql")).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
