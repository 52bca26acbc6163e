//! Fast content fingerprint over the head and tail of a file

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;

/// Bytes hashed from each end of the file
const EDGE_BYTES: u64 = 1024 * 1024;

/// SHA-256 over the file length, the first MiB and the last MiB. Files
/// shorter than two MiB are hashed whole.
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = Sha256::new();
    hasher.update(len.to_le_bytes());

    let mut buf = Vec::with_capacity(EDGE_BYTES.min(len) as usize);
    (&mut file).take(EDGE_BYTES).read_to_end(&mut buf)?;
    hasher.update(&buf);

    let tail_start = len.saturating_sub(EDGE_BYTES).max(EDGE_BYTES.min(len));
    if tail_start < len {
        file.seek(SeekFrom::Start(tail_start))?;
        buf.clear();
        file.read_to_end(&mut buf)?;
        hasher.update(&buf);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mkv");
        let b = dir.path().join("b.mkv");
        std::fs::write(&a, b"identical").unwrap();
        std::fs::write(&b, b"identical").unwrap();

        let fa = fingerprint(&a).unwrap();
        assert_eq!(fa, fingerprint(&b).unwrap());
        assert_eq!(fa.len(), 64);
    }

    #[test]
    fn test_tail_change_alters_fingerprint_of_large_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.mkv");
        let mut data = vec![7u8; (3 * EDGE_BYTES) as usize];
        std::fs::write(&path, &data).unwrap();
        let before = fingerprint(&path).unwrap();

        *data.last_mut().unwrap() = 8;
        std::fs::write(&path, &data).unwrap();
        assert_ne!(before, fingerprint(&path).unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(fingerprint(&dir.path().join("absent.mkv")).is_err());
    }
}
