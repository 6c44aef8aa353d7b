//! Versioned on-disk record for the basename map.
//!
//! Layout: 8-byte magic, little-endian `u32` format version, MessagePack
//! body. Anything that does not match is reported as
//! [`IndexerError::IndexCorruption`] so the caller can rebuild.

use crate::IndexerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File magic of `dirs_from_basename`.
pub const RECORD_MAGIC: &[u8; 8] = b"CIXDFB\0\0";

/// Current record format version.
pub const RECORD_VERSION: u32 = 1;

const HEADER_LEN: usize = RECORD_MAGIC.len() + 4;

/// Basename to containing directories, relative to the project root.
pub type BasenameMap = BTreeMap<String, Vec<PathBuf>>;

/// Persisted body of a zone's basename index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasenameRecord {
    /// Project the map was built for
    pub project: PathBuf,
    pub basenames: BasenameMap,
}

impl BasenameRecord {
    pub fn encode(&self) -> Result<Vec<u8>, IndexerError> {
        let body = rmp_serde::to_vec_named(self)?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(RECORD_MAGIC);
        out.extend_from_slice(&RECORD_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a record read from `path`.
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self, IndexerError> {
        let corrupt = |reason: String| IndexerError::IndexCorruption {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!("truncated header ({} bytes)", bytes.len())));
        }
        let (magic, rest) = bytes.split_at(RECORD_MAGIC.len());
        if magic != RECORD_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let (version, body) = rest.split_at(4);
        let version = u32::from_le_bytes([version[0], version[1], version[2], version[3]]);
        if version != RECORD_VERSION {
            return Err(corrupt(format!(
                "format version {} (expected {})",
                version, RECORD_VERSION
            )));
        }

        rmp_serde::from_slice(body).map_err(|e| corrupt(format!("bad body: {}", e)))
    }
}

/// Atomic write: temp file in the same directory, then rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), IndexerError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&temp_path, data)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> BasenameRecord {
        let mut basenames = BasenameMap::new();
        basenames.insert(
            "a.py".to_string(),
            vec![PathBuf::new(), PathBuf::from("pkg")],
        );
        BasenameRecord {
            project: PathBuf::from("/work/proj"),
            basenames,
        }
    }

    #[test]
    fn test_encode_decode() {
        let record = sample();
        let bytes = record.encode().unwrap();
        assert_eq!(&bytes[..8], RECORD_MAGIC);
        assert_eq!(&bytes[8..12], &RECORD_VERSION.to_le_bytes());

        let decoded = BasenameRecord::decode(&bytes, Path::new("x")).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_rejects_bad_magic_version_and_body() {
        let good = sample().encode().unwrap();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        let err = BasenameRecord::decode(&bad_magic, Path::new("x")).unwrap_err();
        assert!(matches!(err, IndexerError::IndexCorruption { .. }));

        let mut bad_version = good.clone();
        bad_version[8] = 99;
        let err = BasenameRecord::decode(&bad_version, Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("version 99"));

        let truncated = &good[..good.len() - 3];
        assert!(BasenameRecord::decode(truncated, Path::new("x")).is_err());
        assert!(BasenameRecord::decode(b"CIX", Path::new("x")).is_err());
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dirs_from_basename");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join(".dirs_from_basename.tmp").exists());
    }
}
