//! Content-addressed blob storage
//!
//! Audio bytes are stored under the SHA-256 of their content. Writing the
//! same bytes twice yields the same key and stores them once.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{debug, warn};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Result, WmError};

const BLOB_EXTENSION: &str = "bin";

/// Hex SHA-256 of `bytes`
pub fn content_key(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn check_key(key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(WmError::internal(format!("malformed storage key '{}'", key)))
    }
}

/// Binary storage consulted by the catalog
pub trait BlobStore: Send + Sync {
    /// Store `bytes`, returning their key
    fn write(&self, bytes: &[u8]) -> Result<String>;

    /// Read the bytes stored under `key`
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove `key`; removing an absent key is not an error
    fn remove(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool>;

    /// Every key currently stored
    fn keys(&self) -> Result<Vec<String>>;

    /// Size of the blob under `key`
    fn size_of(&self, key: &str) -> Result<u64>;
}

// ============================================================================
// File Store
// ============================================================================

/// Blobs on disk under `root/ab/abcdef....bin`
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root
            .join(&key[..2])
            .join(format!("{}.{}", key, BLOB_EXTENSION))
    }
}

impl BlobStore for FileStore {
    fn write(&self, bytes: &[u8]) -> Result<String> {
        let key = content_key(bytes);
        let path = self.blob_path(&key);
        if path.exists() {
            debug!("Blob {} already stored", &key[..12]);
            return Ok(key);
        }

        let dir = path
            .parent()
            .ok_or_else(|| WmError::internal("blob path has no parent"))?;
        fs::create_dir_all(dir)?;

        // Write beside the target then rename, so a crash never leaves a partial blob
        let temp = dir.join(format!("{}.tmp", key));
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        debug!("Stored blob {} ({} bytes)", &key[..12], bytes.len());
        Ok(key)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        check_key(key)?;
        let bytes = match fs::read(self.blob_path(key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(WmError::internal(format!("blob {} is missing", key)))
            }
            Err(err) => return Err(err.into()),
        };
        if content_key(&bytes) != key {
            return Err(WmError::internal(format!(
                "blob {} failed its integrity check",
                key
            )));
        }
        Ok(bytes)
    }

    fn remove(&self, key: &str) -> Result<()> {
        check_key(key)?;
        let path = self.blob_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                // Drop the shard directory once empty
                if let Some(dir) = path.parent() {
                    let _ = fs::remove_dir(dir);
                }
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(is_valid_key(key) && self.blob_path(key).is_file())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Skipping unreadable store entry: {}", err);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(&format!(".{}", BLOB_EXTENSION))
                    .filter(|key| is_valid_key(key))
                    .map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn size_of(&self, key: &str) -> Result<u64> {
        check_key(key)?;
        Ok(fs::metadata(self.blob_path(key))?.len())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// Blobs held in memory, for tests and throwaway catalogs
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> WmError {
    WmError::internal("memory store lock poisoned")
}

impl BlobStore for MemoryStore {
    fn write(&self, bytes: &[u8]) -> Result<String> {
        let key = content_key(bytes);
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.entry(key.clone()).or_insert_with(|| bytes.to_vec());
        Ok(key)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| WmError::internal(format!("blob {} is missing", key)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.blobs.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().map_err(|_| poisoned())?.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn size_of(&self, key: &str) -> Result<u64> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(key)
            .map(|b| b.len() as u64)
            .ok_or_else(|| WmError::internal(format!("blob {} is missing", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stores() -> (TempDir, Vec<Box<dyn BlobStore>>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_store = FileStore::open(temp_dir.path().join("blobs")).unwrap();
        (temp_dir, vec![Box::new(file_store), Box::new(MemoryStore::new())])
    }

    #[test]
    fn test_content_key() {
        assert_eq!(
            content_key(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_write_read_remove() {
        let (_dir, stores) = stores();
        for store in stores {
            let key = store.write(b"hello").unwrap();
            assert!(store.contains(&key).unwrap());
            assert_eq!(store.read(&key).unwrap(), b"hello");
            assert_eq!(store.size_of(&key).unwrap(), 5);
            assert_eq!(store.keys().unwrap(), vec![key.clone()]);

            store.remove(&key).unwrap();
            assert!(!store.contains(&key).unwrap());
            assert!(store.read(&key).is_err());
            // Second remove is a no-op
            store.remove(&key).unwrap();
        }
    }

    #[test]
    fn test_identical_bytes_share_a_key() {
        let (_dir, stores) = stores();
        for store in stores {
            let a = store.write(b"same").unwrap();
            let b = store.write(b"same").unwrap();
            assert_eq!(a, b);
            assert_eq!(store.keys().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_file_store_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        let key = store.write(b"abc").unwrap();
        let expected = temp_dir.path().join("ba").join(format!("{}.bin", key));
        assert!(expected.is_file());
    }

    #[test]
    fn test_file_store_detects_tampering() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        let key = store.write(b"original").unwrap();
        fs::write(store.blob_path(&key), b"tampered").unwrap();

        let err = store.read(&key).unwrap_err();
        assert!(err.to_string().contains("integrity"));
    }

    #[test]
    fn test_file_store_ignores_stray_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        store.write(b"x").unwrap();
        fs::create_dir_all(temp_dir.path().join("zz")).unwrap();
        fs::write(temp_dir.path().join("zz").join("notes.txt"), b"hi").unwrap();
        assert_eq!(store.keys().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_key_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        assert!(store.read("../../etc/passwd").is_err());
        assert!(!store.contains("nope").unwrap());
    }
}
