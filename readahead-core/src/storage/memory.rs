//! In-memory backend

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use parking_lot::RwLock;

use super::backend::StorageBackend;
use crate::error::{ReaderError, Result};

/// Object map held in memory
///
/// `max_transfer` caps the bytes moved per call so callers see the short
/// counts a remote store produces.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Bytes>>,
    max_transfer: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_transfer(max_transfer: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            max_transfer: Some(max_transfer.max(1)),
        }
    }

    /// Store an object, replacing any previous one
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(path.into(), data.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn get(&self, path: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ReaderError::ObjectNotFound { path: path.to_string() })
    }

    fn cap(&self, len: usize) -> usize {
        self.max_transfer.map_or(len, |max| len.min(max))
    }
}

impl StorageBackend for MemoryStorage {
    fn size(&self, path: &str) -> Result<u64> {
        Ok(self.get(path)?.len() as u64)
    }

    fn write(&self, path: &str, data: &[u8], overwrite: bool) -> Result<usize> {
        let mut objects = self.objects.write();
        if !overwrite && objects.contains_key(path) {
            return Err(ReaderError::AlreadyExists { path: path.to_string() });
        }
        let written = self.cap(data.len());
        objects.insert(path.to_string(), Bytes::copy_from_slice(&data[..written]));
        Ok(written)
    }

    fn read(&self, path: &str, buffer: &mut [u8], offset: u64) -> Result<usize> {
        let object = self.get(path)?;
        let start = (offset as usize).min(object.len());
        let len = self.cap(buffer.len().min(object.len() - start));
        buffer[..len].copy_from_slice(&object[start..start + len]);
        Ok(len)
    }

    fn copy_to_local(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let object = self.get(remote_path)?;
        fs::write(local_path, &object).map_err(|e| ReaderError::StorageError {
            message: format!("{}: {}", local_path.display(), e),
        })?;
        Ok(object.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_counts() {
        let storage = MemoryStorage::with_max_transfer(3);
        assert_eq!(storage.write("obj", b"abcdefgh", false).unwrap(), 3);
        assert_eq!(storage.size("obj").unwrap(), 3);

        storage.insert("full", &b"abcdefgh"[..]);
        let mut buffer = [0u8; 8];
        assert_eq!(storage.read("full", &mut buffer, 0).unwrap(), 3);
        assert_eq!(&storage.read_range("full", 2, 8).unwrap()[..], b"cdefgh");
    }

    #[test]
    fn test_overwrite_flag() {
        let storage = MemoryStorage::new();
        storage.write("obj", b"one", false).unwrap();
        assert!(matches!(
            storage.write("obj", b"two", false),
            Err(ReaderError::AlreadyExists { .. })
        ));
        storage.write("obj", b"two", true).unwrap();
        assert_eq!(&storage.read_range("obj", 0, 8).unwrap()[..], b"two");
    }
}
