//! Local filesystem backend

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::backend::StorageBackend;
use crate::error::{ReaderError, Result};

/// Backend rooted at a directory; paths are relative to it
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn map_io(path: &str, err: io::Error) -> ReaderError {
    match err.kind() {
        io::ErrorKind::NotFound => ReaderError::ObjectNotFound { path: path.to_string() },
        io::ErrorKind::AlreadyExists => ReaderError::AlreadyExists { path: path.to_string() },
        _ => ReaderError::StorageError {
            message: format!("{}: {}", path, err),
        },
    }
}

impl StorageBackend for LocalStorage {
    fn size(&self, path: &str) -> Result<u64> {
        let metadata = fs::metadata(self.resolve(path)).map_err(|e| map_io(path, e))?;
        Ok(metadata.len())
    }

    fn write(&self, path: &str, data: &[u8], overwrite: bool) -> Result<usize> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io(path, e))?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let mut file = options.open(&full).map_err(|e| map_io(path, e))?;
        file.write_all(data).map_err(|e| map_io(path, e))?;
        debug!("Wrote {} bytes to {}", data.len(), full.display());
        Ok(data.len())
    }

    fn read(&self, path: &str, buffer: &mut [u8], offset: u64) -> Result<usize> {
        let mut file = File::open(self.resolve(path)).map_err(|e| map_io(path, e))?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| map_io(path, e))?;

        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Bytes already read are reported as a short count
                Err(_) if filled > 0 => break,
                Err(e) => return Err(map_io(path, e)),
            }
        }
        Ok(filled)
    }

    fn copy_to_local(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        fs::copy(self.resolve(remote_path), local_path).map_err(|e| map_io(remote_path, e))
    }
}
