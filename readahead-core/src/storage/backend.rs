//! Storage backend contract
//!
//! Paths are opaque strings interpreted by the backend. Transfers that move
//! fewer bytes than requested return the smaller count; only failures that
//! prevent any transfer are errors.

use std::path::Path;

use bytes::{Bytes, BytesMut};

use crate::error::Result;

pub trait StorageBackend: Send + Sync {
    /// Size of the object in bytes
    fn size(&self, path: &str) -> Result<u64>;

    /// Write `data` to `path`, returning the bytes written
    ///
    /// With `overwrite == false` an existing object fails with
    /// `AlreadyExists`.
    fn write(&self, path: &str, data: &[u8], overwrite: bool) -> Result<usize>;

    /// Read into `buffer` starting at `offset`, returning the bytes read
    fn read(&self, path: &str, buffer: &mut [u8], offset: u64) -> Result<usize>;

    /// Copy a whole object to the local filesystem, returning the bytes copied
    fn copy_to_local(&self, remote_path: &str, local_path: &Path) -> Result<u64>;

    /// Read up to `len` bytes at `offset`, looping over short reads
    ///
    /// The result is shorter than `len` only at end of object.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Bytes> {
        let mut buffer = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = self.read(path, &mut buffer[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer.freeze())
    }
}
