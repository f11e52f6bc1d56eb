//! Batch and source descriptions for the data path
//!
//! Zero-copy batch data with checksums.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::backpressure::BackpressurePermit;
use crate::device::DeviceId;

/// Specification for a source file to be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source identifier
    pub id: u32,
    /// Path understood by the storage backend
    pub path: String,
    /// Byte offset within the file
    pub offset: u64,
    /// Byte length to read (0 = rest of the file)
    pub length: u64,
    /// Expected CRC32C of the range read (optional)
    pub expected_crc32c: Option<u32>,
}

impl SourceSpec {
    /// Create a new source specification
    pub fn new(id: u32, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            offset: 0,
            length: 0,
            expected_crc32c: None,
        }
    }

    /// Set byte range for partial reads
    pub fn with_range(mut self, offset: u64, length: u64) -> Self {
        self.offset = offset;
        self.length = length;
        self
    }

    /// Set expected checksum
    pub fn with_checksum(mut self, crc32c: u32) -> Self {
        self.expected_crc32c = Some(crc32c);
        self
    }
}

/// Raw batch waiting in a device inbox
///
/// Holds its backpressure permit until the device barrier releases it.
#[derive(Debug)]
pub struct RawBatch {
    /// Target device
    pub device_id: DeviceId,
    /// Position in the device's input order
    pub seq: u64,
    /// Source file the batch came from, if any
    pub source: Option<u32>,
    /// Offset within the source
    pub offset: u64,
    /// Batch data (zero-copy slice)
    pub data: Bytes,
    /// CRC32C of `data`
    pub checksum: u32,
    pub(crate) permit: Option<BackpressurePermit>,
}

impl RawBatch {
    pub fn new(device_id: DeviceId, seq: u64, data: Bytes) -> Self {
        let checksum = crc32c::crc32c(&data);
        Self {
            device_id,
            seq,
            source: None,
            offset: 0,
            data,
            checksum,
            permit: None,
        }
    }

    /// Record where the batch was read from
    pub fn with_origin(mut self, source: u32, offset: u64) -> Self {
        self.source = Some(source);
        self.offset = offset;
        self
    }

    pub(crate) fn with_permit(mut self, permit: BackpressurePermit) -> Self {
        self.permit = Some(permit);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Device-ready batch as held by the staging or output buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBatch {
    pub device_id: DeviceId,
    /// Sequence number of the raw batch it was prepared from
    pub seq: u64,
    pub data: Bytes,
    pub checksum: u32,
}

impl PreparedBatch {
    pub fn verify_checksum(&self) -> bool {
        crc32c::crc32c(&self.data) == self.checksum
    }
}
