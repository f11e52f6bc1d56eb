//! Simulated device memory for staged batches

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::types::DeviceId;
use crate::data::PreparedBatch;
use crate::error::{ReaderError, Result};

struct BufferState {
    data: BytesMut,
    seq: Option<u64>,
    checksum: u32,
}

/// Device-resident batch buffer
pub struct DeviceBuffer {
    device_id: DeviceId,
    state: Mutex<BufferState>,
}

impl DeviceBuffer {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            state: Mutex::new(BufferState {
                data: BytesMut::new(),
                seq: None,
                checksum: 0,
            }),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Host-side allocation ahead of graph replay
    pub fn reserve_exact(&self, capacity: usize) {
        let mut state = self.state.lock();
        if state.data.capacity() < capacity {
            let len = state.data.len();
            state.data.reserve(capacity - len);
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().data.capacity()
    }

    /// Overwrite the buffer with the output of `fill`
    ///
    /// Without `allow_growth` the buffer must already hold `len` bytes of
    /// capacity: graph replays cannot allocate.
    pub(crate) fn fill<F>(&self, seq: u64, len: usize, allow_growth: bool, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut BytesMut) -> Result<()>,
    {
        let mut state = self.state.lock();
        if !allow_growth && state.data.capacity() < len {
            return Err(ReaderError::ShapeMismatch {
                device_id: self.device_id,
                expected: state.data.capacity(),
                actual: len,
            });
        }

        state.data.clear();
        state.seq = None;
        state.data.reserve(len);
        fill(&mut state.data)?;

        state.checksum = crc32c::crc32c(&state.data);
        state.seq = Some(seq);
        Ok(state.data.len())
    }

    /// Copy another buffer's contents into this one
    pub(crate) fn copy_from(&self, src: &DeviceBuffer) -> Result<usize> {
        let src = src.state.lock();
        let seq = src.seq.ok_or_else(|| ReaderError::Internal {
            message: format!("device {}: copy from an empty buffer", self.device_id),
        })?;

        let mut dst = self.state.lock();
        dst.data.clear();
        dst.data.extend_from_slice(&src.data);
        dst.seq = Some(seq);
        dst.checksum = src.checksum;
        Ok(dst.data.len())
    }

    /// Sequence number of the batch currently held
    pub fn seq(&self) -> Option<u64> {
        self.state.lock().seq
    }

    /// Copy out the batch currently held
    pub fn snapshot(&self) -> Option<PreparedBatch> {
        let state = self.state.lock();
        state.seq.map(|seq| PreparedBatch {
            device_id: self.device_id,
            seq,
            data: Bytes::copy_from_slice(&state.data),
            checksum: state.checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_capacity_rejects_growth() {
        let buffer = DeviceBuffer::new(1);
        buffer.reserve_exact(8);

        let written = buffer
            .fill(0, 8, false, |out| {
                out.extend_from_slice(&[1u8; 8]);
                Ok(())
            })
            .unwrap();
        assert_eq!(written, 8);

        let err = buffer.fill(1, 4096, false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ReaderError::ShapeMismatch { device_id: 1, .. }));
        // Rejected fill leaves the previous batch intact
        assert_eq!(buffer.seq(), Some(0));
    }

    #[test]
    fn test_copy_preserves_checksum() {
        let staging = DeviceBuffer::new(0);
        let output = DeviceBuffer::new(0);
        assert!(output.copy_from(&staging).is_err());

        staging
            .fill(5, 3, true, |out| {
                out.extend_from_slice(b"abc");
                Ok(())
            })
            .unwrap();
        output.copy_from(&staging).unwrap();

        let batch = output.snapshot().unwrap();
        assert_eq!(batch.seq, 5);
        assert_eq!(&batch.data[..], b"abc");
        assert_eq!(batch.checksum, crc32c::crc32c(b"abc"));
    }
}
