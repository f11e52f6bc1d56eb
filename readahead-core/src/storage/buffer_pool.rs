//! Pool of read buffers shared by the prefetchers

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

/// Recycles read buffers of a fixed minimum capacity
pub struct ByteBufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    max_buffers: usize,
}

impl ByteBufferPool {
    pub fn new(initial_count: usize, buffer_capacity: usize) -> Arc<Self> {
        let buffers = (0..initial_count)
            .map(|_| BytesMut::with_capacity(buffer_capacity))
            .collect();

        Arc::new(Self {
            buffers: Mutex::new(buffers),
            buffer_capacity,
            max_buffers: (initial_count * 2).max(1),
        })
    }

    /// Take a zero-filled buffer of exactly `len` bytes
    pub fn acquire(&self, len: usize) -> BytesMut {
        let mut buffer = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity.max(len)));
        buffer.clear();
        buffer.resize(len, 0);
        buffer
    }

    /// Return a buffer; undersized or surplus buffers are dropped
    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers && buffer.capacity() >= self.buffer_capacity {
            buffers.push(buffer);
        }
    }

    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

impl std::fmt::Debug for ByteBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBufferPool")
            .field("available", &self.available())
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}
