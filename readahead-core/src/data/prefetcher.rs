//! Async prefetcher feeding one device inbox
//!
//! Reads assigned sources through the storage backend ahead of
//! consumption, cuts them into raw batches and pushes them into the device
//! inbox under backpressure.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::backpressure::BackpressureController;
use super::batch::SourceSpec;
use crate::device::{BatchFeeder, DeviceId};
use crate::error::{ReaderError, Result};
use crate::metrics::standard;
use crate::runtime::ShutdownSignal;
use crate::storage::{ByteBufferPool, StorageBackend};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetcherConfig {
    /// Attempts per source for retryable storage errors
    pub retry_count: u32,
    /// Backoff before the second attempt, doubled after each failure
    pub retry_base_delay_ms: u64,
    /// Read buffers kept in the pool
    pub pool_buffers: usize,
}

impl Default for PrefetcherConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_base_delay_ms: 100,
            pool_buffers: 4,
        }
    }
}

/// Outcome of a prefetcher run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    pub sources_read: usize,
    pub sources_failed: usize,
    pub batches_sent: u64,
    pub bytes_read: u64,
}

pub struct Prefetcher {
    device_id: DeviceId,
    sources: VecDeque<SourceSpec>,
    storage: Arc<dyn StorageBackend>,
    feeder: BatchFeeder,
    backpressure: BackpressureController,
    pool: Arc<ByteBufferPool>,
    batch_bytes: usize,
    config: PrefetcherConfig,
    shutdown: ShutdownSignal,
}

impl Prefetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feeder: BatchFeeder,
        sources: Vec<SourceSpec>,
        storage: Arc<dyn StorageBackend>,
        backpressure: BackpressureController,
        batch_bytes: usize,
        config: PrefetcherConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        let batch_bytes = batch_bytes.max(1);
        Self {
            device_id: feeder.device_id(),
            sources: VecDeque::from(sources),
            storage,
            feeder,
            backpressure,
            pool: ByteBufferPool::new(config.pool_buffers, batch_bytes),
            batch_bytes,
            config,
            shutdown,
        }
    }

    pub fn add_sources(&mut self, sources: Vec<SourceSpec>) {
        self.sources.extend(sources);
    }

    /// Read every queued source; stops early on shutdown or closed inbox
    pub async fn run(mut self) -> PrefetchStats {
        let mut stats = PrefetchStats::default();
        debug!(
            "Prefetcher for device {} starting with {} sources",
            self.device_id,
            self.sources.len()
        );

        while let Some(source) = self.sources.pop_front() {
            if self.shutdown.is_triggered() {
                break;
            }

            let data = match self.fetch_with_retry(&source).await {
                Ok(data) => data,
                Err(e) => {
                    error!(
                        "Device {}: skipping source {} ({}): {}",
                        self.device_id, source.id, source.path, e
                    );
                    stats.sources_failed += 1;
                    continue;
                }
            };

            stats.sources_read += 1;
            stats.bytes_read += data.len() as u64;

            match self.send_batches(&source, &data).await {
                Ok(sent) => stats.batches_sent += sent,
                Err(e) => {
                    debug!("Device {}: prefetcher stopping: {}", self.device_id, e);
                    self.pool.release(data);
                    break;
                }
            }
            self.pool.release(data);
        }

        info!(
            "Prefetcher for device {} done: {} sources, {} batches, {} bytes",
            self.device_id, stats.sources_read, stats.batches_sent, stats.bytes_read
        );
        stats
    }

    async fn send_batches(&self, source: &SourceSpec, data: &[u8]) -> Result<u64> {
        let mut sent = 0;
        for (idx, chunk) in data.chunks(self.batch_bytes).enumerate() {
            self.backpressure.wait_if_needed().await;

            let permit = tokio::select! {
                permit = self.backpressure.acquire() => permit?,
                _ = self.shutdown.wait() => return Err(ReaderError::ShutdownInProgress),
            };

            let offset = source.offset + (idx * self.batch_bytes) as u64;
            let batch = self
                .feeder
                .next_batch(Bytes::copy_from_slice(chunk))
                .with_origin(source.id, offset)
                .with_permit(permit);

            tokio::select! {
                result = self.feeder.send_batch(batch) => result?,
                _ = self.shutdown.wait() => return Err(ReaderError::ShutdownInProgress),
            }
            sent += 1;
        }
        Ok(sent)
    }

    async fn fetch_with_retry(&self, source: &SourceSpec) -> Result<BytesMut> {
        let attempts = self.config.retry_count.max(1);
        let mut attempt = 0;

        loop {
            match self.fetch(source).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(
                        "Attempt {}/{} failed for source {}: {}",
                        attempt + 1,
                        attempts,
                        source.id,
                        e
                    );
                    let delay = self.config.retry_base_delay_ms * 2u64.pow(attempt);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch(&self, source: &SourceSpec) -> Result<BytesMut> {
        let storage = self.storage.clone();
        let pool = self.pool.clone();
        let spec = source.clone();
        let started = Instant::now();

        let data = tokio::task::spawn_blocking(move || read_source(storage.as_ref(), &pool, &spec))
            .await
            .map_err(|e| ReaderError::Internal {
                message: format!("read task for source {} failed: {}", source.id, e),
            })??;

        if let Some(expected) = source.expected_crc32c {
            let actual = crc32c::crc32c(&data);
            if actual != expected {
                self.pool.release(data);
                return Err(ReaderError::ChecksumMismatch {
                    key: source.path.clone(),
                    expected,
                    actual,
                });
            }
        }

        standard::BYTES_READ.inc_by(data.len() as u64);
        standard::READ_DURATION.observe(started.elapsed().as_secs_f64());
        debug!(
            "Device {}: read source {} ({} bytes)",
            self.device_id,
            source.id,
            data.len()
        );
        Ok(data)
    }
}

/// Blocking read of a source range, following short counts to the end
fn read_source(storage: &dyn StorageBackend, pool: &ByteBufferPool, source: &SourceSpec) -> Result<BytesMut> {
    let len = if source.length > 0 {
        source.length
    } else {
        storage.size(&source.path)?.saturating_sub(source.offset)
    } as usize;

    let mut buffer = pool.acquire(len);
    let mut filled = 0;
    while filled < len {
        let n = match storage.read(&source.path, &mut buffer[filled..], source.offset + filled as u64) {
            Ok(n) => n,
            Err(e) => {
                pool.release(buffer);
                return Err(e);
            }
        };
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}
