//! Device-side state the pipeline stages operate on
//!
//! One [`DevicePipeline`] exists per device. Stage kernels hold an `Arc` to
//! it, so a captured graph keeps working after the scheduler call that
//! recorded it has returned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, trace};

use super::buffer::DeviceBuffer;
use super::event::Event;
use super::graph::GraphParams;
use super::types::{DeviceId, ExecutionMode};
use crate::data::{PreparedBatch, Preprocessor, RawBatch};
use crate::error::{ReaderError, Result};
use crate::metrics::standard;

/// Per-device inbox, buffers, events and graph parameters
pub struct DevicePipeline {
    device_id: DeviceId,
    inbox: AsyncMutex<mpsc::Receiver<RawBatch>>,
    staging: DeviceBuffer,
    output: DeviceBuffer,
    precompute_done: Event,
    d2d_done: Event,
    publish_done: Event,
    params: RwLock<GraphParams>,
    /// Size of the most recently submitted batch, 0 if none yet
    latest_batch_bytes: Arc<AtomicUsize>,
    published: watch::Sender<u64>,
    /// Raw batches kept alive until their barrier releases them, oldest first
    held: Mutex<VecDeque<RawBatch>>,
    /// Batch a graph replay rejected for its shape; taken before the inbox
    pending: Mutex<Option<RawBatch>>,
    preprocessor: Arc<dyn Preprocessor>,
}

impl DevicePipeline {
    /// Create the pipeline and the feeder that fills its inbox
    pub fn new(
        device_id: DeviceId,
        preprocessor: Arc<dyn Preprocessor>,
        inbox_depth: usize,
    ) -> (Arc<Self>, BatchFeeder) {
        let (sender, receiver) = mpsc::channel(inbox_depth.max(1));
        let latest_batch_bytes = Arc::new(AtomicUsize::new(0));
        let (published, _) = watch::channel(0u64);

        let pipeline = Arc::new(Self {
            device_id,
            inbox: AsyncMutex::new(receiver),
            staging: DeviceBuffer::new(device_id),
            output: DeviceBuffer::new(device_id),
            precompute_done: Event::new(),
            d2d_done: Event::new(),
            publish_done: Event::new(),
            params: RwLock::new(GraphParams::default()),
            latest_batch_bytes: latest_batch_bytes.clone(),
            published,
            held: Mutex::new(VecDeque::new()),
            pending: Mutex::new(None),
            preprocessor,
        });

        let feeder = BatchFeeder {
            device_id,
            sender,
            next_seq: Arc::new(AtomicU64::new(0)),
            latest_batch_bytes,
        };

        (pipeline, feeder)
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn precompute_done(&self) -> &Event {
        &self.precompute_done
    }

    pub fn d2d_done(&self) -> &Event {
        &self.d2d_done
    }

    /// Recorded once a barrier has published the output buffer
    pub fn publish_done(&self) -> &Event {
        &self.publish_done
    }

    pub fn staging(&self) -> &DeviceBuffer {
        &self.staging
    }

    pub fn output(&self) -> &DeviceBuffer {
        &self.output
    }

    pub fn preprocessor(&self) -> &Arc<dyn Preprocessor> {
        &self.preprocessor
    }

    /// Parameters graph-mode stages currently read
    pub fn params(&self) -> GraphParams {
        *self.params.read()
    }

    /// Size of the most recently submitted batch
    pub fn latest_batch_bytes(&self) -> Option<usize> {
        match self.latest_batch_bytes.load(Ordering::Acquire) {
            0 => None,
            bytes => Some(bytes),
        }
    }

    /// Bind graph parameters to `batch_bytes`, reallocating buffers if needed
    ///
    /// Binding the same shape twice leaves the parameters untouched.
    pub(crate) fn rebind(&self, batch_bytes: usize) -> GraphParams {
        let mut params = self.params.write();
        if !params.is_bound() || params.batch_bytes != batch_bytes {
            params.batch_bytes = batch_bytes;
            params.generation += 1;

            let capacity = self.preprocessor.output_len(batch_bytes);
            self.staging.reserve_exact(capacity);
            self.output.reserve_exact(capacity);

            debug!(
                "Device {}: graph params bound to {} bytes (generation {})",
                self.device_id, batch_bytes, params.generation
            );
        }
        *params
    }

    /// Precompute kernel body: wait for the next raw batch and prepare it
    ///
    /// A batch whose shape does not match the graph params stays queued for
    /// the next precompute, so a replay after a graph update picks it up.
    pub(crate) async fn precompute(&self, mode: ExecutionMode) -> Result<()> {
        let batch = self.next_raw_batch().await?;

        let started = Instant::now();
        let (out_len, allow_growth) = match mode {
            ExecutionMode::Eager => (self.preprocessor.output_len(batch.len()), true),
            ExecutionMode::Capturing => {
                let params = self.params();
                if batch.len() != params.batch_bytes {
                    let actual = batch.len();
                    *self.pending.lock() = Some(batch);
                    return Err(ReaderError::ShapeMismatch {
                        device_id: self.device_id,
                        expected: params.batch_bytes,
                        actual,
                    });
                }
                (self.preprocessor.output_len(params.batch_bytes), false)
            }
        };

        let filled = self.staging.fill(batch.seq, out_len, allow_growth, |out| {
            self.preprocessor.precompute(&batch.data, out)
        });
        let written = match filled {
            Ok(written) => written,
            Err(e) => {
                if mode.is_capturing() {
                    *self.pending.lock() = Some(batch);
                }
                return Err(e);
            }
        };

        standard::PRECOMPUTE_DURATION.observe(started.elapsed().as_secs_f64());
        standard::BATCHES_PREPARED.inc();
        trace!(
            "Device {}: prepared batch {} ({} -> {} bytes)",
            self.device_id,
            batch.seq,
            batch.len(),
            written
        );
        self.held.lock().push_back(batch);
        Ok(())
    }

    async fn next_raw_batch(&self) -> Result<RawBatch> {
        let mut inbox = self.inbox.lock().await;
        let parked = self.pending.lock().take();
        if let Some(batch) = parked {
            return Ok(batch);
        }
        inbox.recv().await.ok_or(ReaderError::DataExhausted {
            device_id: self.device_id,
        })
    }

    /// D2D kernel body
    pub(crate) fn transfer(&self) -> Result<()> {
        let bytes = self.output.copy_from(&self.staging)?;
        standard::BYTES_TRANSFERRED.inc_by(bytes as u64);
        Ok(())
    }

    /// Barrier kernel body: make the output batch visible to consumers
    ///
    /// Returns the sequence number of the batch published.
    pub(crate) fn publish(&self) -> Option<u64> {
        self.published.send_modify(|count| *count += 1);
        standard::BATCHES_PUBLISHED.inc();
        self.output.seq()
    }

    /// Drop the raw batch `seq` and any older one still held, returning
    /// their backpressure permits; yields how many were released
    pub(crate) fn release(&self, seq: u64) -> usize {
        let mut held = self.held.lock();
        let before = held.len();
        held.retain(|batch| batch.seq > seq);
        before - held.len()
    }

    /// Sequence number of the oldest raw batch not yet released
    pub fn held_batch(&self) -> Option<u64> {
        self.held.lock().front().map(|batch| batch.seq)
    }

    /// Raw batches prepared but not yet released
    pub fn held_batches(&self) -> Vec<u64> {
        self.held.lock().iter().map(|batch| batch.seq).collect()
    }

    /// Batches published so far
    pub fn published_batches(&self) -> u64 {
        *self.published.borrow()
    }

    /// Wait until at least `count` batches have been published
    pub async fn wait_published(&self, count: u64) {
        let mut receiver = self.published.subscribe();
        let _ = receiver.wait_for(|published| *published >= count).await;
    }

    /// Batch currently visible to the consumer
    pub fn current_batch(&self) -> Option<PreparedBatch> {
        self.output.snapshot()
    }
}

/// Producer side of a device inbox
#[derive(Clone)]
pub struct BatchFeeder {
    device_id: DeviceId,
    sender: mpsc::Sender<RawBatch>,
    next_seq: Arc<AtomicU64>,
    latest_batch_bytes: Arc<AtomicUsize>,
}

impl BatchFeeder {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Wrap `data` into the next raw batch for this device
    pub fn next_batch(&self, data: Bytes) -> RawBatch {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        RawBatch::new(self.device_id, seq, data)
    }

    /// Push bytes as the next batch, waiting for inbox space
    pub async fn send(&self, data: Bytes) -> Result<u64> {
        let batch = self.next_batch(data);
        let seq = batch.seq;
        self.send_batch(batch).await?;
        Ok(seq)
    }

    /// Push a prepared raw batch, waiting for inbox space
    pub async fn send_batch(&self, batch: RawBatch) -> Result<()> {
        let len = batch.len();
        self.sender
            .send(batch)
            .await
            .map_err(|_| ReaderError::ShutdownInProgress)?;
        self.latest_batch_bytes.store(len, Ordering::Release);
        Ok(())
    }

    /// Push without waiting; returns false when the inbox is full
    pub fn try_send(&self, data: Bytes) -> Result<bool> {
        let batch = self.next_batch(data);
        let len = batch.len();
        match self.sender.try_send(batch) {
            Ok(()) => {
                self.latest_batch_bytes.store(len, Ordering::Release);
                Ok(true)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ReaderError::ShutdownInProgress),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for BatchFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFeeder")
            .field("device_id", &self.device_id)
            .field("next_seq", &self.next_seq.load(Ordering::Relaxed))
            .finish()
    }
}
