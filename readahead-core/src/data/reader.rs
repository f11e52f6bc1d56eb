//! Asynchronous data reader
//!
//! Owns the reader scheduler and the prefetchers of every device. Drivers
//! either let the reader schedule itself on its own streams
//! ([`AsyncReader::read_a_batch_to_device`]) or interleave its stages with
//! their compute through [`ReaderScheduling`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::assign::SourceAssigner;
use super::backpressure::{BackpressureConfig, BackpressureController};
use super::batch::PreparedBatch;
use super::dataset::DatasetConfig;
use super::prefetcher::{PrefetchStats, Prefetcher, PrefetcherConfig};
use super::preprocess::PreprocessKind;
use crate::device::{BatchFeeder, DeviceContext, DeviceId, Stream};
use crate::error::{ReaderError, Result};
use crate::runtime::{RuntimeHandles, ShutdownSignal};
use crate::schedule::{PipelineState, ReaderScheduler, ReaderScheduling};
use crate::storage::StorageBackend;

/// Base interface of data readers
pub trait DataReader {
    fn device_ids(&self) -> Vec<DeviceId>;

    /// Schedule one batch for every device on the reader's own streams
    /// without waiting for it; the batch stays held until its barrier runs
    fn read_a_batch_to_device_delay_release(&mut self) -> Result<()>;

    /// Batch most recently published to `device_id`
    fn current_batch(&self, device_id: DeviceId) -> Result<Option<PreparedBatch>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Whether drivers may overlap reader stages with their compute
    pub precompute_enabled: bool,
    /// Raw batches queued per device ahead of precompute
    pub inbox_depth: usize,
    pub preprocess: PreprocessKind,
    pub prefetch: PrefetcherConfig,
    pub backpressure: BackpressureConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            precompute_enabled: true,
            inbox_depth: crate::DEFAULT_INBOX_DEPTH,
            preprocess: PreprocessKind::default(),
            prefetch: PrefetcherConfig::default(),
            backpressure: BackpressureConfig::default(),
        }
    }
}

pub struct AsyncReader {
    scheduler: ReaderScheduler,
    feeders: HashMap<DeviceId, BatchFeeder>,
    backpressure: Vec<BackpressureController>,
    prefetchers: Vec<JoinHandle<PrefetchStats>>,
    shutdown: ShutdownSignal,
}

impl AsyncReader {
    /// Reader fed manually through [`AsyncReader::feeder`]
    pub fn new(handles: &RuntimeHandles, device_ids: &[DeviceId], config: &ReaderConfig) -> Result<Self> {
        let preprocessor = config.preprocess.build();
        let mut state = PipelineState::new();
        let mut feeders = HashMap::with_capacity(device_ids.len());

        for &device_id in device_ids {
            let (context, feeder) =
                DeviceContext::new(device_id, &handles.device, preprocessor.clone(), config.inbox_depth);
            state.register_device(context)?;
            feeders.insert(device_id, feeder);
        }

        info!(
            "Reader for pipeline {} created with {} devices ({})",
            state.id(),
            device_ids.len(),
            preprocessor.name()
        );

        Ok(Self {
            scheduler: ReaderScheduler::new(state, config.precompute_enabled),
            feeders,
            backpressure: Vec::new(),
            prefetchers: Vec::new(),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Reader fed by one prefetcher per device reading `dataset`
    ///
    /// Inboxes close once a device's prefetcher has sent its last batch.
    pub fn with_storage(
        handles: &RuntimeHandles,
        device_ids: &[DeviceId],
        storage: Arc<dyn StorageBackend>,
        dataset: &DatasetConfig,
        config: &ReaderConfig,
    ) -> Result<Self> {
        let mut reader = Self::new(handles, device_ids, config)?;
        let mut assignments = SourceAssigner::new(dataset.seed).assign(&dataset.sources, device_ids);

        for &device_id in device_ids {
            let feeder = reader
                .feeders
                .remove(&device_id)
                .ok_or(ReaderError::UnregisteredDevice { device_id })?;
            let sources = assignments.remove(&device_id).unwrap_or_default();
            if sources.is_empty() {
                warn!("Device {} has no sources in dataset {}", device_id, dataset.name);
            }

            let backpressure = BackpressureController::new(config.backpressure.clone());
            let prefetcher = Prefetcher::new(
                feeder,
                sources,
                storage.clone(),
                backpressure.clone(),
                dataset.batch_bytes,
                config.prefetch.clone(),
                reader.shutdown.clone(),
            );
            reader.prefetchers.push(handles.io.spawn(prefetcher.run()));
            reader.backpressure.push(backpressure);
        }

        Ok(reader)
    }

    /// Manual feeder of a device; None for storage-backed readers
    pub fn feeder(&self, device_id: DeviceId) -> Option<BatchFeeder> {
        self.feeders.get(&device_id).cloned()
    }

    pub fn scheduler(&self) -> &ReaderScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ReaderScheduler {
        &mut self.scheduler
    }

    pub fn context(&self, device_id: DeviceId) -> Result<&DeviceContext> {
        self.scheduler.state().context(device_id)
    }

    /// Schedule one batch per device and wait until all are published
    pub async fn read_a_batch_to_device(&mut self) -> Result<()> {
        self.read_a_batch_to_device_delay_release()?;
        let streams: Vec<Stream> = self
            .scheduler
            .state()
            .contexts()
            .map(|context| context.stream().clone())
            .collect();
        for stream in streams {
            stream.synchronize().await?;
        }
        Ok(())
    }

    /// Drop the manual feeders so inboxes close once drained
    pub fn close_inputs(&mut self) {
        self.feeders.clear();
    }

    /// Stop prefetching and collect per-device prefetch stats
    pub async fn shutdown(mut self) -> Vec<PrefetchStats> {
        self.shutdown.shutdown();
        for backpressure in &self.backpressure {
            backpressure.close();
        }
        self.close_inputs();

        let mut stats = Vec::with_capacity(self.prefetchers.len());
        for handle in self.prefetchers.drain(..) {
            match handle.await {
                Ok(s) => stats.push(s),
                Err(e) => warn!("Prefetcher task failed: {}", e),
            }
        }
        info!("Reader for pipeline {} shut down", self.scheduler.pipeline_id());
        stats
    }
}

impl DataReader for AsyncReader {
    fn device_ids(&self) -> Vec<DeviceId> {
        self.scheduler.device_ids()
    }

    fn read_a_batch_to_device_delay_release(&mut self) -> Result<()> {
        for device_id in self.scheduler.device_ids() {
            self.scheduler.schedule_full_batch(device_id)?;
        }
        Ok(())
    }

    fn current_batch(&self, device_id: DeviceId) -> Result<Option<PreparedBatch>> {
        Ok(self.context(device_id)?.current_batch())
    }
}

impl ReaderScheduling for AsyncReader {
    fn schedule_precompute_here(&mut self, stream: &Stream, device_id: DeviceId, from_graph: bool) -> Result<()> {
        self.scheduler.schedule_precompute_here(stream, device_id, from_graph)
    }

    fn schedule_d2d_here(&mut self, stream: &Stream, device_id: DeviceId, from_graph: bool) -> Result<()> {
        self.scheduler.schedule_d2d_here(stream, device_id, from_graph)
    }

    fn schedule_here(&mut self, stream: &Stream, device_id: DeviceId) -> Result<()> {
        self.scheduler.schedule_here(stream, device_id)
    }

    fn schedule_here_graph(&mut self, stream: &Stream, device_id: DeviceId) -> Result<()> {
        self.scheduler.schedule_here_graph(stream, device_id)
    }

    fn update_schedule_graph(&mut self, device_id: DeviceId) -> Result<()> {
        self.scheduler.update_schedule_graph(device_id)
    }

    fn precompute_enabled(&self) -> bool {
        self.scheduler.precompute_enabled()
    }
}

impl std::fmt::Debug for AsyncReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncReader")
            .field("pipeline", &self.scheduler.pipeline_id())
            .field("devices", &self.scheduler.device_ids())
            .field("prefetchers", &self.prefetchers.len())
            .finish()
    }
}
