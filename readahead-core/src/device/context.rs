//! Per-device scheduling context

use std::sync::Arc;

use tokio::runtime::Handle;

use super::graph::{GraphParams, ScheduleGraph};
use super::pipeline::{BatchFeeder, DevicePipeline};
use super::stream::Stream;
use super::types::{DeviceId, StageKind, StreamId};
use crate::data::{PreparedBatch, Preprocessor};
use crate::schedule::StageTracker;

/// Stages recorded so far by an unfinished capture pass
#[derive(Debug, Clone)]
pub(crate) struct CaptureBuilder {
    pub(crate) stream: StreamId,
    pub(crate) stages: Vec<StageKind>,
}

/// Identity and scheduling state of one device
///
/// Owned by the pipeline state; only the reader scheduler mutates it.
pub struct DeviceContext {
    device_id: DeviceId,
    /// Reader-owned stream used when the reader schedules itself
    stream: Stream,
    graph: Option<ScheduleGraph>,
    precompute_enabled: bool,
    pub(crate) tracker: StageTracker,
    pub(crate) capture: Option<CaptureBuilder>,
    pipeline: Arc<DevicePipeline>,
}

impl DeviceContext {
    /// Create a context with its own stream on `handle`
    pub fn new(
        device_id: DeviceId,
        handle: &Handle,
        preprocessor: Arc<dyn Preprocessor>,
        inbox_depth: usize,
    ) -> (Self, BatchFeeder) {
        let (pipeline, feeder) = DevicePipeline::new(device_id, preprocessor, inbox_depth);
        let context = Self {
            device_id,
            stream: Stream::new(device_id, handle),
            graph: None,
            precompute_enabled: true,
            tracker: StageTracker::new(device_id),
            capture: None,
            pipeline,
        };
        (context, feeder)
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Present only after a completed capture pass
    pub fn graph(&self) -> Option<&ScheduleGraph> {
        self.graph.as_ref()
    }

    pub fn precompute_enabled(&self) -> bool {
        self.precompute_enabled
    }

    pub(crate) fn set_precompute_enabled(&mut self, enabled: bool) {
        self.precompute_enabled = enabled;
    }

    pub fn tracker(&self) -> &StageTracker {
        &self.tracker
    }

    pub fn pipeline(&self) -> &Arc<DevicePipeline> {
        &self.pipeline
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn current_batch(&self) -> Option<PreparedBatch> {
        self.pipeline.current_batch()
    }

    /// Bind graph params to the latest known batch shape
    fn bind_params(&self) -> GraphParams {
        match self.pipeline.latest_batch_bytes() {
            Some(bytes) => self.pipeline.rebind(bytes),
            None => self.pipeline.params(),
        }
    }

    /// Turn a finished capture pass into the device's graph record
    pub(crate) fn complete_capture(&mut self, builder: CaptureBuilder) -> GraphParams {
        let params = self.bind_params();
        match self.graph.as_mut() {
            Some(graph) => graph.recapture(builder.stages, builder.stream, params),
            None => self.graph = Some(ScheduleGraph::new(builder.stages, builder.stream, params)),
        }
        params
    }

    /// Refresh params of the captured graph; None if never captured
    pub(crate) fn refresh_graph(&mut self) -> Option<GraphParams> {
        self.graph.as_ref()?;
        let params = self.bind_params();
        if let Some(graph) = self.graph.as_mut() {
            graph.set_params(params);
        }
        Some(params)
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device_id", &self.device_id)
            .field("stream", &self.stream)
            .field("graph", &self.graph)
            .field("precompute_enabled", &self.precompute_enabled)
            .field("tracker", &self.tracker)
            .finish()
    }
}
