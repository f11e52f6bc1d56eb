//! Captured command graphs and per-device graph bookkeeping

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::stream::{Stream, StreamOp};
use super::types::{DeviceId, StageKind, StageLabel, StreamId};
use crate::error::Result;
use crate::metrics::standard;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

struct GraphInner {
    id: u64,
    captured_on: StreamId,
    device_id: DeviceId,
    nodes: Vec<StreamOp>,
}

/// Immutable recorded operation sequence
///
/// Clones share the node list, so one graph can be replayed from several
/// call sites at once.
#[derive(Clone)]
pub struct CommandGraph {
    inner: Arc<GraphInner>,
}

impl CommandGraph {
    pub(crate) fn new(captured_on: StreamId, device_id: DeviceId, nodes: Vec<StreamOp>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
                captured_on,
                device_id,
                nodes,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn captured_on(&self) -> StreamId {
        self.inner.captured_on
    }

    pub fn device_id(&self) -> DeviceId {
        self.inner.device_id
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }

    /// Kernel labels in replay order
    pub fn stage_labels(&self) -> Vec<StageLabel> {
        self.inner
            .nodes
            .iter()
            .filter(|node| matches!(node, StreamOp::Kernel { .. }))
            .filter_map(StreamOp::label)
            .collect()
    }

    /// Replay every node into `stream`
    pub fn launch(&self, stream: &Stream) -> Result<()> {
        trace!("Launching graph {} on stream {}", self.inner.id, stream.id());
        stream.enqueue_all(self.inner.nodes.clone())?;
        standard::GRAPH_LAUNCHES.inc();
        Ok(())
    }
}

impl std::fmt::Debug for CommandGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGraph")
            .field("id", &self.inner.id)
            .field("captured_on", &self.inner.captured_on)
            .field("nodes", &self.inner.nodes)
            .finish()
    }
}

/// Parameters that graph-mode stages read at replay
///
/// Fixed between updates; `generation` only moves when a refresh
/// actually changed something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphParams {
    /// Raw batch size the staging buffers were sized for
    pub batch_bytes: usize,
    /// 0 until the first bind
    pub generation: u64,
}

impl GraphParams {
    pub fn is_bound(&self) -> bool {
        self.generation > 0
    }
}

/// Record of a device's completed capture pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleGraph {
    stages: Vec<StageKind>,
    captured_on: StreamId,
    capture_passes: u32,
    params: GraphParams,
}

impl ScheduleGraph {
    pub(crate) fn new(stages: Vec<StageKind>, captured_on: StreamId, params: GraphParams) -> Self {
        Self {
            stages,
            captured_on,
            capture_passes: 1,
            params,
        }
    }

    pub(crate) fn recapture(&mut self, stages: Vec<StageKind>, captured_on: StreamId, params: GraphParams) {
        self.stages = stages;
        self.captured_on = captured_on;
        self.capture_passes += 1;
        self.params = params;
    }

    pub(crate) fn set_params(&mut self, params: GraphParams) {
        self.params = params;
    }

    /// Stages recorded by the last capture pass
    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    pub fn captured_on(&self) -> StreamId {
        self.captured_on
    }

    pub fn capture_passes(&self) -> u32 {
        self.capture_passes
    }

    pub fn params(&self) -> GraphParams {
        self.params
    }
}
