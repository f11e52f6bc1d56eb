//! Scheduling requests

use crate::device::{DeviceId, ExecutionMode, StageKind, Stream};

/// Which insertion point a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Precompute,
    D2D,
    /// Eager barrier (`schedule_here`)
    Generic,
    /// Capture-safe barrier (`schedule_here_graph`)
    GenericGraph,
    /// Refresh of the captured graph (`update_schedule_graph`)
    GraphUpdate,
}

/// One pipeline stage to insert for one device
///
/// Ephemeral: built per call and consumed by the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub kind: RequestKind,
    /// Target stream; absent only for graph updates
    pub stream: Option<Stream>,
    pub device_id: DeviceId,
    pub mode: ExecutionMode,
}

impl ScheduleRequest {
    pub fn precompute(stream: &Stream, device_id: DeviceId, from_graph: bool) -> Self {
        Self {
            kind: RequestKind::Precompute,
            stream: Some(stream.clone()),
            device_id,
            mode: ExecutionMode::from_graph(from_graph),
        }
    }

    pub fn d2d(stream: &Stream, device_id: DeviceId, from_graph: bool) -> Self {
        Self {
            kind: RequestKind::D2D,
            stream: Some(stream.clone()),
            device_id,
            mode: ExecutionMode::from_graph(from_graph),
        }
    }

    pub fn generic(stream: &Stream, device_id: DeviceId) -> Self {
        Self {
            kind: RequestKind::Generic,
            stream: Some(stream.clone()),
            device_id,
            mode: ExecutionMode::Eager,
        }
    }

    pub fn generic_graph(stream: &Stream, device_id: DeviceId) -> Self {
        Self {
            kind: RequestKind::GenericGraph,
            stream: Some(stream.clone()),
            device_id,
            mode: ExecutionMode::Capturing,
        }
    }

    pub fn graph_update(device_id: DeviceId) -> Self {
        Self {
            kind: RequestKind::GraphUpdate,
            stream: None,
            device_id,
            mode: ExecutionMode::Capturing,
        }
    }

    pub fn from_graph(&self) -> bool {
        self.mode.is_capturing()
    }

    /// Stage the request inserts; None for graph updates
    pub fn stage(&self) -> Option<StageKind> {
        match self.kind {
            RequestKind::Precompute => Some(StageKind::Precompute),
            RequestKind::D2D => Some(StageKind::D2D),
            RequestKind::Generic | RequestKind::GenericGraph => Some(StageKind::Barrier),
            RequestKind::GraphUpdate => None,
        }
    }
}
