//! Identifiers and stage vocabulary shared by streams and the scheduler

use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw device identifier
pub type DeviceId = u32;

/// Process-unique stream identifier
pub type StreamId = u64;

/// How work reaches a stream
///
/// `Eager` work is dispatched immediately. `Capturing` work is recorded into
/// a command graph and must not contain host-synchronous operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    Eager,
    Capturing,
}

impl ExecutionMode {
    /// Map the `from_graph` flag of the scheduling calls
    pub fn from_graph(from_graph: bool) -> Self {
        if from_graph {
            ExecutionMode::Capturing
        } else {
            ExecutionMode::Eager
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, ExecutionMode::Capturing)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Eager => write!(f, "eager"),
            ExecutionMode::Capturing => write!(f, "capturing"),
        }
    }
}

/// Pipeline stage a piece of stream work belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Raw batch to device-ready form
    Precompute,
    /// Prepared batch into the consumer buffer
    D2D,
    /// Publish to the consuming compute stream
    Barrier,
    /// Consumer work issued by the pipeline driver
    Compute,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Precompute => write!(f, "precompute"),
            StageKind::D2D => write!(f, "d2d"),
            StageKind::Barrier => write!(f, "barrier"),
            StageKind::Compute => write!(f, "compute"),
        }
    }
}

/// Tag attached to every kernel and host operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageLabel {
    pub device_id: DeviceId,
    pub stage: StageKind,
}

impl StageLabel {
    pub fn new(device_id: DeviceId, stage: StageKind) -> Self {
        Self { device_id, stage }
    }
}

impl fmt::Display for StageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@dev{}", self.stage, self.device_id)
    }
}
