//! Per-device stage ordering
//!
//! Enforces Precompute -> D2D -> Barrier for every batch of a device.
//! Violations are reported, never reordered.

use crate::device::{DeviceId, ExecutionMode, StageKind};
use crate::error::{ReaderError, Result};

/// Position within the current batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    /// Waiting for the next batch's precompute
    Idle,
    Precomputed,
    Transferred,
}

/// Validated state change, applied once the stage was enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    phase: StagePhase,
    mode: Option<ExecutionMode>,
    completes_batch: bool,
}

/// Ordering state machine of one device
#[derive(Debug, Clone)]
pub struct StageTracker {
    device_id: DeviceId,
    phase: StagePhase,
    /// Mode the current batch started in
    mode: Option<ExecutionMode>,
    batches_scheduled: u64,
}

impl StageTracker {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            phase: StagePhase::Idle,
            mode: None,
            batches_scheduled: 0,
        }
    }

    pub fn phase(&self) -> StagePhase {
        self.phase
    }

    pub fn mode(&self) -> Option<ExecutionMode> {
        self.mode
    }

    /// Batches whose barrier has been scheduled
    pub fn batches_scheduled(&self) -> u64 {
        self.batches_scheduled
    }

    /// Stage the tracker accepts next
    pub fn expected(&self) -> StageKind {
        match self.phase {
            StagePhase::Idle => StageKind::Precompute,
            StagePhase::Precomputed => StageKind::D2D,
            StagePhase::Transferred => StageKind::Barrier,
        }
    }

    /// Validate `stage` without changing state
    pub fn plan(&self, stage: StageKind, mode: ExecutionMode) -> Result<Transition> {
        let expected = self.expected();
        if stage != expected {
            return Err(ReaderError::OutOfOrder {
                device_id: self.device_id,
                stage,
                expected,
            });
        }

        if let Some(started) = self.mode {
            if started != mode {
                return Err(ReaderError::ModeMismatch {
                    device_id: self.device_id,
                    stage,
                    expected: started,
                    actual: mode,
                });
            }
        }

        Ok(match stage {
            StageKind::Precompute => Transition {
                phase: StagePhase::Precomputed,
                mode: Some(mode),
                completes_batch: false,
            },
            StageKind::D2D => Transition {
                phase: StagePhase::Transferred,
                mode: self.mode,
                completes_batch: false,
            },
            // Compute never reaches the tracker: expected() cannot return it
            StageKind::Barrier | StageKind::Compute => Transition {
                phase: StagePhase::Idle,
                mode: None,
                completes_batch: true,
            },
        })
    }

    pub fn commit(&mut self, transition: Transition) {
        self.phase = transition.phase;
        self.mode = transition.mode;
        if transition.completes_batch {
            self.batches_scheduled += 1;
        }
    }

    /// Validate and apply in one step
    pub fn advance(&mut self, stage: StageKind, mode: ExecutionMode) -> Result<()> {
        let transition = self.plan(stage, mode)?;
        self.commit(transition);
        Ok(())
    }
}
