//! Scheduling contract between the data reader and the pipeline driver
//!
//! The driver calls into a [`ReaderScheduling`] implementation once per
//! iteration per device to interleave data preparation, device-to-device
//! copies and compute on its own streams.

pub mod ordering;
pub mod request;
pub mod scheduler;
pub mod stages;
pub mod state;

pub use ordering::{StagePhase, StageTracker, Transition};
pub use request::{RequestKind, ScheduleRequest};
pub use scheduler::ReaderScheduler;
pub use state::PipelineState;

use crate::device::{DeviceId, Stream};
use crate::error::Result;

/// Capability of a data reader to insert its stages into caller streams
///
/// Per device, stages must be scheduled as precompute, D2D, then a barrier
/// (`schedule_here` or `schedule_here_graph`). Any violation is reported as
/// a fatal error and nothing is enqueued.
pub trait ReaderScheduling {
    /// Insert data preparation for the next batch of `device_id`
    ///
    /// With `from_graph` the call must happen while `stream` is capturing.
    fn schedule_precompute_here(&mut self, stream: &Stream, device_id: DeviceId, from_graph: bool) -> Result<()>;

    /// Insert the copy of the prepared batch into the device output
    fn schedule_d2d_here(&mut self, stream: &Stream, device_id: DeviceId, from_graph: bool) -> Result<()>;

    /// Eager barrier publishing the batch to the consuming stream
    fn schedule_here(&mut self, stream: &Stream, device_id: DeviceId) -> Result<()>;

    /// Capture-safe barrier; completes the device's capture pass
    fn schedule_here_graph(&mut self, stream: &Stream, device_id: DeviceId) -> Result<()>;

    /// Rebind the captured graph to the current batch shape
    fn update_schedule_graph(&mut self, device_id: DeviceId) -> Result<()>;

    fn precompute_enabled(&self) -> bool;
}
