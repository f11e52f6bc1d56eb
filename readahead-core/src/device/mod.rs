//! Simulated device layer
//!
//! Streams, events, command graphs and device buffers the scheduler
//! inserts pipeline stages into.

pub mod buffer;
pub mod context;
pub mod event;
pub mod graph;
pub mod pipeline;
pub mod stream;
pub mod types;

pub use buffer::DeviceBuffer;
pub use context::DeviceContext;
pub use event::Event;
pub use graph::{CommandGraph, GraphParams, ScheduleGraph};
pub use pipeline::{BatchFeeder, DevicePipeline};
pub use stream::{ExecutedOp, OpKind, Stream, StreamOp};
pub use types::{DeviceId, ExecutionMode, StageKind, StageLabel, StreamId};
