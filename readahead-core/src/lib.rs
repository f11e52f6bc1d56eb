//! Readahead Core - asynchronous data-reader scheduling for multi-device
//! training pipelines
//!
//! This crate provides:
//! - A scheduling contract that interleaves data preprocessing, device copies
//!   and compute on ordered per-device streams
//! - Eager execution and capture/replay of command graphs
//! - Prefetching from pluggable storage backends under backpressure
//! - A model interface for inference over loaded embeddings

pub mod data;
pub mod device;
pub mod error;
pub mod metrics;
pub mod model;
pub mod runtime;
pub mod schedule;
pub mod storage;

pub use data::{AsyncReader, DataReader, ReaderConfig};
pub use device::{DeviceContext, DeviceId, ExecutionMode, StageKind, Stream};
pub use error::{ReaderError, Result};
pub use runtime::ReaderRuntime;
pub use schedule::{PipelineState, ReaderScheduler, ReaderScheduling, ScheduleRequest};

/// Raw batches queued per device ahead of precompute
pub const DEFAULT_INBOX_DEPTH: usize = 4;

/// Raw batch size used when a dataset does not set one
pub const DEFAULT_BATCH_BYTES: usize = 64 * 1024;
