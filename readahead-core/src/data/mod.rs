//! Data path
//!
//! Sources are assigned to devices, read ahead by prefetchers under
//! backpressure and queued as raw batches in each device inbox, where the
//! precompute stage picks them up.

pub mod assign;
pub mod backpressure;
pub mod batch;
pub mod dataset;
pub mod prefetcher;
pub mod preprocess;
pub mod reader;

pub use assign::SourceAssigner;
pub use backpressure::{BackpressureConfig, BackpressureController, BackpressurePermit};
pub use batch::{PreparedBatch, RawBatch, SourceSpec};
pub use dataset::DatasetConfig;
pub use prefetcher::{PrefetchStats, Prefetcher, PrefetcherConfig};
pub use preprocess::{BytesToF32, Passthrough, PreprocessKind, Preprocessor};
pub use reader::{AsyncReader, DataReader, ReaderConfig};
