//! Async runtime management
//!
//! Separate Tokio runtimes for storage I/O and device stream workers.

pub mod executor;
pub mod shutdown;

pub use executor::{ReaderRuntime, RuntimeConfig, RuntimeHandles};
pub use shutdown::ShutdownSignal;
