//! Tokio runtimes for the reader
//!
//! Prefetch and storage I/O run on one runtime, device stream workers on
//! another, so a slow read never delays stage execution.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::{ReaderError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads for prefetch and storage I/O
    pub io_threads: usize,
    /// Threads running device stream workers
    pub device_threads: usize,
    /// Grace period for in-flight reads at shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            io_threads: (cpus / 2).max(2),
            device_threads: cpus.max(2),
            shutdown_timeout_secs: 10,
        }
    }
}

/// Handles to the runtimes a reader spawns onto
#[derive(Debug, Clone)]
pub struct RuntimeHandles {
    pub io: Handle,
    pub device: Handle,
}

impl RuntimeHandles {
    /// Use the ambient runtime for both roles
    ///
    /// Panics outside a tokio runtime, like `Handle::current`.
    pub fn current() -> Self {
        let handle = Handle::current();
        Self {
            io: handle.clone(),
            device: handle,
        }
    }
}

/// Owns the I/O and device runtimes
pub struct ReaderRuntime {
    io_runtime: Runtime,
    device_runtime: Runtime,
    config: RuntimeConfig,
}

impl ReaderRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let io_runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads.max(1))
            .thread_name("readahead-io")
            .enable_all()
            .build()
            .map_err(|e| ReaderError::Internal {
                message: format!("Failed to create I/O runtime: {}", e),
            })?;

        let device_runtime = Builder::new_multi_thread()
            .worker_threads(config.device_threads.max(1))
            .thread_name("readahead-device")
            .enable_all()
            .build()
            .map_err(|e| ReaderError::Internal {
                message: format!("Failed to create device runtime: {}", e),
            })?;

        info!(
            "Reader runtime started ({} io threads, {} device threads)",
            config.io_threads, config.device_threads
        );

        Ok(Self {
            io_runtime,
            device_runtime,
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn handles(&self) -> RuntimeHandles {
        RuntimeHandles {
            io: self.io_runtime.handle().clone(),
            device: self.device_runtime.handle().clone(),
        }
    }

    pub fn spawn_io<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.io_runtime.spawn(future)
    }

    /// Run a future on the I/O runtime, blocking the calling thread
    pub fn block_on_io<F: Future>(&self, future: F) -> F::Output {
        self.io_runtime.block_on(future)
    }

    /// Stop device workers first, then give I/O a grace period
    pub fn shutdown(self) {
        self.device_runtime.shutdown_background();
        self.io_runtime
            .shutdown_timeout(Duration::from_secs(self.config.shutdown_timeout_secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_across_runtimes() {
        let runtime = ReaderRuntime::new(RuntimeConfig {
            io_threads: 1,
            device_threads: 1,
            shutdown_timeout_secs: 1,
        })
        .unwrap();

        let handles = runtime.handles();
        let result = runtime.block_on_io(async move { handles.device.spawn(async { 7 }).await.unwrap() });
        assert_eq!(result, 7);
        runtime.shutdown();
    }
}
