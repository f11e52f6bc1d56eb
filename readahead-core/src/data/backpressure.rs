//! Backpressure for prefetched batches
//!
//! Every raw batch in flight holds a permit until the device barrier
//! releases it, which bounds host memory held by the prefetchers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Duration;

use crate::error::{ReaderError, Result};
use crate::metrics::standard;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Batches a device may hold between prefetch and release
    pub max_pending: usize,
    /// Delay applied as pending approaches the limit
    #[serde(with = "millis")]
    pub min_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_pending: 8,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(50),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use tokio::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Limits pending batches of one device
#[derive(Debug, Clone)]
pub struct BackpressureController {
    semaphore: Arc<Semaphore>,
    config: BackpressureConfig,
    pending: Arc<AtomicUsize>,
    released: Arc<AtomicU64>,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        let max_pending = config.max_pending.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_pending)),
            config: BackpressureConfig { max_pending, ..config },
            pending: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Slow the producer down once half the slots are taken
    pub async fn wait_if_needed(&self) {
        if self.pending_count() < self.config.max_pending / 2 {
            return;
        }

        let pressure = self.pressure();
        if pressure > 0.5 {
            tokio::time::sleep(self.delay_for(pressure)).await;
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<BackpressurePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReaderError::ShutdownInProgress)?;
        Ok(self.track(permit))
    }

    pub fn try_acquire(&self) -> Option<BackpressurePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.track(permit))
    }

    /// Wake every waiter with `ShutdownInProgress`
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> BackpressurePermit {
        self.pending.fetch_add(1, Ordering::Relaxed);
        standard::INFLIGHT_BATCHES.inc();
        BackpressurePermit {
            _permit: permit,
            pending: self.pending.clone(),
            released: self.released.clone(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Permits returned so far
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// 0.0 when idle, 1.0 when every slot is taken
    fn pressure(&self) -> f64 {
        (self.pending_count() as f64 / self.config.max_pending as f64).min(1.0)
    }

    fn delay_for(&self, pressure: f64) -> Duration {
        let min = self.config.min_delay.as_nanos() as f64;
        let max = self.config.max_delay.as_nanos() as f64;
        Duration::from_nanos((min + (max - min) * pressure * pressure) as u64)
    }
}

/// Slot held by one in-flight batch
#[derive(Debug)]
pub struct BackpressurePermit {
    _permit: OwnedSemaphorePermit,
    pending: Arc<AtomicUsize>,
    released: Arc<AtomicU64>,
}

impl Drop for BackpressurePermit {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        self.released.fetch_add(1, Ordering::Relaxed);
        standard::INFLIGHT_BATCHES.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_bound_pending() {
        let controller = BackpressureController::new(BackpressureConfig {
            max_pending: 2,
            ..Default::default()
        });

        let first = controller.acquire().await.unwrap();
        let _second = controller.acquire().await.unwrap();
        assert_eq!(controller.pending_count(), 2);
        assert!(controller.try_acquire().is_none());

        drop(first);
        assert_eq!(controller.pending_count(), 1);
        assert_eq!(controller.released_count(), 1);
        assert!(controller.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let controller = BackpressureController::new(BackpressureConfig {
            max_pending: 1,
            ..Default::default()
        });
        let _held = controller.acquire().await.unwrap();

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.acquire().await })
        };
        controller.close();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ReaderError::ShutdownInProgress)
        ));
    }
}
