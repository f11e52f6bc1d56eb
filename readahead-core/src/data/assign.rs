//! Deterministic assignment of dataset sources to devices

use std::collections::HashMap;

use tracing::debug;

use super::batch::SourceSpec;
use crate::device::DeviceId;

/// Round-robin over an optionally shuffled source order
pub struct SourceAssigner {
    seed: u64,
}

impl SourceAssigner {
    /// Seed 0 keeps the sources in listing order
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Split `sources` over `device_ids`; every device gets an entry
    pub fn assign(&self, sources: &[SourceSpec], device_ids: &[DeviceId]) -> HashMap<DeviceId, Vec<SourceSpec>> {
        let mut assignments: HashMap<DeviceId, Vec<SourceSpec>> =
            device_ids.iter().map(|&id| (id, Vec::new())).collect();
        if device_ids.is_empty() {
            return assignments;
        }

        for (idx, source_idx) in self.order(sources.len()).into_iter().enumerate() {
            let device_id = device_ids[idx % device_ids.len()];
            if let Some(assigned) = assignments.get_mut(&device_id) {
                assigned.push(sources[source_idx].clone());
            }
        }

        debug!(
            "Assigned {} sources to {} devices",
            sources.len(),
            device_ids.len()
        );
        assignments
    }

    /// Sources one device reads, without materializing the full map
    pub fn sources_for(&self, sources: &[SourceSpec], device_index: usize, num_devices: usize) -> Vec<SourceSpec> {
        if num_devices == 0 {
            return Vec::new();
        }
        self.order(sources.len())
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| idx % num_devices == device_index)
            .map(|(_, source_idx)| sources[source_idx].clone())
            .collect()
    }

    /// Fisher-Yates over an LCG stream
    fn order(&self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        if self.seed != 0 {
            let mut state = self.seed;
            for i in (1..order.len()).rev() {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let j = ((state >> 33) as usize) % (i + 1);
                order.swap(i, j);
            }
        }
        order
    }
}
