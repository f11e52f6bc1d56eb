//! Pipeline state: the device contexts of one reader

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::device::{DeviceContext, DeviceId};
use crate::error::{ReaderError, Result};

/// Mapping from device id to its context, owned by one scheduler
#[derive(Debug)]
pub struct PipelineState {
    id: Uuid,
    contexts: HashMap<DeviceId, DeviceContext>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            contexts: HashMap::new(),
        }
    }

    /// Instance id, used to tell pipelines apart in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn register_device(&mut self, context: DeviceContext) -> Result<()> {
        let device_id = context.device_id();
        if self.contexts.contains_key(&device_id) {
            return Err(ReaderError::DuplicateDevice { device_id });
        }
        debug!("Pipeline {}: registered device {}", self.id, device_id);
        self.contexts.insert(device_id, context);
        Ok(())
    }

    pub fn context(&self, device_id: DeviceId) -> Result<&DeviceContext> {
        self.contexts
            .get(&device_id)
            .ok_or(ReaderError::UnregisteredDevice { device_id })
    }

    pub fn context_mut(&mut self, device_id: DeviceId) -> Result<&mut DeviceContext> {
        self.contexts
            .get_mut(&device_id)
            .ok_or(ReaderError::UnregisteredDevice { device_id })
    }

    pub fn contexts(&self) -> impl Iterator<Item = &DeviceContext> {
        self.contexts.values()
    }

    pub(crate) fn contexts_mut(&mut self) -> impl Iterator<Item = &mut DeviceContext> {
        self.contexts.values_mut()
    }

    /// Registered device ids in ascending order
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.contexts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Passthrough;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_duplicate_registration() {
        let mut state = PipelineState::new();
        let (first, _) = DeviceContext::new(3, &Handle::current(), Arc::new(Passthrough), 2);
        let (second, _) = DeviceContext::new(3, &Handle::current(), Arc::new(Passthrough), 2);

        state.register_device(first).unwrap();
        assert!(matches!(
            state.register_device(second),
            Err(ReaderError::DuplicateDevice { device_id: 3 })
        ));
        assert_eq!(state.device_ids(), vec![3]);
        assert!(matches!(
            state.context(7),
            Err(ReaderError::UnregisteredDevice { device_id: 7 })
        ));
    }
}
