//! Reader scheduler: inserts pipeline stages into caller streams

use tracing::{debug, info};
use uuid::Uuid;

use super::request::{RequestKind, ScheduleRequest};
use super::stages::build_stage;
use super::state::PipelineState;
use super::ReaderScheduling;
use crate::device::context::CaptureBuilder;
use crate::device::{DeviceId, ExecutionMode, GraphParams, StageKind, Stream};
use crate::error::{ReaderError, Result};
use crate::metrics::standard;

/// Owns the pipeline state and is its only mutator
#[derive(Debug)]
pub struct ReaderScheduler {
    state: PipelineState,
    precompute_enabled: bool,
}

impl ReaderScheduler {
    pub fn new(mut state: PipelineState, precompute_enabled: bool) -> Self {
        for context in state.contexts_mut() {
            context.set_precompute_enabled(precompute_enabled);
        }
        info!(
            "Reader scheduler for pipeline {} over {} devices (precompute {})",
            state.id(),
            state.len(),
            if precompute_enabled { "enabled" } else { "disabled" }
        );
        Self {
            state,
            precompute_enabled,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn pipeline_id(&self) -> Uuid {
        self.state.id()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.state.device_ids()
    }

    /// Graph parameters currently bound for a device
    pub fn graph_params(&self, device_id: DeviceId) -> Result<GraphParams> {
        Ok(self.state.context(device_id)?.pipeline().params())
    }

    /// Handle one scheduling request
    pub fn schedule(&mut self, request: ScheduleRequest) -> Result<()> {
        if !self.precompute_enabled {
            return Err(ReaderError::PrecomputeDisabled {
                device_id: request.device_id,
            });
        }
        self.dispatch(request)
    }

    /// Schedule all three stages of one batch on the device's own stream
    ///
    /// Used by readers without an external driver, so it does not depend on
    /// the precompute capability.
    pub fn schedule_full_batch(&mut self, device_id: DeviceId) -> Result<()> {
        let stream = self.state.context(device_id)?.stream().clone();
        self.dispatch(ScheduleRequest::precompute(&stream, device_id, false))?;
        self.dispatch(ScheduleRequest::d2d(&stream, device_id, false))?;
        self.dispatch(ScheduleRequest::generic(&stream, device_id))
    }

    fn dispatch(&mut self, request: ScheduleRequest) -> Result<()> {
        let device_id = request.device_id;
        match (request.stage(), request.stream) {
            (Some(stage), Some(stream)) => self.insert_stage(device_id, stage, request.mode, &stream),
            (None, _) if request.kind == RequestKind::GraphUpdate => self.update_graph(device_id),
            _ => Err(ReaderError::Internal {
                message: format!("{:?} request for device {} without a stream", request.kind, device_id),
            }),
        }
    }

    fn insert_stage(
        &mut self,
        device_id: DeviceId,
        stage: StageKind,
        mode: ExecutionMode,
        stream: &Stream,
    ) -> Result<()> {
        let context = self.state.context_mut(device_id)?;

        if mode.is_capturing() && !stream.is_capturing() {
            return Err(ReaderError::NotCapturing {
                device_id,
                stream: stream.id(),
            });
        }

        let transition = context.tracker.plan(stage, mode)?;
        let ops = build_stage(context.pipeline(), stage, mode);
        stream.enqueue_all(ops)?;
        context.tracker.commit(transition);
        standard::STAGES_SCHEDULED.inc();

        debug!(
            "Device {}: scheduled {} ({}) on stream {}",
            device_id,
            stage,
            mode,
            stream.id()
        );

        if mode.is_capturing() {
            let builder = context.capture.get_or_insert_with(|| CaptureBuilder {
                stream: stream.id(),
                stages: Vec::new(),
            });
            builder.stages.push(stage);

            if stage == StageKind::Barrier {
                if let Some(builder) = context.capture.take() {
                    let params = context.complete_capture(builder);
                    debug!(
                        "Device {}: capture pass complete, params {:?}",
                        device_id, params
                    );
                }
            }
        }
        Ok(())
    }

    fn update_graph(&mut self, device_id: DeviceId) -> Result<()> {
        let context = self.state.context_mut(device_id)?;
        let params = context
            .refresh_graph()
            .ok_or(ReaderError::GraphNotCaptured { device_id })?;
        standard::GRAPH_UPDATES.inc();
        debug!("Device {}: graph params refreshed to {:?}", device_id, params);
        Ok(())
    }
}

impl ReaderScheduling for ReaderScheduler {
    fn schedule_precompute_here(&mut self, stream: &Stream, device_id: DeviceId, from_graph: bool) -> Result<()> {
        self.schedule(ScheduleRequest::precompute(stream, device_id, from_graph))
    }

    fn schedule_d2d_here(&mut self, stream: &Stream, device_id: DeviceId, from_graph: bool) -> Result<()> {
        self.schedule(ScheduleRequest::d2d(stream, device_id, from_graph))
    }

    fn schedule_here(&mut self, stream: &Stream, device_id: DeviceId) -> Result<()> {
        self.schedule(ScheduleRequest::generic(stream, device_id))
    }

    fn schedule_here_graph(&mut self, stream: &Stream, device_id: DeviceId) -> Result<()> {
        self.schedule(ScheduleRequest::generic_graph(stream, device_id))
    }

    fn update_schedule_graph(&mut self, device_id: DeviceId) -> Result<()> {
        self.schedule(ScheduleRequest::graph_update(device_id))
    }

    fn precompute_enabled(&self) -> bool {
        self.precompute_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Passthrough;
    use crate::device::DeviceContext;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    fn scheduler(devices: &[DeviceId], enabled: bool) -> (ReaderScheduler, Vec<crate::device::BatchFeeder>) {
        let mut state = PipelineState::new();
        let mut feeders = Vec::new();
        for &id in devices {
            let (context, feeder) = DeviceContext::new(id, &Handle::current(), Arc::new(Passthrough), 4);
            state.register_device(context).unwrap();
            feeders.push(feeder);
        }
        (ReaderScheduler::new(state, enabled), feeders)
    }

    #[tokio::test]
    async fn test_failed_enqueue_keeps_ordering_state() {
        let (mut scheduler, _feeders) = scheduler(&[0], true);
        let stream = Stream::new(0, &Handle::current());
        stream.begin_capture().unwrap();

        // Eager precompute carries a host callback the capture rejects
        let err = scheduler.schedule_precompute_here(&stream, 0, false).unwrap_err();
        assert!(matches!(err, ReaderError::CaptureUnsafe { .. }));
        let tracker = scheduler.state().context(0).unwrap().tracker();
        assert_eq!(tracker.expected(), StageKind::Precompute);
    }

    #[tokio::test]
    async fn test_full_batch_on_own_stream() {
        let (mut scheduler, feeders) = scheduler(&[1], false);
        feeders[0].send(Bytes::from_static(b"abcd")).await.unwrap();

        scheduler.schedule_full_batch(1).unwrap();
        let context = scheduler.state().context(1).unwrap();
        context.stream().synchronize().await.unwrap();

        let batch = context.current_batch().unwrap();
        assert_eq!(&batch.data[..], b"abcd");
        assert_eq!(context.pipeline().published_batches(), 1);
        assert_eq!(context.pipeline().held_batch(), None);
    }

    #[tokio::test]
    async fn test_update_without_capture() {
        let (mut scheduler, _feeders) = scheduler(&[0], true);
        assert!(matches!(
            scheduler.update_schedule_graph(0),
            Err(ReaderError::GraphNotCaptured { device_id: 0 })
        ));
    }
}
