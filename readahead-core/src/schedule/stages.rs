//! Operation sequences for each pipeline stage
//!
//! Eager stages end with a host callback for bookkeeping. Graph stages emit
//! device-side work only so the whole sequence stays capturable.
//!
//! Staging and output are single buffers per device. Before overwriting one,
//! a stage waits for the previous batch's reader of that buffer: precompute
//! for the last copy, the copy for the last publish.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::device::{DevicePipeline, ExecutionMode, StageKind, StageLabel, StreamOp};

/// Build the ops implementing `stage` for one device
pub fn build_stage(
    pipeline: &Arc<DevicePipeline>,
    stage: StageKind,
    mode: ExecutionMode,
) -> Vec<StreamOp> {
    match stage {
        StageKind::Precompute => precompute_ops(pipeline, mode),
        StageKind::D2D => d2d_ops(pipeline, mode),
        StageKind::Barrier => barrier_ops(pipeline, mode),
        StageKind::Compute => Vec::new(),
    }
}

fn precompute_ops(pipeline: &Arc<DevicePipeline>, mode: ExecutionMode) -> Vec<StreamOp> {
    let label = StageLabel::new(pipeline.device_id(), StageKind::Precompute);
    let kernel = {
        let pipeline = pipeline.clone();
        StreamOp::kernel(label, move || {
            let pipeline = pipeline.clone();
            async move { pipeline.precompute(mode).await }
        })
    };

    let mut ops = vec![
        StreamOp::WaitFree(pipeline.d2d_done().clone()),
        kernel,
        StreamOp::Record(pipeline.precompute_done().clone()),
    ];
    if mode == ExecutionMode::Eager {
        let pipeline = pipeline.clone();
        ops.push(StreamOp::host(label, move || {
            trace!(
                "Device {}: staging holds batch {:?}",
                pipeline.device_id(),
                pipeline.staging().seq()
            );
        }));
    }
    ops
}

fn d2d_ops(pipeline: &Arc<DevicePipeline>, mode: ExecutionMode) -> Vec<StreamOp> {
    let label = StageLabel::new(pipeline.device_id(), StageKind::D2D);
    let kernel = {
        let pipeline = pipeline.clone();
        StreamOp::kernel(label, move || {
            let pipeline = pipeline.clone();
            async move { pipeline.transfer() }
        })
    };

    let mut ops = vec![
        StreamOp::WaitFree(pipeline.publish_done().clone()),
        StreamOp::Wait(pipeline.precompute_done().clone()),
        kernel,
        StreamOp::Record(pipeline.d2d_done().clone()),
    ];
    if mode == ExecutionMode::Eager {
        let pipeline = pipeline.clone();
        ops.push(StreamOp::host(label, move || {
            trace!(
                "Device {}: output holds batch {:?}",
                pipeline.device_id(),
                pipeline.output().seq()
            );
        }));
    }
    ops
}

fn barrier_ops(pipeline: &Arc<DevicePipeline>, mode: ExecutionMode) -> Vec<StreamOp> {
    let label = StageLabel::new(pipeline.device_id(), StageKind::Barrier);
    let wait = StreamOp::Wait(pipeline.d2d_done().clone());
    let record = StreamOp::Record(pipeline.publish_done().clone());

    match mode {
        ExecutionMode::Eager => {
            // Hands the published seq from the kernel to the release callback
            let published = Arc::new(Mutex::new(None));
            let kernel = {
                let pipeline = pipeline.clone();
                let published = published.clone();
                StreamOp::kernel(label, move || {
                    let pipeline = pipeline.clone();
                    let published = published.clone();
                    async move {
                        *published.lock() = pipeline.publish();
                        Ok(())
                    }
                })
            };
            let release = {
                let pipeline = pipeline.clone();
                StreamOp::host(label, move || {
                    if let Some(seq) = published.lock().take() {
                        let released = pipeline.release(seq);
                        debug!(
                            "Device {}: released batch {} ({} held batches dropped)",
                            pipeline.device_id(),
                            seq,
                            released
                        );
                    }
                })
            };
            vec![wait, kernel, record, release]
        }
        // No host callback under capture: release happens inside the kernel
        ExecutionMode::Capturing => {
            let pipeline = pipeline.clone();
            let kernel = StreamOp::kernel(label, move || {
                let pipeline = pipeline.clone();
                async move {
                    if let Some(seq) = pipeline.publish() {
                        pipeline.release(seq);
                    }
                    Ok(())
                }
            });
            vec![wait, kernel, record]
        }
    }
}
