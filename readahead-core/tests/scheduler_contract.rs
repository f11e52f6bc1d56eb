//! Scheduling contract tests
//!
//! Drive the reader the way a training loop does: stages inserted into
//! driver-owned streams, eagerly and through captured graphs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use readahead_core::data::{DataReader, ReaderConfig};
use readahead_core::device::{StageLabel, Stream, StreamOp};
use readahead_core::runtime::RuntimeHandles;
use readahead_core::{AsyncReader, DeviceId, ReaderError, ReaderScheduling, StageKind};

fn reader(devices: &[DeviceId]) -> AsyncReader {
    AsyncReader::new(&RuntimeHandles::current(), devices, &ReaderConfig::default()).unwrap()
}

fn stream(device_id: DeviceId) -> Stream {
    Stream::new(device_id, &RuntimeHandles::current().device)
}

fn label(device_id: DeviceId, stage: StageKind) -> StageLabel {
    StageLabel::new(device_id, stage)
}

fn batch_stages(device_id: DeviceId) -> Vec<StageLabel> {
    vec![
        label(device_id, StageKind::Precompute),
        label(device_id, StageKind::D2D),
        label(device_id, StageKind::Barrier),
    ]
}

async fn feed(reader: &AsyncReader, device_id: DeviceId, data: &'static [u8]) {
    reader
        .feeder(device_id)
        .unwrap()
        .send(Bytes::from_static(data))
        .await
        .unwrap();
}

#[tokio::test]
async fn eager_batch_executes_in_stage_order() {
    let mut reader = reader(&[0]);
    let s = stream(0);
    feed(&reader, 0, b"batch-0").await;

    reader.schedule_precompute_here(&s, 0, false).unwrap();
    reader.schedule_d2d_here(&s, 0, false).unwrap();
    reader.schedule_here(&s, 0).unwrap();
    s.synchronize().await.unwrap();

    assert_eq!(s.executed_stages(), batch_stages(0));
    let batch = reader.current_batch(0).unwrap().unwrap();
    assert_eq!(&batch.data[..], b"batch-0");
    assert!(batch.verify_checksum());
}

#[tokio::test]
async fn scheduling_does_not_wait_for_data() {
    let mut reader = reader(&[0]);
    let s = stream(0);

    // No batch fed yet: every call must still return immediately
    reader.schedule_precompute_here(&s, 0, false).unwrap();
    reader.schedule_d2d_here(&s, 0, false).unwrap();
    reader.schedule_here(&s, 0).unwrap();
    assert_eq!(s.enqueued_stages(), batch_stages(0));
    assert!(s.executed_stages().is_empty());

    feed(&reader, 0, b"late").await;
    s.synchronize().await.unwrap();
    assert_eq!(s.executed_stages(), batch_stages(0));
}

#[tokio::test]
async fn unregistered_device_is_rejected() {
    let mut reader = reader(&[0, 1]);
    let s = stream(7);

    let err = reader.schedule_precompute_here(&s, 7, false).unwrap_err();
    assert!(matches!(err, ReaderError::UnregisteredDevice { device_id: 7 }));
    assert!(err.is_fatal());
    assert!(s.enqueued_stages().is_empty());
}

#[tokio::test]
async fn out_of_order_stage_leaves_stream_untouched() {
    let mut reader = reader(&[0]);
    let s = stream(0);

    let err = reader.schedule_d2d_here(&s, 0, false).unwrap_err();
    assert!(matches!(
        err,
        ReaderError::OutOfOrder {
            device_id: 0,
            stage: StageKind::D2D,
            expected: StageKind::Precompute,
        }
    ));
    assert!(matches!(
        reader.schedule_here(&s, 0),
        Err(ReaderError::OutOfOrder { .. })
    ));
    assert!(s.enqueued_stages().is_empty());

    // The rejected calls did not disturb the ordering state
    feed(&reader, 0, b"ok").await;
    reader.schedule_precompute_here(&s, 0, false).unwrap();
    reader.schedule_d2d_here(&s, 0, false).unwrap();
    reader.schedule_here(&s, 0).unwrap();
    s.synchronize().await.unwrap();
}

#[tokio::test]
async fn disabled_reader_reports_stably_and_schedules_itself() {
    let config = ReaderConfig {
        precompute_enabled: false,
        ..Default::default()
    };
    let mut reader = AsyncReader::new(&RuntimeHandles::current(), &[0], &config).unwrap();
    let s = stream(0);

    assert!(!reader.precompute_enabled());
    assert!(matches!(
        reader.schedule_precompute_here(&s, 0, false),
        Err(ReaderError::PrecomputeDisabled { device_id: 0 })
    ));
    assert!(matches!(
        reader.update_schedule_graph(0),
        Err(ReaderError::PrecomputeDisabled { .. })
    ));
    assert!(!reader.precompute_enabled());

    feed(&reader, 0, b"self").await;
    reader.read_a_batch_to_device().await.unwrap();
    assert_eq!(&reader.current_batch(0).unwrap().unwrap().data[..], b"self");
    assert!(s.enqueued_stages().is_empty());
}

#[tokio::test]
async fn eager_request_on_capturing_stream_is_capture_unsafe() {
    let mut reader = reader(&[0]);
    let s = stream(0);
    s.begin_capture().unwrap();

    let err = reader.schedule_precompute_here(&s, 0, false).unwrap_err();
    assert!(matches!(err, ReaderError::CaptureUnsafe { .. }));
    assert!(err.is_fatal());
    assert!(s.end_capture().is_err());
}

#[tokio::test]
async fn capturing_request_on_eager_stream_is_rejected() {
    let mut reader = reader(&[0]);
    let s = stream(0);

    let err = reader.schedule_precompute_here(&s, 0, true).unwrap_err();
    assert!(matches!(err, ReaderError::NotCapturing { device_id: 0, .. }));

    let err = reader.schedule_here_graph(&s, 0).unwrap_err();
    assert!(matches!(err, ReaderError::NotCapturing { .. }));
}

#[tokio::test]
async fn mixed_modes_within_a_batch_are_rejected() {
    let mut reader = reader(&[0]);
    let s = stream(0);
    s.begin_capture().unwrap();
    reader.schedule_precompute_here(&s, 0, true).unwrap();
    reader.schedule_d2d_here(&s, 0, true).unwrap();
    s.end_capture().unwrap();

    let eager = stream(0);
    assert!(matches!(
        reader.schedule_here(&eager, 0),
        Err(ReaderError::ModeMismatch { device_id: 0, .. })
    ));
}

#[tokio::test]
async fn update_before_capture_is_rejected() {
    let mut reader = reader(&[0]);
    assert!(matches!(
        reader.update_schedule_graph(0),
        Err(ReaderError::GraphNotCaptured { device_id: 0 })
    ));
}

#[tokio::test]
async fn captured_graph_replays_identically() {
    let mut reader = reader(&[0]);
    let s = stream(0);
    feed(&reader, 0, b"aaaaaaaa").await;

    s.begin_capture().unwrap();
    reader.schedule_precompute_here(&s, 0, true).unwrap();
    reader.schedule_d2d_here(&s, 0, true).unwrap();
    reader.schedule_here_graph(&s, 0).unwrap();
    let graph = s.end_capture().unwrap();

    // Nothing runs while capturing
    assert!(s.enqueued_stages().is_empty());
    assert_eq!(graph.stage_labels(), batch_stages(0));

    let context = reader.context(0).unwrap();
    let recorded = context.graph().unwrap();
    assert_eq!(
        recorded.stages(),
        &[StageKind::Precompute, StageKind::D2D, StageKind::Barrier]
    );
    let params = recorded.params();
    assert_eq!(params.batch_bytes, 8);
    assert_eq!(params.generation, 1);

    // Idempotent refresh
    reader.update_schedule_graph(0).unwrap();
    reader.update_schedule_graph(0).unwrap();
    assert_eq!(reader.scheduler().graph_params(0).unwrap(), params);

    feed(&reader, 0, b"bbbbbbbb").await;
    graph.launch(&s).unwrap();
    graph.launch(&s).unwrap();
    s.synchronize().await.unwrap();

    let mut expected = batch_stages(0);
    expected.extend(batch_stages(0));
    assert_eq!(s.executed_stages(), expected);

    let pipeline = reader.context(0).unwrap().pipeline().clone();
    assert_eq!(pipeline.published_batches(), 2);
    assert_eq!(&reader.current_batch(0).unwrap().unwrap().data[..], b"bbbbbbbb");
}

async fn capture_one_batch(reader: &mut AsyncReader, s: &Stream) -> readahead_core::device::CommandGraph {
    s.begin_capture().unwrap();
    reader.schedule_precompute_here(s, 0, true).unwrap();
    reader.schedule_d2d_here(s, 0, true).unwrap();
    reader.schedule_here_graph(s, 0).unwrap();
    s.end_capture().unwrap()
}

#[tokio::test]
async fn replay_with_new_shape_faults_until_updated() {
    let mut reader = reader(&[0]);
    let s = stream(0);
    feed(&reader, 0, b"12345678").await;
    let graph = capture_one_batch(&mut reader, &s).await;

    graph.launch(&s).unwrap();
    s.synchronize().await.unwrap();

    feed(&reader, 0, b"0123456789abcdef").await;
    graph.launch(&s).unwrap();
    let err = s.synchronize().await.unwrap_err();
    assert!(matches!(
        err,
        ReaderError::ShapeMismatch {
            device_id: 0,
            expected: 8,
            actual: 16,
        }
    ));
    assert!(err.is_corruption());
}

#[tokio::test]
async fn update_rebinds_graph_to_new_shape() {
    let mut reader = reader(&[0]);
    let s = stream(0);
    feed(&reader, 0, b"12345678").await;
    let graph = capture_one_batch(&mut reader, &s).await;

    graph.launch(&s).unwrap();
    s.synchronize().await.unwrap();

    feed(&reader, 0, b"0123456789abcdef").await;
    reader.update_schedule_graph(0).unwrap();
    let params = reader.scheduler().graph_params(0).unwrap();
    assert_eq!(params.batch_bytes, 16);
    assert_eq!(params.generation, 2);

    graph.launch(&s).unwrap();
    s.synchronize().await.unwrap();
    assert_eq!(reader.current_batch(0).unwrap().unwrap().data.len(), 16);
}

#[tokio::test]
async fn precompute_and_copy_on_different_streams() {
    let mut reader = reader(&[0]);
    let prep = stream(0);
    let copy = stream(0);

    reader.schedule_precompute_here(&prep, 0, false).unwrap();
    reader.schedule_d2d_here(&copy, 0, false).unwrap();
    reader.schedule_here(&copy, 0).unwrap();

    // The copy stream is held back by the precompute event
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(copy.executed_stages().is_empty());

    feed(&reader, 0, b"split").await;
    copy.synchronize().await.unwrap();
    prep.synchronize().await.unwrap();

    assert_eq!(prep.executed_stages(), vec![label(0, StageKind::Precompute)]);
    assert_eq!(
        copy.executed_stages(),
        vec![label(0, StageKind::D2D), label(0, StageKind::Barrier)]
    );
    assert_eq!(&reader.current_batch(0).unwrap().unwrap().data[..], b"split");
}

#[tokio::test]
async fn devices_interleave_on_one_stream() {
    let mut reader = reader(&[0, 1]);
    let s = stream(0);
    feed(&reader, 0, b"zero").await;
    feed(&reader, 1, b"one").await;

    reader.schedule_precompute_here(&s, 0, false).unwrap();
    reader.schedule_precompute_here(&s, 1, false).unwrap();
    reader.schedule_d2d_here(&s, 1, false).unwrap();
    reader.schedule_d2d_here(&s, 0, false).unwrap();
    reader.schedule_here(&s, 0).unwrap();
    reader.schedule_here(&s, 1).unwrap();
    s.synchronize().await.unwrap();

    assert_eq!(&reader.current_batch(0).unwrap().unwrap().data[..], b"zero");
    assert_eq!(&reader.current_batch(1).unwrap().unwrap().data[..], b"one");
    for device_id in [0, 1] {
        let context = reader.context(device_id).unwrap();
        assert_eq!(context.tracker().batches_scheduled(), 1);
        assert_eq!(context.pipeline().published_batches(), 1);
    }
}

#[tokio::test]
async fn upstream_fault_propagates_across_streams() {
    let mut reader = reader(&[0]);
    let prep = stream(0);
    let copy = stream(0);

    // Inbox closed and empty: precompute fails
    reader.close_inputs();
    reader.schedule_precompute_here(&prep, 0, false).unwrap();
    reader.schedule_d2d_here(&copy, 0, false).unwrap();
    reader.schedule_here(&copy, 0).unwrap();

    assert!(matches!(
        prep.synchronize().await,
        Err(ReaderError::DataExhausted { device_id: 0 })
    ));
    let err = copy.synchronize().await.unwrap_err();
    assert!(matches!(err, ReaderError::UpstreamFault { device_id: 0, upstream } if upstream == prep.id()));
    assert!(copy.executed_stages().is_empty());
}

#[tokio::test]
async fn replay_after_shape_fault_and_update_reads_the_rejected_batch() {
    let mut reader = reader(&[0]);
    let s = stream(0);
    feed(&reader, 0, b"12345678").await;
    let graph = capture_one_batch(&mut reader, &s).await;
    graph.launch(&s).unwrap();
    s.synchronize().await.unwrap();

    feed(&reader, 0, b"0123456789abcdef").await;
    graph.launch(&s).unwrap();
    assert!(matches!(
        s.synchronize().await,
        Err(ReaderError::ShapeMismatch { expected: 8, actual: 16, .. })
    ));

    // The faulted stream is dead; replay on a fresh one after the update
    reader.update_schedule_graph(0).unwrap();
    let fresh = stream(0);
    graph.launch(&fresh).unwrap();
    tokio::time::timeout(Duration::from_secs(5), fresh.synchronize())
        .await
        .expect("replay after update must not wait for more data")
        .unwrap();

    let batch = reader.current_batch(0).unwrap().unwrap();
    assert_eq!(batch.seq, 1);
    assert_eq!(&batch.data[..], b"0123456789abcdef");
    assert!(reader.context(0).unwrap().pipeline().held_batches().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapped_iterations_across_streams_consume_every_batch_in_order() {
    const ITERS: u64 = 4;
    let mut reader = reader(&[0]);
    let prep = stream(0);
    let copy = stream(0);
    let pipeline = reader.context(0).unwrap().pipeline().clone();

    let batches: [&'static [u8]; ITERS as usize] = [b"batch-0", b"batch-1", b"batch-2", b"batch-3"];
    for data in batches {
        feed(&reader, 0, data).await;
    }

    // Slow compute keeps the copy stream behind the precompute stream
    copy.enqueue(StreamOp::kernel(label(0, StageKind::Compute), || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }))
    .unwrap();

    let consumed = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..ITERS {
        reader.schedule_precompute_here(&prep, 0, false).unwrap();
        reader.schedule_d2d_here(&copy, 0, false).unwrap();
        reader.schedule_here(&copy, 0).unwrap();

        let consumed = consumed.clone();
        let pipeline = pipeline.clone();
        copy.enqueue(StreamOp::host(label(0, StageKind::Compute), move || {
            let batch = pipeline.current_batch();
            let held = pipeline.held_batches();
            consumed.lock().push((batch, held));
        }))
        .unwrap();
    }

    prep.synchronize().await.unwrap();
    copy.synchronize().await.unwrap();

    let consumed = consumed.lock();
    assert_eq!(consumed.len(), ITERS as usize);
    for (iter, (batch, held)) in consumed.iter().enumerate() {
        let batch = batch.as_ref().unwrap();
        assert_eq!(batch.seq, iter as u64);
        assert_eq!(&batch.data[..], batches[iter]);
        assert!(batch.verify_checksum());
        // Each barrier released its own batch and nothing newer
        assert!(held.iter().all(|seq| *seq > iter as u64), "{held:?}");
    }
    assert!(pipeline.held_batches().is_empty());
    assert_eq!(pipeline.published_batches(), ITERS);
}
