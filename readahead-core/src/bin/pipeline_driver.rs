//! Demo pipeline driver
//!
//! Writes a synthetic dataset, then trains "compute" against it: first with
//! eagerly scheduled reader stages, then by replaying a captured graph.
//!
//! Environment:
//! - `READAHEAD_DEVICES`: number of simulated devices (default 2)
//! - `READAHEAD_ITERS`: iterations per phase (default 8)
//! - `READAHEAD_BATCH_BYTES`: raw batch size (default 64 KiB)
//! - `READAHEAD_DATA_DIR`: dataset directory (default: fresh temp dir)
//! - `READAHEAD_PRECOMPUTE`: `false` to let the reader schedule itself

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use readahead_core::data::{DatasetConfig, ReaderConfig};
use readahead_core::device::{CommandGraph, DevicePipeline, StageLabel, StreamOp};
use readahead_core::metrics::gather_system_metrics;
use readahead_core::runtime::{RuntimeConfig, RuntimeHandles};
use readahead_core::storage::{LocalStorage, StorageBackend};
use readahead_core::{
    AsyncReader, DataReader, DeviceId, ReaderError, ReaderRuntime, ReaderScheduling, StageKind,
    Stream, DEFAULT_BATCH_BYTES,
};

struct DriverSettings {
    devices: u32,
    iters: usize,
    batch_bytes: usize,
    data_dir: Option<PathBuf>,
    precompute: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl DriverSettings {
    fn from_env() -> Self {
        Self {
            devices: env_or("READAHEAD_DEVICES", 2u32).max(1),
            iters: env_or("READAHEAD_ITERS", 8usize).max(1),
            batch_bytes: env_or("READAHEAD_BATCH_BYTES", DEFAULT_BATCH_BYTES).max(1),
            data_dir: std::env::var("READAHEAD_DATA_DIR").ok().map(PathBuf::from),
            precompute: env_or("READAHEAD_PRECOMPUTE", true),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = DriverSettings::from_env();
    let runtime = ReaderRuntime::new(RuntimeConfig::default())?;
    let handles = runtime.handles();

    let result = runtime.block_on_io(run(handles, settings));
    runtime.shutdown();

    if let Err(e) = &result {
        error!("Pipeline driver failed: {}", e);
    }
    result
}

async fn run(handles: RuntimeHandles, settings: DriverSettings) -> Result<(), Box<dyn std::error::Error>> {
    let (data_dir, owned_dir) = match &settings.data_dir {
        Some(dir) => (dir.clone(), false),
        None => (
            std::env::temp_dir().join(format!("readahead-{}", uuid::Uuid::new_v4())),
            true,
        ),
    };
    let storage = Arc::new(LocalStorage::new(&data_dir));
    let device_ids: Vec<DeviceId> = (0..settings.devices).collect();

    // Two sources per device, each covering one phase
    let source_bytes = settings.iters * settings.batch_bytes;
    let mut paths = Vec::new();
    for idx in 0..settings.devices * 2 {
        let path = format!("train/part-{idx:05}.bin");
        let data: Vec<u8> = (0..source_bytes).map(|i| ((i + idx as usize) % 251) as u8).collect();
        storage.write(&path, &data, true)?;
        paths.push(path);
    }
    let dataset = DatasetConfig::from_storage("synthetic", storage.as_ref(), &paths, settings.batch_bytes)?;
    info!(
        "Wrote {} sources of {} bytes to {}",
        paths.len(),
        source_bytes,
        data_dir.display()
    );

    let config = ReaderConfig {
        precompute_enabled: settings.precompute,
        ..Default::default()
    };
    let mut reader = AsyncReader::with_storage(&handles, &device_ids, storage, &dataset, &config)?;

    let outcome = if reader.precompute_enabled() {
        drive_overlapped(&handles, &mut reader, &device_ids, settings.iters).await
    } else {
        drive_self_scheduled(&mut reader, settings.iters * 2).await
    };

    let stats = reader.shutdown().await;
    for (device_id, s) in device_ids.iter().zip(&stats) {
        info!(
            "Device {}: {} batches prefetched from {} sources",
            device_id, s.batches_sent, s.sources_read
        );
    }
    println!("{}", gather_system_metrics());

    if owned_dir {
        let _ = std::fs::remove_dir_all(&data_dir);
    }
    outcome.map_err(Into::into)
}

/// Reader schedules itself on its own streams
async fn drive_self_scheduled(reader: &mut AsyncReader, iters: usize) -> Result<(), ReaderError> {
    for iter in 0..iters {
        reader.read_a_batch_to_device().await?;
        for device_id in reader.device_ids() {
            if let Some(batch) = reader.current_batch(device_id)? {
                info!("Iteration {}: device {} batch {}", iter, device_id, batch.seq);
            }
        }
    }
    Ok(())
}

/// Reader stages interleaved with compute on driver streams
async fn drive_overlapped(
    handles: &RuntimeHandles,
    reader: &mut AsyncReader,
    device_ids: &[DeviceId],
    iters: usize,
) -> Result<(), ReaderError> {
    let streams: Vec<Stream> = device_ids
        .iter()
        .map(|&id| Stream::new(id, &handles.device))
        .collect();
    let pipelines = device_ids
        .iter()
        .map(|&id| Ok(reader.context(id)?.pipeline().clone()))
        .collect::<Result<Vec<_>, ReaderError>>()?;

    for iter in 0..iters {
        for ((&device_id, stream), pipeline) in device_ids.iter().zip(&streams).zip(&pipelines) {
            reader.schedule_precompute_here(stream, device_id, false)?;
            reader.schedule_d2d_here(stream, device_id, false)?;
            reader.schedule_here(stream, device_id)?;
            stream.enqueue(compute_op(pipeline.clone()))?;
        }
        synchronize_all(&streams).await?;
        info!("Eager iteration {} complete", iter);
    }

    let mut graphs: Vec<CommandGraph> = Vec::with_capacity(streams.len());
    for ((&device_id, stream), pipeline) in device_ids.iter().zip(&streams).zip(&pipelines) {
        stream.begin_capture()?;
        reader.schedule_precompute_here(stream, device_id, true)?;
        reader.schedule_d2d_here(stream, device_id, true)?;
        reader.schedule_here_graph(stream, device_id)?;
        stream.enqueue(compute_op(pipeline.clone()))?;
        graphs.push(stream.end_capture()?);
    }

    for &device_id in device_ids {
        reader.update_schedule_graph(device_id)?;
    }

    for iter in 0..iters {
        for (graph, stream) in graphs.iter().zip(&streams) {
            graph.launch(stream)?;
        }
        synchronize_all(&streams).await?;
        info!("Graph iteration {} complete", iter);
    }
    Ok(())
}

/// Consumer of the published batch
fn compute_op(pipeline: Arc<DevicePipeline>) -> StreamOp {
    let label = StageLabel::new(pipeline.device_id(), StageKind::Compute);
    StreamOp::kernel(label, move || {
        let pipeline = pipeline.clone();
        async move {
            let batch = pipeline.current_batch().ok_or(ReaderError::Internal {
                message: format!("device {}: compute ran before any batch", pipeline.device_id()),
            })?;
            if !batch.verify_checksum() {
                return Err(ReaderError::ChecksumMismatch {
                    key: format!("device-{}/batch-{}", batch.device_id, batch.seq),
                    expected: batch.checksum,
                    actual: crc32c::crc32c(&batch.data),
                });
            }
            Ok(())
        }
    })
}

async fn synchronize_all(streams: &[Stream]) -> Result<(), ReaderError> {
    for stream in streams {
        if let Err(e) = stream.synchronize().await {
            if e.is_fatal() {
                error!("Contract violation on stream {}: {}", stream.id(), e);
            }
            return Err(e);
        }
    }
    Ok(())
}
