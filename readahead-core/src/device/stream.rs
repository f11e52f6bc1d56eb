//! Ordered per-device work queue
//!
//! Each stream owns a worker task that executes operations strictly in
//! enqueue order. Enqueueing never blocks the caller; any suspension
//! (waiting for input data or for an event) happens inside the worker.
//!
//! While capturing, operations are recorded into a [`CommandGraph`] instead
//! of being dispatched. Host callbacks are not capturable: enqueueing one
//! fails with `CaptureUnsafe` and invalidates the capture.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use super::event::Event;
use super::graph::CommandGraph;
use super::types::{DeviceId, ExecutionMode, StageLabel, StreamId};
use crate::error::{ReaderError, Result};
use crate::metrics::standard;

/// Future produced by a kernel each time it runs
pub type OpFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// Replayable device-side work
pub type KernelFn = Arc<dyn Fn() -> OpFuture + Send + Sync>;

/// Host callback run in stream order
pub type HostFn = Arc<dyn Fn() + Send + Sync>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of work as handed to a stream or stored in a graph
#[derive(Clone)]
pub enum StreamOp {
    /// Device-side work, legal eagerly and under capture
    Kernel { label: StageLabel, run: KernelFn },
    /// Host callback, forbidden under capture
    Host { label: StageLabel, run: HostFn },
    /// Record an event at this point of the stream
    Record(Event),
    /// Block the stream until the latest record of the event executed
    Wait(Event),
    /// Like `Wait`, but a fault behind the record does not propagate;
    /// orders reuse of a buffer whose previous reader may have been skipped
    WaitFree(Event),
}

impl StreamOp {
    /// Build a kernel op from an async closure
    pub fn kernel<F, Fut>(label: StageLabel, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        StreamOp::Kernel {
            label,
            run: Arc::new(move || -> OpFuture { Box::pin(f()) }),
        }
    }

    /// Build a host callback op
    pub fn host<F>(label: StageLabel, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        StreamOp::Host {
            label,
            run: Arc::new(f),
        }
    }

    pub fn is_capture_safe(&self) -> bool {
        !matches!(self, StreamOp::Host { .. })
    }

    /// Label of kernel and host ops
    pub fn label(&self) -> Option<StageLabel> {
        match self {
            StreamOp::Kernel { label, .. } | StreamOp::Host { label, .. } => Some(*label),
            StreamOp::Record(_) | StreamOp::Wait(_) | StreamOp::WaitFree(_) => None,
        }
    }
}

impl fmt::Debug for StreamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOp::Kernel { label, .. } => write!(f, "kernel({})", label),
            StreamOp::Host { label, .. } => write!(f, "host({})", label),
            StreamOp::Record(event) => write!(f, "record(event {})", event.id()),
            StreamOp::Wait(event) => write!(f, "wait(event {})", event.id()),
            StreamOp::WaitFree(event) => write!(f, "wait-free(event {})", event.id()),
        }
    }
}

/// Kind of executed work in a stream's log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Kernel,
    Host,
}

/// Entry of the execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutedOp {
    pub label: StageLabel,
    pub kind: OpKind,
}

/// Resolved work sent to the worker
enum Command {
    Kernel(StageLabel, KernelFn),
    Host(StageLabel, HostFn),
    Record(Event, u64),
    /// Event, target, whether a fault behind the target propagates
    Wait(Event, u64, bool),
    Fence(oneshot::Sender<()>),
}

/// State shared with the worker task
struct StreamShared {
    id: StreamId,
    device_id: DeviceId,
    fault: Mutex<Option<ReaderError>>,
    executed: Mutex<Vec<ExecutedOp>>,
}

impl StreamShared {
    fn is_faulted(&self) -> bool {
        self.fault.lock().is_some()
    }

    fn set_fault(&self, err: ReaderError) {
        let err = if err.device_id().is_some() {
            err
        } else {
            ReaderError::StreamFault {
                device_id: self.device_id,
                stream: self.id,
                reason: err.to_string(),
            }
        };
        error!("Stream {} on device {} faulted: {}", self.id, self.device_id, err);
        standard::STREAM_FAULTS.inc();
        self.fault.lock().get_or_insert(err);
    }
}

#[derive(Default)]
struct CaptureState {
    ops: Vec<StreamOp>,
    invalidated: Option<ReaderError>,
}

struct StreamInner {
    shared: Arc<StreamShared>,
    sender: mpsc::UnboundedSender<Command>,
    capture: Mutex<Option<CaptureState>>,
    /// Kernel labels dispatched so far, in order
    enqueued: Mutex<Vec<StageLabel>>,
}

/// Handle to a device stream; clones refer to the same queue
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl Stream {
    /// Create a stream whose worker runs on `handle`
    pub fn new(device_id: DeviceId, handle: &Handle) -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(StreamShared {
            id,
            device_id,
            fault: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
        });
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_stream(shared.clone(), receiver));

        debug!("Created stream {} for device {}", id, device_id);

        Self {
            inner: Arc::new(StreamInner {
                shared,
                sender,
                capture: Mutex::new(None),
                enqueued: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> StreamId {
        self.inner.shared.id
    }

    pub fn device_id(&self) -> DeviceId {
        self.inner.shared.device_id
    }

    /// Current mode of the stream
    pub fn mode(&self) -> ExecutionMode {
        if self.inner.capture.lock().is_some() {
            ExecutionMode::Capturing
        } else {
            ExecutionMode::Eager
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.mode().is_capturing()
    }

    /// Enqueue a single operation
    pub fn enqueue(&self, op: StreamOp) -> Result<()> {
        self.enqueue_all(vec![op])
    }

    /// Enqueue operations as one unit
    ///
    /// Under capture either all ops are recorded or none are.
    pub fn enqueue_all(&self, ops: Vec<StreamOp>) -> Result<()> {
        let mut capture = self.inner.capture.lock();

        if let Some(state) = capture.as_mut() {
            if let Some(op) = ops.iter().find(|op| !op.is_capture_safe()) {
                let err = ReaderError::CaptureUnsafe {
                    stream: self.id(),
                    op: format!("{:?}", op),
                };
                state.invalidated.get_or_insert_with(|| err.clone());
                return Err(err);
            }
            trace!("Stream {}: recorded {} ops", self.id(), ops.len());
            state.ops.extend(ops);
            return Ok(());
        }

        // Capture lock stays held so begin_capture cannot split the batch.
        for op in ops {
            self.dispatch(op)?;
        }
        Ok(())
    }

    fn dispatch(&self, op: StreamOp) -> Result<()> {
        let command = match op {
            StreamOp::Kernel { label, run } => {
                self.inner.enqueued.lock().push(label);
                Command::Kernel(label, run)
            }
            StreamOp::Host { label, run } => Command::Host(label, run),
            StreamOp::Record(event) => {
                let target = event.next_target();
                Command::Record(event, target)
            }
            StreamOp::Wait(event) => {
                let target = event.pending_target();
                Command::Wait(event, target, true)
            }
            StreamOp::WaitFree(event) => {
                let target = event.pending_target();
                Command::Wait(event, target, false)
            }
        };
        self.send(command)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner.sender.send(command).map_err(|_| ReaderError::Internal {
            message: format!("stream {} worker has stopped", self.id()),
        })
    }

    /// Start recording into a graph
    pub fn begin_capture(&self) -> Result<()> {
        let mut capture = self.inner.capture.lock();
        if capture.is_some() {
            return Err(ReaderError::CaptureInProgress { stream: self.id() });
        }
        *capture = Some(CaptureState::default());
        debug!("Stream {} began capture", self.id());
        Ok(())
    }

    /// Stop recording and return the captured graph
    pub fn end_capture(&self) -> Result<CommandGraph> {
        let state = self
            .inner
            .capture
            .lock()
            .take()
            .ok_or(ReaderError::NotCapturing {
                device_id: self.device_id(),
                stream: self.id(),
            })?;

        if let Some(err) = state.invalidated {
            return Err(err);
        }

        debug!("Stream {} ended capture with {} nodes", self.id(), state.ops.len());
        Ok(CommandGraph::new(self.id(), self.device_id(), state.ops))
    }

    /// Wait until everything enqueued so far has executed
    ///
    /// Returns the stream's fault, if any op failed.
    pub async fn synchronize(&self) -> Result<()> {
        if self.is_capturing() {
            return Err(ReaderError::CaptureUnsafe {
                stream: self.id(),
                op: "synchronize".into(),
            });
        }

        let (done, wait) = oneshot::channel();
        self.send(Command::Fence(done))?;
        wait.await.map_err(|_| ReaderError::Internal {
            message: format!("stream {} worker dropped a fence", self.id()),
        })?;

        match self.fault() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sticky fault of this stream
    pub fn fault(&self) -> Option<ReaderError> {
        self.inner.shared.fault.lock().clone()
    }

    /// Kernel labels dispatched so far, in enqueue order
    pub fn enqueued_stages(&self) -> Vec<StageLabel> {
        self.inner.enqueued.lock().clone()
    }

    /// Kernels and host callbacks executed so far, in execution order
    pub fn executed(&self) -> Vec<ExecutedOp> {
        self.inner.shared.executed.lock().clone()
    }

    /// Executed kernel labels only
    pub fn executed_stages(&self) -> Vec<StageLabel> {
        self.executed()
            .into_iter()
            .filter(|op| op.kind == OpKind::Kernel)
            .map(|op| op.label)
            .collect()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("device_id", &self.device_id())
            .field("mode", &self.mode())
            .finish()
    }
}

/// Worker loop: executes commands in FIFO order
async fn run_stream(shared: Arc<StreamShared>, mut receiver: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Fence(done) => {
                let _ = done.send(());
            }
            Command::Record(event, target) => {
                if shared.is_faulted() {
                    event.mark_faulted(target, shared.id);
                }
                event.complete(target);
            }
            Command::Wait(event, target, propagate) => {
                event.wait_for(target).await;
                if !propagate {
                    continue;
                }
                if let Some(upstream) = event.faulted_at(target) {
                    if upstream != shared.id && !shared.is_faulted() {
                        shared.set_fault(ReaderError::UpstreamFault {
                            device_id: shared.device_id,
                            upstream,
                        });
                    }
                }
            }
            Command::Kernel(label, run) => {
                if shared.is_faulted() {
                    trace!("Stream {}: skipping {} after fault", shared.id, label);
                    continue;
                }
                match run().await {
                    Ok(()) => shared.executed.lock().push(ExecutedOp {
                        label,
                        kind: OpKind::Kernel,
                    }),
                    Err(e) => shared.set_fault(e),
                }
            }
            Command::Host(label, run) => {
                if shared.is_faulted() {
                    continue;
                }
                run();
                shared.executed.lock().push(ExecutedOp {
                    label,
                    kind: OpKind::Host,
                });
            }
        }
    }

    debug!("Stream {} worker exiting", shared.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StageKind;
    use std::sync::atomic::AtomicUsize;

    fn label(stage: StageKind) -> StageLabel {
        StageLabel::new(0, stage)
    }

    #[tokio::test]
    async fn test_fifo_execution() {
        let stream = Stream::new(0, &Handle::current());
        let order = Arc::new(Mutex::new(Vec::new()));

        for stage in [StageKind::Precompute, StageKind::D2D, StageKind::Barrier] {
            let order = order.clone();
            stream
                .enqueue(StreamOp::kernel(label(stage), move || {
                    let order = order.clone();
                    async move {
                        order.lock().push(stage);
                        Ok(())
                    }
                }))
                .unwrap();
        }

        stream.synchronize().await.unwrap();
        assert_eq!(
            *order.lock(),
            vec![StageKind::Precompute, StageKind::D2D, StageKind::Barrier]
        );
        assert_eq!(stream.executed_stages().len(), 3);
    }

    #[tokio::test]
    async fn test_fault_is_sticky_and_skips_work() {
        let stream = Stream::new(4, &Handle::current());
        let ran = Arc::new(AtomicUsize::new(0));

        stream
            .enqueue(StreamOp::kernel(label(StageKind::Precompute), || async {
                Err(ReaderError::Internal { message: "boom".into() })
            }))
            .unwrap();
        let counter = ran.clone();
        stream
            .enqueue(StreamOp::host(label(StageKind::D2D), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let err = stream.synchronize().await.unwrap_err();
        assert!(matches!(err, ReaderError::StreamFault { device_id: 4, .. }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_capture_rejects_host_ops() {
        let stream = Stream::new(0, &Handle::current());
        stream.begin_capture().unwrap();
        assert!(matches!(
            stream.begin_capture(),
            Err(ReaderError::CaptureInProgress { .. })
        ));

        let err = stream
            .enqueue(StreamOp::host(label(StageKind::Barrier), || {}))
            .unwrap_err();
        assert!(matches!(err, ReaderError::CaptureUnsafe { .. }));
        assert!(matches!(
            stream.synchronize().await,
            Err(ReaderError::CaptureUnsafe { .. })
        ));

        // The capture is invalidated by the rejected op
        assert!(matches!(
            stream.end_capture(),
            Err(ReaderError::CaptureUnsafe { .. })
        ));
        assert!(!stream.is_capturing());
    }
}
