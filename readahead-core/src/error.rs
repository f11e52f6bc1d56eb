//! Error types for the reader pipeline
//!
//! Covers scheduling contract violations, device stream faults,
//! storage and model-loading errors.

use thiserror::Error;

use crate::device::{DeviceId, ExecutionMode, StageKind, StreamId};

/// Primary error type for all reader operations
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    // ========== Contract Violations ==========

    /// Scheduling addressed a device with no context
    #[error("Device {device_id} has no registered context")]
    UnregisteredDevice { device_id: DeviceId },

    /// A context already exists for this device
    #[error("Device {device_id} is already registered")]
    DuplicateDevice { device_id: DeviceId },

    /// Stage requested out of Precompute -> D2D -> Barrier order
    #[error("Device {device_id}: {stage} scheduled out of order (expected {expected})")]
    OutOfOrder {
        device_id: DeviceId,
        stage: StageKind,
        expected: StageKind,
    },

    /// Stages of one batch were requested in different modes
    #[error("Device {device_id}: {stage} requested in {actual} mode, batch started in {expected} mode")]
    ModeMismatch {
        device_id: DeviceId,
        stage: StageKind,
        expected: ExecutionMode,
        actual: ExecutionMode,
    },

    /// Capturing request against a stream that is not capturing
    #[error("Device {device_id}: stream {stream} is not capturing")]
    NotCapturing { device_id: DeviceId, stream: StreamId },

    /// Host-synchronous work issued while a stream is capturing
    #[error("Stream {stream}: '{op}' is not legal during graph capture")]
    CaptureUnsafe { stream: StreamId, op: String },

    /// begin_capture on a stream that is already capturing
    #[error("Stream {stream} is already capturing")]
    CaptureInProgress { stream: StreamId },

    /// Graph operation on a device that never completed a capture pass
    #[error("Device {device_id} has no captured schedule graph")]
    GraphNotCaptured { device_id: DeviceId },

    /// Scheduling call on a reader that does not overlap precompute
    #[error("Precompute overlap is disabled (device {device_id})")]
    PrecomputeDisabled { device_id: DeviceId },

    // ========== Device Errors ==========

    /// Work on a stream failed; later work on that stream is skipped
    #[error("Stream {stream} on device {device_id} faulted: {reason}")]
    StreamFault {
        device_id: DeviceId,
        stream: StreamId,
        reason: String,
    },

    /// Stream waited on an event recorded by a faulted stream
    #[error("Device {device_id}: upstream stream {upstream} faulted")]
    UpstreamFault { device_id: DeviceId, upstream: StreamId },

    /// Captured graph parameters do not match the incoming batch
    #[error("Device {device_id}: batch of {actual} bytes does not match graph shape of {expected} bytes")]
    ShapeMismatch {
        device_id: DeviceId,
        expected: usize,
        actual: usize,
    },

    /// Inbox closed with no batch left for the device
    #[error("Data exhausted for device {device_id}")]
    DataExhausted { device_id: DeviceId },

    /// Checksum mismatch on read
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch { key: String, expected: u32, actual: u32 },

    // ========== Storage Errors ==========

    /// Storage operation failed
    #[error("Storage operation failed: {message}")]
    StorageError { message: String },

    /// Object not found in storage
    #[error("Object not found: {path}")]
    ObjectNotFound { path: String },

    /// Write without overwrite hit an existing object
    #[error("Object already exists: {path}")]
    AlreadyExists { path: String },

    // ========== Model Errors ==========

    /// Inference backend not in the supported set
    #[error("Unknown inference type: {infer_type}")]
    UnknownInferType { infer_type: String },

    /// Model config missing, unparseable or inconsistent
    #[error("Invalid model config {path}: {reason}")]
    ModelConfig { path: String, reason: String },

    /// Predict inputs sized inconsistently with num_samples
    #[error("Invalid inference input: {reason}")]
    InvalidInput { reason: String },

    // ========== Runtime Errors ==========

    /// Shutdown in progress
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ReaderError {
    /// Returns true for programming errors that must abort the pipeline
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReaderError::UnregisteredDevice { .. }
                | ReaderError::DuplicateDevice { .. }
                | ReaderError::OutOfOrder { .. }
                | ReaderError::ModeMismatch { .. }
                | ReaderError::NotCapturing { .. }
                | ReaderError::CaptureUnsafe { .. }
                | ReaderError::CaptureInProgress { .. }
                | ReaderError::GraphNotCaptured { .. }
                | ReaderError::PrecomputeDisabled { .. }
        )
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReaderError::StorageError { .. })
    }

    /// Returns true if this error indicates data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ReaderError::ChecksumMismatch { .. } | ReaderError::ShapeMismatch { .. }
        )
    }

    /// Device the error is attached to, if any
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            ReaderError::UnregisteredDevice { device_id }
            | ReaderError::DuplicateDevice { device_id }
            | ReaderError::OutOfOrder { device_id, .. }
            | ReaderError::ModeMismatch { device_id, .. }
            | ReaderError::NotCapturing { device_id, .. }
            | ReaderError::GraphNotCaptured { device_id }
            | ReaderError::PrecomputeDisabled { device_id }
            | ReaderError::StreamFault { device_id, .. }
            | ReaderError::UpstreamFault { device_id, .. }
            | ReaderError::ShapeMismatch { device_id, .. }
            | ReaderError::DataExhausted { device_id } => Some(*device_id),
            _ => None,
        }
    }
}

/// Result type alias for reader operations
pub type Result<T> = std::result::Result<T, ReaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violations_are_fatal() {
        let err = ReaderError::OutOfOrder {
            device_id: 3,
            stage: StageKind::D2D,
            expected: StageKind::Precompute,
        };
        assert!(err.is_fatal());
        assert_eq!(err.device_id(), Some(3));

        let err = ReaderError::StorageError { message: "timeout".into() };
        assert!(!err.is_fatal());
        assert!(err.is_retryable());
        assert_eq!(err.device_id(), None);
    }
}
