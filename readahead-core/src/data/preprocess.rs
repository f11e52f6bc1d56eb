//! Batch preprocessing run by the precompute stage

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use serde::Deserialize;

use crate::error::Result;

/// Transform from a raw batch to its device layout
///
/// `output_len` must be exact: graph replays size buffers from it once
/// and never grow them.
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output size for an input of `input_len` bytes
    fn output_len(&self, input_len: usize) -> usize;

    /// Append the transformed batch to `out`
    fn precompute(&self, input: &[u8], out: &mut BytesMut) -> Result<()>;
}

/// Copies bytes unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Preprocessor for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn output_len(&self, input_len: usize) -> usize {
        input_len
    }

    fn precompute(&self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        out.extend_from_slice(input);
        Ok(())
    }
}

/// Widens each byte to a little-endian f32 in [0, 1]
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesToF32;

impl Preprocessor for BytesToF32 {
    fn name(&self) -> &'static str {
        "bytes_to_f32"
    }

    fn output_len(&self, input_len: usize) -> usize {
        input_len * std::mem::size_of::<f32>()
    }

    fn precompute(&self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        for &byte in input {
            out.put_f32_le(byte as f32 / 255.0);
        }
        Ok(())
    }
}

/// Preprocessor selection in reader configs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessKind {
    #[default]
    Passthrough,
    BytesToF32,
}

impl PreprocessKind {
    pub fn build(self) -> Arc<dyn Preprocessor> {
        match self {
            PreprocessKind::Passthrough => Arc::new(Passthrough),
            PreprocessKind::BytesToF32 => Arc::new(BytesToF32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_f32() {
        let mut out = BytesMut::new();
        BytesToF32.precompute(&[0, 255], &mut out).unwrap();
        assert_eq!(out.len(), BytesToF32.output_len(2));
        assert_eq!(f32::from_le_bytes(out[4..8].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(out[0..4].try_into().unwrap()), 0.0);
    }
}
