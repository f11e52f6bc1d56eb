//! Inference model interface
//!
//! Models are created through [`load_model`] from a JSON config and an
//! embedding source, then run fixed-maximum-batch predictions on host
//! buffers.

pub mod config;
pub mod embedding;
pub mod lookup;
pub mod native;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

pub use config::ModelConfig;
pub use embedding::{EmbeddingInterface, EmbeddingTable};
pub use lookup::LookupModel;
pub use native::NativeModel;

use crate::device::DeviceId;
use crate::error::{ReaderError, Result};

/// Supported inference backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferType {
    /// Dense weights plus pooled embeddings through a sigmoid
    Native,
    /// Pooled embedding mean only
    Lookup,
}

impl FromStr for InferType {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(InferType::Native),
            "lookup" => Ok(InferType::Lookup),
            _ => Err(ReaderError::UnknownInferType {
                infer_type: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for InferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferType::Native => write!(f, "native"),
            InferType::Lookup => write!(f, "lookup"),
        }
    }
}

pub trait InferenceModel: Send + Sync {
    fn infer_type(&self) -> InferType;

    fn config(&self) -> &ModelConfig;

    fn device_id(&self) -> DeviceId;

    /// Score `num_samples` samples into `output[..num_samples]`
    ///
    /// `row_ptrs` is a CSR offset array with one row per (sample, slot)
    /// into `embedding_columns`.
    fn predict(
        &self,
        dense: &[f32],
        embedding_columns: &[i64],
        row_ptrs: &[usize],
        output: &mut [f32],
        num_samples: usize,
    ) -> Result<()>;
}

/// Build a model of `infer_type` from the config at `config_path`
pub fn load_model(
    infer_type: &str,
    config_path: impl AsRef<Path>,
    device_id: DeviceId,
    embedding: Arc<dyn EmbeddingInterface>,
) -> Result<Box<dyn InferenceModel>> {
    let infer_type: InferType = infer_type.parse()?;
    let path = config_path.as_ref();
    let config = ModelConfig::from_file(path)?;

    if embedding.vec_size() != config.embedding_vec_size {
        return Err(ReaderError::ModelConfig {
            path: path.display().to_string(),
            reason: format!(
                "embedding_vec_size {} does not match embedding source width {}",
                config.embedding_vec_size,
                embedding.vec_size()
            ),
        });
    }

    info!(
        "Loaded {} model '{}' for device {} (max batch {})",
        infer_type, config.model_name, device_id, config.max_batch_size
    );

    Ok(match infer_type {
        InferType::Native => Box::new(NativeModel::new(config, device_id, embedding)),
        InferType::Lookup => Box::new(LookupModel::new(config, device_id, embedding)),
    })
}

/// Check buffer sizes of a predict call against the model config
pub(crate) fn check_inputs(
    config: &ModelConfig,
    dense: &[f32],
    embedding_columns: &[i64],
    row_ptrs: &[usize],
    output: &[f32],
    num_samples: usize,
) -> Result<()> {
    let invalid = |reason: String| Err(ReaderError::InvalidInput { reason });

    if num_samples > config.max_batch_size {
        return invalid(format!(
            "{} samples exceed max batch size {}",
            num_samples, config.max_batch_size
        ));
    }
    if output.len() < num_samples {
        return invalid(format!("output holds {} of {} scores", output.len(), num_samples));
    }
    if dense.len() < num_samples * config.dense_dim {
        return invalid(format!(
            "dense buffer holds {} of {} values",
            dense.len(),
            num_samples * config.dense_dim
        ));
    }

    let rows = num_samples * config.slot_num;
    if row_ptrs.len() < rows + 1 {
        return invalid(format!("{} row pointers for {} rows", row_ptrs.len(), rows));
    }
    if row_ptrs[..=rows].windows(2).any(|w| w[0] > w[1]) {
        return invalid("row pointers are not monotonic".into());
    }
    if row_ptrs[rows] > embedding_columns.len() {
        return invalid(format!(
            "row pointers reach {} of {} keys",
            row_ptrs[rows],
            embedding_columns.len()
        ));
    }
    Ok(())
}

/// Sum-pool the embeddings of every slot of one sample
pub(crate) fn pool_sample(
    embedding: &dyn EmbeddingInterface,
    config: &ModelConfig,
    embedding_columns: &[i64],
    row_ptrs: &[usize],
    sample: usize,
    pooled: &mut [f32],
    scratch: &mut Vec<f32>,
) -> Result<()> {
    let width = config.embedding_vec_size;
    pooled.fill(0.0);

    for slot in 0..config.slot_num {
        let row = sample * config.slot_num + slot;
        let keys = &embedding_columns[row_ptrs[row]..row_ptrs[row + 1]];
        scratch.clear();
        scratch.resize(keys.len() * width, 0.0);
        embedding.lookup(keys, scratch)?;

        let target = &mut pooled[slot * width..(slot + 1) * width];
        for vector in scratch.chunks_exact(width) {
            for (acc, value) in target.iter_mut().zip(vector) {
                *acc += value;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_type_parsing() {
        assert_eq!("Native".parse::<InferType>().unwrap(), InferType::Native);
        assert!(matches!(
            "tensorrt".parse::<InferType>(),
            Err(ReaderError::UnknownInferType { .. })
        ));
    }
}
