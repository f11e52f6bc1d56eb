//! Embedding-only model

use std::sync::Arc;

use super::{check_inputs, pool_sample, EmbeddingInterface, InferType, InferenceModel, ModelConfig};
use crate::device::DeviceId;
use crate::error::Result;

/// Scores each sample by the mean of its pooled embedding values
pub struct LookupModel {
    config: ModelConfig,
    device_id: DeviceId,
    embedding: Arc<dyn EmbeddingInterface>,
}

impl LookupModel {
    pub fn new(config: ModelConfig, device_id: DeviceId, embedding: Arc<dyn EmbeddingInterface>) -> Self {
        Self {
            config,
            device_id,
            embedding,
        }
    }
}

impl InferenceModel for LookupModel {
    fn infer_type(&self) -> InferType {
        InferType::Lookup
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn predict(
        &self,
        dense: &[f32],
        embedding_columns: &[i64],
        row_ptrs: &[usize],
        output: &mut [f32],
        num_samples: usize,
    ) -> Result<()> {
        if num_samples == 0 {
            return Ok(());
        }
        check_inputs(&self.config, dense, embedding_columns, row_ptrs, output, num_samples)?;

        let mut pooled = vec![0.0f32; self.config.pooled_len()];
        let mut scratch = Vec::new();
        for (sample, score) in output[..num_samples].iter_mut().enumerate() {
            pool_sample(
                self.embedding.as_ref(),
                &self.config,
                embedding_columns,
                row_ptrs,
                sample,
                &mut pooled,
                &mut scratch,
            )?;
            *score = pooled.iter().sum::<f32>() / pooled.len() as f32;
        }
        Ok(())
    }
}
