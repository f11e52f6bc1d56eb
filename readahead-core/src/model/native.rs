//! Dense plus embedding logistic model

use std::sync::Arc;

use super::{check_inputs, pool_sample, EmbeddingInterface, InferType, InferenceModel, ModelConfig};
use crate::device::DeviceId;
use crate::error::Result;

pub struct NativeModel {
    config: ModelConfig,
    device_id: DeviceId,
    embedding: Arc<dyn EmbeddingInterface>,
    embedding_weights: Vec<f32>,
}

impl NativeModel {
    pub fn new(config: ModelConfig, device_id: DeviceId, embedding: Arc<dyn EmbeddingInterface>) -> Self {
        let embedding_weights = config
            .embedding_weights
            .clone()
            .unwrap_or_else(|| vec![1.0; config.pooled_len()]);
        Self {
            config,
            device_id,
            embedding,
            embedding_weights,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl InferenceModel for NativeModel {
    fn infer_type(&self) -> InferType {
        InferType::Native
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

        let dense_dim = self.config.dense_dim;
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

            let features = &dense[sample * dense_dim..(sample + 1) * dense_dim];
            let dense_term: f32 = features
                .iter()
                .zip(&self.config.dense_weights)
                .map(|(x, w)| x * w)
                .sum();
            let embedding_term: f32 = pooled
                .iter()
                .zip(&self.embedding_weights)
                .map(|(x, w)| x * w)
                .sum();

            *score = sigmoid(self.config.bias + dense_term + embedding_term);
        }
        Ok(())
    }
}
