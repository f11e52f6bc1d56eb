//! Model configuration files

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, Result};

/// JSON model description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    /// Feature fields per sample
    pub slot_num: usize,
    pub embedding_vec_size: usize,
    /// Dense features per sample
    pub dense_dim: usize,
    /// Largest `num_samples` a single predict call accepts
    pub max_batch_size: usize,
    /// One weight per dense feature
    #[serde(default)]
    pub dense_weights: Vec<f32>,
    /// One weight per pooled embedding value; all ones when absent
    #[serde(default)]
    pub embedding_weights: Option<Vec<f32>>,
    #[serde(default)]
    pub bias: f32,
}

impl ModelConfig {
    /// Read and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ReaderError::ModelConfig {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&path.display().to_string(), &text)
    }

    /// Parse and validate config text; `origin` names it in errors
    pub fn from_json(origin: &str, text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| ReaderError::ModelConfig {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;
        config.validate().map_err(|reason| ReaderError::ModelConfig {
            path: origin.to_string(),
            reason,
        })?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.slot_num == 0 {
            return Err("slot_num must be positive".into());
        }
        if self.embedding_vec_size == 0 {
            return Err("embedding_vec_size must be positive".into());
        }
        if self.max_batch_size == 0 {
            return Err("max_batch_size must be positive".into());
        }
        if self.dense_weights.len() != self.dense_dim {
            return Err(format!(
                "{} dense weights for dense_dim {}",
                self.dense_weights.len(),
                self.dense_dim
            ));
        }
        if let Some(weights) = &self.embedding_weights {
            if weights.len() != self.pooled_len() {
                return Err(format!(
                    "{} embedding weights for {} pooled values",
                    weights.len(),
                    self.pooled_len()
                ));
            }
        }
        Ok(())
    }

    /// Pooled embedding values per sample
    pub fn pooled_len(&self) -> usize {
        self.slot_num * self.embedding_vec_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_weight_count_mismatch() {
        let text = r#"{
            "model_name": "ctr",
            "slot_num": 2,
            "embedding_vec_size": 4,
            "dense_dim": 3,
            "max_batch_size": 16,
            "dense_weights": [0.5, 0.5]
        }"#;
        let err = ModelConfig::from_json("ctr.json", text).unwrap_err();
        assert!(matches!(err, ReaderError::ModelConfig { ref path, .. } if path == "ctr.json"));
    }
}
