//! Embedding lookup used by inference models

use std::collections::HashMap;

use bytes::Buf;
use tracing::info;

use crate::error::{ReaderError, Result};
use crate::storage::StorageBackend;

/// Source of embedding vectors keyed by feature id
pub trait EmbeddingInterface: Send + Sync {
    fn vec_size(&self) -> usize;

    /// Write one vector per key into `out` (`keys.len() * vec_size` values)
    fn lookup(&self, keys: &[i64], out: &mut [f32]) -> Result<()>;
}

/// In-memory table; unknown keys map to the default vector
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    vec_size: usize,
    index: HashMap<i64, usize>,
    vectors: Vec<f32>,
    default_vector: Vec<f32>,
}

impl EmbeddingTable {
    pub fn new(vec_size: usize) -> Self {
        Self {
            vec_size,
            index: HashMap::new(),
            vectors: Vec::new(),
            default_vector: vec![0.0; vec_size],
        }
    }

    pub fn with_default(mut self, default_vector: Vec<f32>) -> Result<Self> {
        self.check_len(default_vector.len())?;
        self.default_vector = default_vector;
        Ok(self)
    }

    /// Insert or replace the vector for `key`
    pub fn insert(&mut self, key: i64, vector: &[f32]) -> Result<()> {
        self.check_len(vector.len())?;
        match self.index.get(&key) {
            Some(&row) => {
                let start = row * self.vec_size;
                self.vectors[start..start + self.vec_size].copy_from_slice(vector);
            }
            None => {
                self.index.insert(key, self.index.len());
                self.vectors.extend_from_slice(vector);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: i64) -> &[f32] {
        match self.index.get(&key) {
            Some(&row) => &self.vectors[row * self.vec_size..(row + 1) * self.vec_size],
            None => &self.default_vector,
        }
    }

    /// Load `{table_dir}/key` (i64 LE) and `{table_dir}/emb_vector` (f32 LE)
    pub fn load(storage: &dyn StorageBackend, table_dir: &str, vec_size: usize) -> Result<Self> {
        let dir = table_dir.trim_end_matches('/');
        let key_path = format!("{dir}/key");
        let vector_path = format!("{dir}/emb_vector");
        let invalid = |reason: String| ReaderError::ModelConfig {
            path: dir.to_string(),
            reason,
        };

        if vec_size == 0 {
            return Err(invalid("embedding vector size must be positive".into()));
        }

        let mut keys = storage.read_range(&key_path, 0, storage.size(&key_path)? as usize)?;
        let mut vectors = storage.read_range(&vector_path, 0, storage.size(&vector_path)? as usize)?;

        if keys.len() % 8 != 0 {
            return Err(invalid(format!("key file holds {} bytes", keys.len())));
        }
        let count = keys.len() / 8;
        if vectors.len() != count * vec_size * 4 {
            return Err(invalid(format!(
                "{} keys need {} vector bytes, found {}",
                count,
                count * vec_size * 4,
                vectors.len()
            )));
        }

        let mut table = Self::new(vec_size);
        let mut row = vec![0.0f32; vec_size];
        for _ in 0..count {
            let key = keys.get_i64_le();
            for value in row.iter_mut() {
                *value = vectors.get_f32_le();
            }
            table.insert(key, &row)?;
        }

        info!("Loaded {} embeddings of size {} from {}", table.len(), vec_size, dir);
        Ok(table)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.vec_size {
            return Err(ReaderError::InvalidInput {
                reason: format!("vector of {} values, table width is {}", len, self.vec_size),
            });
        }
        Ok(())
    }
}

impl EmbeddingInterface for EmbeddingTable {
    fn vec_size(&self) -> usize {
        self.vec_size
    }

    fn lookup(&self, keys: &[i64], out: &mut [f32]) -> Result<()> {
        if out.len() < keys.len() * self.vec_size {
            return Err(ReaderError::InvalidInput {
                reason: format!(
                    "lookup of {} keys needs {} values, buffer holds {}",
                    keys.len(),
                    keys.len() * self.vec_size,
                    out.len()
                ),
            });
        }
        for (key, chunk) in keys.iter().zip(out.chunks_exact_mut(self.vec_size)) {
            chunk.copy_from_slice(self.get(*key));
        }
        Ok(())
    }
}
