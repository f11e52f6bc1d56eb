//! Dataset description

use serde::{Deserialize, Serialize};

use super::batch::SourceSpec;
use crate::storage::StorageBackend;
use crate::error::Result;

/// Sources making up a dataset and how they are cut into batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub sources: Vec<SourceSpec>,
    /// Raw batch size; the last batch of a source may be shorter
    pub batch_bytes: usize,
    /// Shuffle seed for source assignment, 0 keeps listing order
    #[serde(default)]
    pub seed: u64,
}

impl DatasetConfig {
    pub fn new(name: impl Into<String>, batch_bytes: usize) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            batch_bytes,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Append a whole-object source with the next free id
    pub fn add_source(&mut self, path: impl Into<String>) -> &mut SourceSpec {
        let id = self.sources.len() as u32;
        self.sources.push(SourceSpec::new(id, path));
        let last = self.sources.len() - 1;
        &mut self.sources[last]
    }

    /// Build a config with one source per object under `paths`, recording
    /// each object's checksum
    pub fn from_storage(
        name: impl Into<String>,
        storage: &dyn StorageBackend,
        paths: &[String],
        batch_bytes: usize,
    ) -> Result<Self> {
        let mut config = Self::new(name, batch_bytes);
        for path in paths {
            let size = storage.size(path)?;
            let data = storage.read_range(path, 0, size as usize)?;
            let crc = crc32c::crc32c(&data);
            let len = data.len() as u64;
            let source = config.add_source(path.clone());
            source.length = len;
            source.expected_crc32c = Some(crc);
        }
        Ok(config)
    }

    /// Batches the dataset yields when read in full
    pub fn total_batches(&self, sizes: &[u64]) -> u64 {
        let batch = self.batch_bytes.max(1) as u64;
        sizes.iter().map(|size| size.div_ceil(batch)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_from_storage_records_checksums() {
        let storage = MemoryStorage::new();
        storage.insert("part-0", vec![1u8; 10]);
        storage.insert("part-1", vec![2u8; 4]);

        let paths = vec!["part-0".to_string(), "part-1".to_string()];
        let config = DatasetConfig::from_storage("train", &storage, &paths, 4).unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].id, 1);
        assert_eq!(config.sources[0].expected_crc32c, Some(crc32c::crc32c(&[1u8; 10])));
        assert_eq!(config.total_batches(&[10, 4]), 4);
    }
}
