//! Storage backends the prefetchers read from

pub mod backend;
pub mod buffer_pool;
pub mod local;
pub mod memory;

pub use backend::StorageBackend;
pub use buffer_pool::ByteBufferPool;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
