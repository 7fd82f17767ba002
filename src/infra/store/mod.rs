//! Storage backends.

pub mod memory;

pub use memory::InMemoryPipelineStore;
