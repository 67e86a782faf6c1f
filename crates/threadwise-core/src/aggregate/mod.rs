//! Multi-source context aggregation.

pub mod aggregator;

pub use aggregator::{ContextAggregator, MemoryStores};
