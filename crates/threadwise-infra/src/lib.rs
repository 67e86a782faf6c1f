//! Infrastructure layer for Threadwise.
//!
//! Contains implementations of the store ports defined in `threadwise-core`:
//! an in-process message log, a vector index with a feature-hashing
//! embedder, a petgraph relationship graph, plus TOML configuration loading
//! and history seeding.

pub mod config;
pub mod graph;
pub mod relational;
pub mod seed;
pub mod text;
pub mod vector;
