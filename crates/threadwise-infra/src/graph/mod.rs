//! Participant and topic relationship graph.

pub mod relationship;

pub use relationship::RelationshipGraph;
