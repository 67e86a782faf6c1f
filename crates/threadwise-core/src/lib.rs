//! Decision core for Threadwise.
//!
//! This crate defines the store "ports" that the infrastructure layer
//! implements, plus the logic that consumes them: the context aggregator,
//! the relevance scorer and the response decision engine. It depends only
//! on `threadwise-types` -- never on `threadwise-infra` or any IO crate.

pub mod aggregate;
pub mod decision;
pub mod event;
pub mod scoring;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
