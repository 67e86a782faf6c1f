//! Shared domain types for Threadwise.
//!
//! This crate contains the domain types used across the decision pipeline:
//! chat messages, channel settings, scored context, decision records,
//! engine configuration, events, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod channel;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod event;
pub mod message;
