use thiserror::Error;

use crate::decision::EvaluationState;

/// Invalid engine configuration. Raised at load time, never while deciding.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{kind} weights must sum to 1.0 (got {sum:.4})")]
    InvalidWeightSum { kind: &'static str, sum: f32 },

    #[error("{kind} weight '{name}' must be a finite, non-negative number (got {value})")]
    InvalidWeight {
        kind: &'static str,
        name: &'static str,
        value: f32,
    },

    #[error("missing threshold: {0}")]
    MissingThreshold(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to read config '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config '{path}': {reason}")]
    Parse { path: String, reason: String },
}

/// Errors reported by memory store adapters.
///
/// All variants are recoverable: the aggregator skips the failing store and
/// marks the context window degraded.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store '{store}' timed out after {timeout_ms}ms")]
    Timeout { store: String, timeout_ms: u64 },

    #[error("store '{store}' unavailable: {reason}")]
    Unavailable { store: String, reason: String },

    #[error("query error: {0}")]
    Query(String),
}

/// A question or expertise classifier failed. The factor falls back to a
/// conservative value.
#[derive(Debug, Clone, Error)]
pub enum ClassificationError {
    #[error("classifier timed out after {0}ms")]
    Timeout(u64),

    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("malformed classifier output: {0}")]
    Malformed(String),
}

/// An evaluation tried to move between states the lifecycle does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal evaluation transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: EvaluationState,
    pub to: EvaluationState,
}
