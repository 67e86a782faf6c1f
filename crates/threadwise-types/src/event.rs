//! Event types for the Threadwise decision event bus.
//!
//! `DecisionEvent` is broadcast while messages are evaluated. All variants
//! are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::SourceKind;
use crate::decision::SuppressionReason;

/// Events emitted during message evaluation.
///
/// Consumed by logging, the CLI and tests; the engine never waits on
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionEvent {
    /// A message entered evaluation.
    EvaluationStarted {
        evaluation_id: Uuid,
        message_id: String,
        channel_id: String,
    },

    /// An aggregation stage finished (successfully or not).
    StageCompleted {
        evaluation_id: Uuid,
        source: SourceKind,
        fetched: usize,
        admitted: usize,
        accumulated_relevance: f32,
    },

    /// A memory store failed or timed out; the window is degraded.
    StoreDegraded {
        evaluation_id: Uuid,
        store: String,
        error: String,
    },

    /// The engine decided to respond.
    Responded {
        evaluation_id: Uuid,
        message_id: String,
        score: f32,
        threshold: f32,
        context_items: usize,
    },

    /// The evaluation ended without a response.
    Suppressed {
        evaluation_id: Uuid,
        message_id: String,
        reason: SuppressionReason,
    },
}

impl DecisionEvent {
    pub fn evaluation_id(&self) -> Uuid {
        match self {
            DecisionEvent::EvaluationStarted { evaluation_id, .. }
            | DecisionEvent::StageCompleted { evaluation_id, .. }
            | DecisionEvent::StoreDegraded { evaluation_id, .. }
            | DecisionEvent::Responded { evaluation_id, .. }
            | DecisionEvent::Suppressed { evaluation_id, .. } => *evaluation_id,
        }
    }
}
