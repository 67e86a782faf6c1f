//! Decision records produced by the Threadwise engine.
//!
//! `DecisionResult` is the terminal output of one evaluation. It is consumed
//! once by the response-generation collaborator when `respond` is true.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ScoredContextItem;
use crate::error::TransitionError;

/// Per-message signals combined into the decision score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionFactors {
    pub directly_mentioned: bool,
    pub question_asked: bool,
    /// Overlap between the message and the persona's expertise, `[0, 1]`.
    pub expertise_match: f32,
    /// The thread has waited too long without an answer.
    pub conversation_gap: bool,
    /// Derived from the best composite scores in the context window, `[0, 1]`.
    pub value_add_potential: f32,
}

/// Identifies one decision factor in a reasoning trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    DirectlyMentioned,
    QuestionAsked,
    ExpertiseMatch,
    ConversationGap,
    ValueAddPotential,
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorKind::DirectlyMentioned => write!(f, "directly_mentioned"),
            FactorKind::QuestionAsked => write!(f, "question_asked"),
            FactorKind::ExpertiseMatch => write!(f, "expertise_match"),
            FactorKind::ConversationGap => write!(f, "conversation_gap"),
            FactorKind::ValueAddPotential => write!(f, "value_add_potential"),
        }
    }
}

/// One factor's share of the decision score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor: FactorKind,
    /// Factor value as a number (booleans are 0 or 1).
    pub value: f32,
    pub weight: f32,
    /// `value * weight`.
    pub contribution: f32,
}

/// Per-message evaluation lifecycle.
///
/// `Idle -> Evaluating -> (Aggregating) -> Deciding -> {Responded | Suppressed}`.
/// Suppression is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationState {
    #[default]
    Idle,
    Evaluating,
    Aggregating,
    Deciding,
    Responded,
    Suppressed,
}

impl EvaluationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationState::Responded | EvaluationState::Suppressed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: EvaluationState) -> bool {
        use EvaluationState::*;
        matches!(
            (self, next),
            (Idle, Evaluating)
                | (Evaluating, Aggregating)
                | (Aggregating, Deciding)
                | (Deciding, Responded)
                | (Idle | Evaluating | Aggregating | Deciding, Suppressed)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: EvaluationState) -> Result<EvaluationState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationState::Idle => write!(f, "idle"),
            EvaluationState::Evaluating => write!(f, "evaluating"),
            EvaluationState::Aggregating => write!(f, "aggregating"),
            EvaluationState::Deciding => write!(f, "deciding"),
            EvaluationState::Responded => write!(f, "responded"),
            EvaluationState::Suppressed => write!(f, "suppressed"),
        }
    }
}

/// Why an evaluation ended in `Suppressed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuppressionReason {
    /// The message was written by the bot itself (or another bot).
    OwnMessage,
    /// This message ID already produced a response.
    Duplicate,
    /// `mention_only` channel and the bot was not addressed.
    MentionRequired,
    /// The channel or thread is still cooling down.
    Cooldown { remaining_secs: u64 },
    /// A newer message arrived in the same thread.
    Superseded,
    /// The decision score did not exceed the threshold.
    BelowThreshold,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressionReason::OwnMessage => write!(f, "own message"),
            SuppressionReason::Duplicate => write!(f, "duplicate delivery"),
            SuppressionReason::MentionRequired => write!(f, "mention required"),
            SuppressionReason::Cooldown { remaining_secs } => {
                write!(f, "cooldown ({remaining_secs}s remaining)")
            }
            SuppressionReason::Superseded => write!(f, "superseded by newer message"),
            SuppressionReason::BelowThreshold => write!(f, "below threshold"),
        }
    }
}

/// Terminal outcome of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Responded,
    Suppressed(SuppressionReason),
}

/// Terminal output of one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    pub evaluation_id: Uuid,
    pub message_id: String,
    pub channel_id: String,
    pub respond: bool,
    pub outcome: Outcome,
    /// Weighted factor score. Zero when the evaluation ended before scoring.
    pub score: f32,
    pub threshold: f32,
    pub factors: DecisionFactors,
    /// Budget-capped top-K context, composite descending. Empty unless responded.
    pub selected_context: Vec<ScoredContextItem>,
    /// Ordered factor contributions.
    pub trace: Vec<FactorContribution>,
    /// Whether any memory store failed during aggregation.
    pub degraded: bool,
    /// Thread the reply should be posted in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_thread_id: Option<String>,
    /// States visited, in order, ending in a terminal state.
    pub states: Vec<EvaluationState>,
    pub decided_at: DateTime<Utc>,
}

impl DecisionResult {
    pub fn final_state(&self) -> EvaluationState {
        self.states.last().copied().unwrap_or_default()
    }

    pub fn suppression_reason(&self) -> Option<&SuppressionReason> {
        match &self.outcome {
            Outcome::Suppressed(reason) => Some(reason),
            Outcome::Responded => None,
        }
    }
}
