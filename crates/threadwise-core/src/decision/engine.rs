//! The response decision engine.
//!
//! One call to [`DecisionEngine::evaluate`] walks a message through
//! `Idle -> Evaluating -> Aggregating -> Deciding -> Responded`, or drops to
//! `Suppressed` at the first guard that rules a response out:
//!
//! 1. own message, duplicate delivery (no store access)
//! 2. registration in the thread, superseding any older evaluation there
//! 3. mention-only short-circuit (no store access)
//! 4. cooldown pre-check (no store access)
//! 5. aggregation, factor scoring, threshold
//! 6. supersession and atomic cooldown commit
//!
//! Out-of-range overrides in the channel snapshot are ignored with a
//! warning; the engine-wide value applies instead.
//!
//! `evaluate` never fails. Store and classifier problems degrade the result;
//! the worst case is an unwarranted `Suppressed`.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use threadwise_types::channel::ChannelConfig;
use threadwise_types::config::EngineConfig;
use threadwise_types::context::{ContextWindow, ScoredContextItem};
use threadwise_types::decision::{
    DecisionFactors, DecisionResult, EvaluationState, FactorContribution, Outcome,
    SuppressionReason,
};
use threadwise_types::error::{ClassificationError, ConfigError};
use threadwise_types::event::DecisionEvent;
use threadwise_types::message::{ChannelKind, ChatMessage};
use uuid::Uuid;

use super::classifier::{BoxClassifier, Classifier};
use super::cooldown::{CommitError, CooldownPolicy, CooldownRecord, CooldownTracker, ceil_secs};
use super::factors::{conversation_gap, value_add_potential, weighted_score};
use super::tracking::{EngagedThreads, InFlightThreads, SeenMessages};
use crate::aggregate::{ContextAggregator, MemoryStores};
use crate::event::EventBus;

/// Evaluates incoming messages and decides whether the bot should respond.
///
/// Share it behind an `Arc`; evaluations of unrelated threads run fully in
/// parallel and only same-channel commits serialize.
#[derive(Debug)]
pub struct DecisionEngine {
    config: Arc<EngineConfig>,
    aggregator: ContextAggregator,
    classifier: BoxClassifier,
    cooldowns: CooldownTracker,
    in_flight: InFlightThreads,
    seen: SeenMessages,
    engaged: EngagedThreads,
    events: EventBus,
}

impl DecisionEngine {
    /// Validate `config` and build an engine over `stores`.
    pub fn new(config: EngineConfig, stores: MemoryStores) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            aggregator: ContextAggregator::new(Arc::clone(&config), stores),
            classifier: BoxClassifier::default(),
            cooldowns: CooldownTracker::with_retention(config.decision.seen_ttl()),
            in_flight: InFlightThreads::new(),
            seen: SeenMessages::new(config.decision.seen_ttl()),
            engaged: EngagedThreads::new(config.decision.engaged_thread_ttl()),
            events: EventBus::default(),
            config,
        })
    }

    /// Replace the default heuristic classifier.
    pub fn with_classifier<C: Classifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = BoxClassifier::new(classifier);
        self
    }

    /// Publish events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Cooldown bookkeeping for a channel, if it has responded.
    pub fn cooldown_state(&self, channel_id: &str) -> Option<CooldownRecord> {
        self.cooldowns.snapshot(channel_id)
    }

    /// Stop continuing conversations in threads the bot has answered in.
    /// Returns how many threads were tracked.
    pub fn clear_engaged_threads(&self) -> usize {
        let cleared = self.engaged.clear();
        tracing::info!(cleared, "cleared engaged threads");
        cleared
    }

    /// Decide whether to respond to `message`.
    #[tracing::instrument(
        skip_all,
        fields(message_id = %message.id, channel_id = %message.channel_id)
    )]
    pub async fn evaluate(&self, message: &ChatMessage, channel: &ChannelConfig) -> DecisionResult {
        let channel = self.usable_channel(channel);
        let channel = &*channel;
        let mut eval = Evaluation::new(message, self.config.threshold_for(channel));
        self.events.publish(DecisionEvent::EvaluationStarted {
            evaluation_id: eval.id,
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
        });
        eval.advance(EvaluationState::Evaluating);

        let bot_id = &self.config.bot.user_id;
        if message.is_bot || message.author_id == *bot_id {
            return self.suppress(eval, SuppressionReason::OwnMessage);
        }
        if self.seen.contains(&message.id, Utc::now()) {
            return self.suppress(eval, SuppressionReason::Duplicate);
        }

        // Every newer message in the thread supersedes, answered or not.
        let thread_key = message.thread_key();
        let in_flight = self.in_flight.begin(&message.channel_id, thread_key);

        // Cheap factor pass: no store access.
        let text = message.clean_text();
        eval.factors.directly_mentioned =
            message.mentions_user(bot_id) || message.channel_kind == ChannelKind::Direct;
        eval.factors.question_asked = self
            .classify("question", false, self.classifier.is_question(&text))
            .await;

        let engaged = self.engaged.contains(&message.channel_id, thread_key, message.timestamp);
        if channel.is_mention_only() && !eval.factors.directly_mentioned && !engaged {
            return self.suppress(eval, SuppressionReason::MentionRequired);
        }

        let policy = self.cooldown_policy(channel);
        if let Err(remaining) = self
            .cooldowns
            .check(&message.channel_id, thread_key, message.timestamp, &policy)
        {
            return self.suppress(
                eval,
                SuppressionReason::Cooldown {
                    remaining_secs: ceil_secs(remaining),
                },
            );
        }

        eval.advance(EvaluationState::Aggregating);
        let window = self
            .aggregator
            .aggregate(message, channel, self.config.token_budget_for(channel))
            .await;
        self.publish_window(eval.id, &window);
        eval.degraded = window.degraded;

        eval.advance(EvaluationState::Deciding);
        let areas: Vec<String> = self
            .config
            .persona
            .expertise_areas
            .iter()
            .chain(&channel.topic_tags)
            .cloned()
            .collect();
        eval.factors.expertise_match = self
            .classify("expertise", 0.0, self.classifier.expertise_match(&text, &areas))
            .await;
        eval.factors.value_add_potential = value_add_potential(&window);
        eval.factors.conversation_gap = conversation_gap(
            window.items(),
            &message.author_id,
            self.config.decision.conversation_gap(),
        );

        let (score, trace) = weighted_score(&eval.factors, &self.config.decision.weights);
        eval.score = score;
        eval.trace = trace;
        tracing::debug!(score, threshold = eval.threshold, factors = ?eval.factors, "scored message");

        if score <= eval.threshold {
            return self.suppress(eval, SuppressionReason::BelowThreshold);
        }
        if in_flight.is_superseded() {
            return self.suppress(eval, SuppressionReason::Superseded);
        }

        // Commit: claim the message ID, then the cooldown, atomically per key.
        // Supersession is re-checked under the channel's entry guard.
        if !self.seen.claim(&message.id, Utc::now()) {
            return self.suppress(eval, SuppressionReason::Duplicate);
        }
        if let Err(error) = self.cooldowns.try_commit(
            &message.channel_id,
            thread_key,
            message.timestamp,
            &policy,
            || !in_flight.is_superseded(),
        ) {
            self.seen.release(&message.id);
            let reason = match error {
                CommitError::Cooling(remaining) => SuppressionReason::Cooldown {
                    remaining_secs: ceil_secs(remaining),
                },
                CommitError::Withdrawn => SuppressionReason::Superseded,
            };
            return self.suppress(eval, reason);
        }
        self.engaged.mark(&message.channel_id, thread_key, message.timestamp);

        let selected = window.select_top(
            self.config.decision.top_k,
            self.config.decision.selection_token_budget,
        );
        let reply_thread_id = if channel.reply_in_thread {
            Some(thread_key.to_string())
        } else {
            message.thread_id.clone()
        };

        eval.advance(EvaluationState::Responded);
        tracing::info!(
            score,
            threshold = eval.threshold,
            context_items = selected.len(),
            degraded = eval.degraded,
            "responding"
        );
        self.events.publish(DecisionEvent::Responded {
            evaluation_id: eval.id,
            message_id: message.id.clone(),
            score,
            threshold: eval.threshold,
            context_items: selected.len(),
        });
        eval.finish(Outcome::Responded, selected, reply_thread_id)
    }

    fn suppress(&self, mut eval: Evaluation, reason: SuppressionReason) -> DecisionResult {
        eval.advance(EvaluationState::Suppressed);
        tracing::info!(reason = %reason, score = eval.score, "suppressed");
        self.events.publish(DecisionEvent::Suppressed {
            evaluation_id: eval.id,
            message_id: eval.message_id.clone(),
            reason: reason.clone(),
        });
        eval.finish(Outcome::Suppressed(reason), Vec::new(), None)
    }

    /// `channel` with out-of-range overrides cleared, so the engine-wide
    /// values apply in their place.
    fn usable_channel<'a>(&self, channel: &'a ChannelConfig) -> Cow<'a, ChannelConfig> {
        let mut overrides = channel.overrides.clone();
        let dropped = overrides.drop_invalid("overrides");
        if dropped.is_empty() {
            return Cow::Borrowed(channel);
        }
        for error in &dropped {
            tracing::warn!(
                channel_id = %channel.channel_id,
                error = %error,
                "ignoring invalid channel override"
            );
        }
        Cow::Owned(ChannelConfig {
            overrides,
            ..channel.clone()
        })
    }

    fn cooldown_policy(&self, channel: &ChannelConfig) -> CooldownPolicy {
        CooldownPolicy {
            channel: self.config.cooldown_for(channel),
            thread: self.config.thread_cooldown_for(channel),
        }
    }

    fn publish_window(&self, evaluation_id: Uuid, window: &ContextWindow) {
        for failure in &window.failures {
            self.events.publish(DecisionEvent::StoreDegraded {
                evaluation_id,
                store: failure.store.clone(),
                error: failure.error.clone(),
            });
        }
        for stage in &window.stages {
            self.events.publish(DecisionEvent::StageCompleted {
                evaluation_id,
                source: stage.source,
                fetched: stage.fetched,
                admitted: stage.admitted,
                accumulated_relevance: stage.accumulated_relevance,
            });
        }
    }

    /// Run a classifier call under the configured timeout, falling back to
    /// `fallback` on error or timeout.
    async fn classify<T, F>(&self, what: &'static str, fallback: T, call: F) -> T
    where
        F: Future<Output = Result<T, ClassificationError>>,
    {
        let timeout = self.config.decision.classifier_timeout();
        let error = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => return value,
            Ok(Err(e)) => e,
            Err(_) => ClassificationError::Timeout(self.config.decision.classifier_timeout_ms),
        };
        tracing::warn!(classifier = what, error = %error, "classifier failed, using fallback");
        fallback
    }
}

/// Mutable state of one in-progress evaluation.
struct Evaluation {
    id: Uuid,
    message_id: String,
    channel_id: String,
    state: EvaluationState,
    states: Vec<EvaluationState>,
    factors: DecisionFactors,
    score: f32,
    threshold: f32,
    trace: Vec<FactorContribution>,
    degraded: bool,
}

impl Evaluation {
    fn new(message: &ChatMessage, threshold: f32) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            state: EvaluationState::Idle,
            states: vec![EvaluationState::Idle],
            factors: DecisionFactors::default(),
            score: 0.0,
            threshold,
            trace: Vec::new(),
            degraded: false,
        }
    }

    fn advance(&mut self, next: EvaluationState) {
        match self.state.transition(next) {
            Ok(state) => {
                tracing::debug!(from = %self.state, to = %state, "evaluation transition");
                self.state = state;
                self.states.push(state);
            }
            Err(e) => tracing::error!(error = %e, "rejected evaluation transition"),
        }
    }

    fn finish(
        self,
        outcome: Outcome,
        selected_context: Vec<ScoredContextItem>,
        reply_thread_id: Option<String>,
    ) -> DecisionResult {
        DecisionResult {
            evaluation_id: self.id,
            message_id: self.message_id,
            channel_id: self.channel_id,
            respond: outcome == Outcome::Responded,
            outcome,
            score: self.score,
            threshold: self.threshold,
            factors: self.factors,
            selected_context,
            trace: self.trace,
            degraded: self.degraded,
            reply_thread_id,
            states: self.states,
            decided_at: Utc::now(),
        }
    }
}
