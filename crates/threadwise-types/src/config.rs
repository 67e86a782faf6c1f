//! Engine configuration types for Threadwise.
//!
//! `EngineConfig` mirrors the top-level `threadwise.toml`. Every numeric knob
//! has a documented default; [`EngineConfig::validate`] must pass before the
//! configuration is handed to the engine, so weight and threshold problems
//! surface at startup rather than while deciding.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelConfig, ChannelOverrides, Persona, ResponseFrequency};
use crate::error::ConfigError;

/// Tolerance when checking that a weight set sums to 1.
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub bot: BotIdentity,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    /// Channel snapshots known at startup.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// How the bot is identified on the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotIdentity {
    /// The bot's own user ID. Mentions of it count as direct mentions and
    /// its own messages are never answered.
    #[serde(default = "default_bot_user_id")]
    pub user_id: String,
}

fn default_bot_user_id() -> String {
    "threadwise".to_string()
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            user_id: default_bot_user_id(),
        }
    }
}

/// Weights of the four relevance sub-scores. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub recency: f32,
    pub relevance: f32,
    pub importance: f32,
    pub relationship: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            recency: 0.30,
            relevance: 0.35,
            importance: 0.15,
            relationship: 0.20,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_weight_set(
            "scoring",
            &[
                ("recency", self.recency),
                ("relevance", self.relevance),
                ("importance", self.importance),
                ("relationship", self.relationship),
            ],
        )
    }
}

/// Saturation points for the logarithmic importance scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceCaps {
    pub participants: u32,
    pub reactions: u32,
    pub thread_length: u32,
}

impl Default for ImportanceCaps {
    fn default() -> Self {
        Self {
            participants: 10,
            reactions: 20,
            thread_length: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Recency half-life when the channel does not override it (6 hours).
    pub recency_half_life_secs: u64,
    pub importance_caps: ImportanceCaps,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            recency_half_life_secs: 6 * 60 * 60,
            importance_caps: ImportanceCaps::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Messages fetched by the thread stage.
    pub thread_limit: usize,
    pub channel_limit: usize,
    pub cross_channel_limit: usize,
    /// Documents fetched per knowledge source.
    pub knowledge_limit: usize,
    /// Minimum raw similarity for knowledge-base matches.
    pub knowledge_similarity_floor: f32,
    /// Timeout applied to every individual store call.
    pub store_timeout_ms: u64,
    pub token_budget: usize,
    /// Accumulated composite relevance at which expansion stops.
    pub relevance_target: f32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            thread_limit: 15,
            channel_limit: 30,
            cross_channel_limit: 10,
            knowledge_limit: 5,
            knowledge_similarity_floor: 0.6,
            store_timeout_ms: 800,
            token_budget: 4_000,
            relevance_target: 3.0,
        }
    }
}

impl AggregationConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Weights of the five decision factors. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub directly_mentioned: f32,
    pub question_asked: f32,
    pub expertise_match: f32,
    pub conversation_gap: f32,
    pub value_add_potential: f32,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            directly_mentioned: 0.35,
            question_asked: 0.20,
            expertise_match: 0.15,
            conversation_gap: 0.10,
            value_add_potential: 0.20,
        }
    }
}

impl FactorWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_weight_set(
            "decision",
            &[
                ("directly_mentioned", self.directly_mentioned),
                ("question_asked", self.question_asked),
                ("expertise_match", self.expertise_match),
                ("conversation_gap", self.conversation_gap),
                ("value_add_potential", self.value_add_potential),
            ],
        )
    }
}

fn default_thresholds() -> BTreeMap<ResponseFrequency, f32> {
    BTreeMap::from([
        (ResponseFrequency::Low, 0.75),
        (ResponseFrequency::Medium, 0.55),
        (ResponseFrequency::High, 0.35),
    ])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub weights: FactorWeights,
    /// Numeric threshold per response frequency. A higher frequency means a
    /// lower bar. All three keys are required.
    pub thresholds: BTreeMap<ResponseFrequency, f32>,
    /// Maximum context items handed to response generation.
    pub top_k: usize,
    /// Token budget of the selected context slice.
    pub selection_token_budget: usize,
    /// Channel cooldown when the channel does not override it.
    pub cooldown_secs: u64,
    /// Optional per-thread cooldown applied on top of the channel cooldown.
    pub thread_cooldown_secs: Option<u64>,
    /// Silence after which an unanswered thread counts as a conversation gap.
    pub conversation_gap_secs: u64,
    pub classifier_timeout_ms: u64,
    /// How long responded message IDs are remembered for duplicate delivery.
    /// Also how far back cooldowns remember committed responses.
    pub seen_ttl_secs: u64,
    /// How long a thread the bot answered in keeps bypassing the
    /// mention-only rule after the latest response.
    pub engaged_thread_ttl_secs: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            thresholds: default_thresholds(),
            top_k: 8,
            selection_token_budget: 2_000,
            cooldown_secs: 60,
            thread_cooldown_secs: None,
            conversation_gap_secs: 30 * 60,
            classifier_timeout_ms: 300,
            seen_ttl_secs: 60 * 60,
            engaged_thread_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl DecisionConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn conversation_gap(&self) -> Duration {
        Duration::from_secs(self.conversation_gap_secs)
    }

    pub fn seen_ttl(&self) -> Duration {
        Duration::from_secs(self.seen_ttl_secs)
    }

    pub fn engaged_thread_ttl(&self) -> Duration {
        Duration::from_secs(self.engaged_thread_ttl_secs)
    }
}

impl EngineConfig {
    /// Check every invariant the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.user_id.trim().is_empty() {
            return Err(invalid("bot.user_id", "must not be empty"));
        }

        self.scoring.weights.validate()?;
        self.decision.weights.validate()?;

        if self.scoring.recency_half_life_secs == 0 {
            return Err(invalid("scoring.recency_half_life_secs", "must be positive"));
        }
        let caps = &self.scoring.importance_caps;
        if caps.participants == 0 || caps.reactions == 0 || caps.thread_length == 0 {
            return Err(invalid("scoring.importance_caps", "caps must be positive"));
        }

        let agg = &self.aggregation;
        if agg.thread_limit == 0 {
            return Err(invalid("aggregation.thread_limit", "must be positive"));
        }
        if agg.store_timeout_ms == 0 {
            return Err(invalid("aggregation.store_timeout_ms", "must be positive"));
        }
        if agg.token_budget == 0 {
            return Err(invalid("aggregation.token_budget", "must be positive"));
        }
        check_unit("aggregation.knowledge_similarity_floor", agg.knowledge_similarity_floor)?;
        check_target("aggregation.relevance_target", agg.relevance_target)?;

        let dec = &self.decision;
        let mut thresholds = Vec::with_capacity(3);
        for frequency in [ResponseFrequency::Low, ResponseFrequency::Medium, ResponseFrequency::High] {
            let value = dec
                .thresholds
                .get(&frequency)
                .copied()
                .ok_or_else(|| ConfigError::MissingThreshold(format!("decision.thresholds.{frequency}")))?;
            check_unit(&format!("decision.thresholds.{frequency}"), value)?;
            thresholds.push(value);
        }
        if !(thresholds[0] >= thresholds[1] && thresholds[1] >= thresholds[2]) {
            return Err(invalid(
                "decision.thresholds",
                "expected low >= medium >= high (higher frequency, lower bar)",
            ));
        }
        if dec.top_k == 0 {
            return Err(invalid("decision.top_k", "must be positive"));
        }
        if dec.selection_token_budget == 0 {
            return Err(invalid("decision.selection_token_budget", "must be positive"));
        }
        if dec.classifier_timeout_ms == 0 {
            return Err(invalid("decision.classifier_timeout_ms", "must be positive"));
        }
        if dec.seen_ttl_secs == 0 {
            return Err(invalid("decision.seen_ttl_secs", "must be positive"));
        }
        if dec.engaged_thread_ttl_secs == 0 {
            return Err(invalid("decision.engaged_thread_ttl_secs", "must be positive"));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            let prefix = format!("channels[{}]", channel.channel_id);
            if !seen.insert(channel.channel_id.as_str()) {
                return Err(invalid(&prefix, "duplicate channel id"));
            }
            let mut overrides = channel.overrides.clone();
            if let Some(error) = overrides.drop_invalid(&format!("{prefix}.overrides")).into_iter().next() {
                return Err(error);
            }
        }

        Ok(())
    }

    /// Look up a channel snapshot by ID.
    pub fn channel(&self, channel_id: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    /// Numeric response threshold for a channel.
    ///
    /// An explicit override wins over the frequency mapping. Validation
    /// guarantees every frequency has a mapping; the fallback is never hit
    /// for a validated config.
    pub fn threshold_for(&self, channel: &ChannelConfig) -> f32 {
        channel.overrides.response_threshold.unwrap_or_else(|| {
            self.decision
                .thresholds
                .get(&channel.response_frequency)
                .copied()
                .unwrap_or(1.0)
        })
    }

    pub fn cooldown_for(&self, channel: &ChannelConfig) -> Duration {
        Duration::from_secs(channel.overrides.cooldown_secs.unwrap_or(self.decision.cooldown_secs))
    }

    pub fn thread_cooldown_for(&self, channel: &ChannelConfig) -> Option<Duration> {
        channel
            .overrides
            .thread_cooldown_secs
            .or(self.decision.thread_cooldown_secs)
            .map(Duration::from_secs)
    }

    pub fn half_life_for(&self, channel: &ChannelConfig) -> Duration {
        Duration::from_secs(
            channel
                .overrides
                .recency_half_life_secs
                .unwrap_or(self.scoring.recency_half_life_secs),
        )
    }

    pub fn relevance_target_for(&self, channel: &ChannelConfig) -> f32 {
        channel
            .overrides
            .relevance_target
            .unwrap_or(self.aggregation.relevance_target)
    }

    pub fn token_budget_for(&self, channel: &ChannelConfig) -> usize {
        channel
            .overrides
            .token_budget
            .unwrap_or(self.aggregation.token_budget)
    }
}

impl ChannelOverrides {
    /// Clear every override outside its valid range, keeping the rest.
    /// Returns one error per cleared field, named under `prefix`.
    pub fn drop_invalid(&mut self, prefix: &str) -> Vec<ConfigError> {
        let mut dropped = Vec::new();
        if let Some(threshold) = self.response_threshold {
            if let Err(e) = check_unit(&format!("{prefix}.response_threshold"), threshold) {
                dropped.push(e);
                self.response_threshold = None;
            }
        }
        if let Some(target) = self.relevance_target {
            if let Err(e) = check_target(&format!("{prefix}.relevance_target"), target) {
                dropped.push(e);
                self.relevance_target = None;
            }
        }
        if self.recency_half_life_secs == Some(0) {
            dropped.push(invalid(&format!("{prefix}.recency_half_life_secs"), "must be positive"));
            self.recency_half_life_secs = None;
        }
        if self.token_budget == Some(0) {
            dropped.push(invalid(&format!("{prefix}.token_budget"), "must be positive"));
            self.token_budget = None;
        }
        dropped
    }
}

fn validate_weight_set(kind: &'static str, weights: &[(&'static str, f32)]) -> Result<(), ConfigError> {
    for &(name, value) in weights {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidWeight { kind, name, value });
        }
    }
    let sum: f32 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::InvalidWeightSum { kind, sum });
    }
    Ok(())
}

fn check_unit(field: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, &format!("{value} is outside [0, 1]")));
    }
    Ok(())
}

fn check_target(field: &str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(field, &format!("{value} must be a positive number")));
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
