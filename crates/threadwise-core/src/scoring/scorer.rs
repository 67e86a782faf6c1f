//! Four-axis relevance scoring.
//!
//! Each candidate gets four independent sub-scores in `[0, 1]`:
//!
//! - `recency`: `0.5^(age / half_life)`
//! - `relevance`: raw store similarity, min-max normalized within the batch
//! - `importance`: mean of `ln(1 + x) / ln(1 + cap)` over participants,
//!   reactions and thread length, saturating at 1
//! - `relationship`: `1 / (1 + d)` for graph distance `d`, 0 without a path
//!
//! The composite is their weighted sum. Weights are validated at config load
//! so the composite also stays in `[0, 1]`.

use std::time::Duration;

use threadwise_types::channel::ChannelConfig;
use threadwise_types::config::{ImportanceCaps, ScoringConfig, ScoringWeights};
use threadwise_types::context::{ContextCandidate, ScoredContextItem, SubScores, rank_order};

/// Stateless scorer. Identical inputs always produce identical scores.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    weights: ScoringWeights,
    caps: ImportanceCaps,
    default_half_life: Duration,
}

impl RelevanceScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            weights: config.weights,
            caps: config.importance_caps,
            default_half_life: Duration::from_secs(config.recency_half_life_secs),
        }
    }

    /// Recency half-life in effect for `channel`.
    pub fn half_life_for(&self, channel: &ChannelConfig) -> Duration {
        channel
            .overrides
            .recency_half_life_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_half_life)
    }

    /// Score one candidate on its own.
    ///
    /// Without a batch to normalize against, relevance is the raw score
    /// clamped to `[0, 1]`.
    pub fn score(&self, candidate: ContextCandidate, channel: &ChannelConfig) -> ScoredContextItem {
        let raw = candidate.raw_score;
        self.score_with_range(candidate, channel, raw, raw)
    }

    /// Score a stage's result set, returned in ranking order.
    pub fn score_batch(
        &self,
        candidates: Vec<ContextCandidate>,
        channel: &ChannelConfig,
    ) -> Vec<ScoredContextItem> {
        let (min, max) = candidates
            .iter()
            .map(|c| c.raw_score)
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s), hi.max(s))
            });

        let mut scored: Vec<ScoredContextItem> = candidates
            .into_iter()
            .map(|c| self.score_with_range(c, channel, min, max))
            .collect();
        scored.sort_by(rank_order);
        scored
    }

    fn score_with_range(
        &self,
        candidate: ContextCandidate,
        channel: &ChannelConfig,
        min: f32,
        max: f32,
    ) -> ScoredContextItem {
        let scores = SubScores {
            recency: recency_score(candidate.age, self.half_life_for(channel)),
            relevance: normalize_relevance(candidate.raw_score, min, max),
            importance: importance_score(&candidate, &self.caps),
            relationship: relationship_score(candidate.graph_distance),
        };
        let composite = self.composite(&scores);
        ScoredContextItem {
            candidate,
            scores,
            composite,
        }
    }

    /// Weighted sum of the sub-scores.
    pub fn composite(&self, scores: &SubScores) -> f32 {
        let w = &self.weights;
        let sum = w.recency * scores.recency
            + w.relevance * scores.relevance
            + w.importance * scores.importance
            + w.relationship * scores.relationship;
        sum.clamp(0.0, 1.0)
    }
}

/// Exponential decay: 1.0 at age zero, 0.5 after one half-life.
pub fn recency_score(age: Duration, half_life: Duration) -> f32 {
    if half_life.is_zero() {
        return if age.is_zero() { 1.0 } else { 0.0 };
    }
    let halves = age.as_secs_f64() / half_life.as_secs_f64();
    0.5_f64.powf(halves).clamp(0.0, 1.0) as f32
}

/// Min-max normalization of `raw` within `[min, max]`.
///
/// A degenerate range (single item, or all scores equal) keeps the raw score
/// clamped to `[0, 1]`.
pub fn normalize_relevance(raw: f32, min: f32, max: f32) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    let span = max - min;
    if !span.is_finite() || span <= f32::EPSILON {
        return raw.clamp(0.0, 1.0);
    }
    ((raw - min) / span).clamp(0.0, 1.0)
}

/// Mean of the three log-scaled engagement signals.
pub fn importance_score(candidate: &ContextCandidate, caps: &ImportanceCaps) -> f32 {
    let participants = log_scaled(candidate.participants.len() as u32, caps.participants);
    let reactions = log_scaled(candidate.item.reaction_count, caps.reactions);
    let thread_length = log_scaled(candidate.item.thread_length, caps.thread_length);
    (participants + reactions + thread_length) / 3.0
}

fn log_scaled(value: u32, cap: u32) -> f32 {
    if cap == 0 {
        return 0.0;
    }
    let scaled = (1.0 + value as f64).ln() / (1.0 + cap as f64).ln();
    scaled.min(1.0) as f32
}

/// `1 / (1 + d)`; no path scores 0.
pub fn relationship_score(distance: Option<u32>) -> f32 {
    match distance {
        Some(d) => 1.0 / (1.0 + d as f32),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use threadwise_types::context::{ContextItem, SourceKind};

    fn candidate(id: &str, raw: f32, age_secs: u64) -> ContextCandidate {
        ContextCandidate {
            source: SourceKind::Channel,
            item: ContextItem {
                id: id.to_string(),
                channel_id: Some("C1".to_string()),
                thread_id: None,
                author_id: Some("U1".to_string()),
                text: "deploy pipeline is red".to_string(),
                topics: BTreeSet::new(),
                reaction_count: 0,
                thread_length: 1,
            },
            raw_score: raw,
            participants: BTreeSet::from(["U1".to_string()]),
            age: Duration::from_secs(age_secs),
            graph_distance: None,
        }
    }

    fn scorer() -> RelevanceScorer {
        RelevanceScorer::new(&ScoringConfig::default())
    }

    #[test]
    fn test_recency_halves_each_half_life() {
        let half_life = Duration::from_secs(3600);
        assert!((recency_score(Duration::ZERO, half_life) - 1.0).abs() < 1e-6);
        assert!((recency_score(Duration::from_secs(3600), half_life) - 0.5).abs() < 1e-6);
        assert!((recency_score(Duration::from_secs(7200), half_life) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_relevance_min_max() {
        assert_eq!(normalize_relevance(0.2, 0.2, 0.6), 0.0);
        assert_eq!(normalize_relevance(0.6, 0.2, 0.6), 1.0);
        assert!((normalize_relevance(0.4, 0.2, 0.6) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_relevance_degenerate_batch_clamps_raw() {
        assert!((normalize_relevance(0.7, 0.7, 0.7) - 0.7).abs() < 1e-6);
        assert_eq!(normalize_relevance(3.0, 3.0, 3.0), 1.0);
        assert_eq!(normalize_relevance(-1.0, -1.0, -1.0), 0.0);
        assert_eq!(normalize_relevance(f32::NAN, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_importance_saturates_at_caps() {
        let caps = ImportanceCaps::default();
        let mut c = candidate("a", 0.5, 0);
        c.participants = (0..50).map(|i| format!("U{i}")).collect();
        c.item.reaction_count = 1_000;
        c.item.thread_length = 1_000;
        assert!((importance_score(&c, &caps) - 1.0).abs() < 1e-6);

        c.participants.clear();
        c.item.reaction_count = 0;
        c.item.thread_length = 0;
        assert_eq!(importance_score(&c, &caps), 0.0);
    }

    #[test]
    fn test_relationship_score() {
        assert_eq!(relationship_score(Some(0)), 1.0);
        assert_eq!(relationship_score(Some(1)), 0.5);
        assert_eq!(relationship_score(None), 0.0);
    }

    #[test]
    fn test_sub_scores_and_composite_in_unit_range() {
        let scorer = scorer();
        let channel = ChannelConfig::new("C1");
        let batch = vec![
            candidate("a", 0.9, 10),
            candidate("b", 0.1, 100_000),
            candidate("c", 0.5, 3_600),
        ];
        for item in scorer.score_batch(batch, &channel) {
            for s in [
                item.scores.recency,
                item.scores.relevance,
                item.scores.importance,
                item.scores.relationship,
                item.composite,
            ] {
                assert!((0.0..=1.0).contains(&s), "{s} out of range");
            }
        }
    }

    #[test]
    fn test_score_batch_is_deterministic_and_ranked() {
        let scorer = scorer();
        let channel = ChannelConfig::new("C1");
        let batch = vec![
            candidate("b", 0.5, 60),
            candidate("a", 0.5, 60),
            candidate("c", 0.9, 60),
        ];
        let first = scorer.score_batch(batch.clone(), &channel);
        let second = scorer.score_batch(batch, &channel);
        assert_eq!(first, second);

        let ids: Vec<&str> = first.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_channel_half_life_override() {
        let scorer = scorer();
        let mut channel = ChannelConfig::new("C1");
        channel.overrides.recency_half_life_secs = Some(60);
        let item = scorer.score(candidate("a", 0.5, 60), &channel);
        assert!((item.scores.recency - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_composite_uses_weights() {
        let scorer = scorer();
        let scores = SubScores {
            recency: 1.0,
            relevance: 0.0,
            importance: 0.0,
            relationship: 1.0,
        };
        let expected = ScoringWeights::default().recency + ScoringWeights::default().relationship;
        assert!((scorer.composite(&scores) - expected).abs() < 1e-6);
    }
}
