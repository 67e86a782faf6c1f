//! Decision factors and the weighted score.
//!
//! [`weighted_score`] is pure: identical factors and weights always produce
//! the same score and trace, and raising any single factor never lowers the
//! score because every weight is non-negative.

use std::time::Duration;

use threadwise_types::config::FactorWeights;
use threadwise_types::context::{ContextWindow, ScoredContextItem, SourceKind};
use threadwise_types::decision::{DecisionFactors, FactorContribution, FactorKind};

/// Number of best context items averaged into `value_add_potential`.
pub const VALUE_ADD_TOP_N: usize = 3;

/// Weighted sum of the five factors with a per-factor trace.
pub fn weighted_score(
    factors: &DecisionFactors,
    weights: &FactorWeights,
) -> (f32, Vec<FactorContribution>) {
    let entries = [
        (
            FactorKind::DirectlyMentioned,
            flag(factors.directly_mentioned),
            weights.directly_mentioned,
        ),
        (
            FactorKind::QuestionAsked,
            flag(factors.question_asked),
            weights.question_asked,
        ),
        (
            FactorKind::ExpertiseMatch,
            unit(factors.expertise_match),
            weights.expertise_match,
        ),
        (
            FactorKind::ConversationGap,
            flag(factors.conversation_gap),
            weights.conversation_gap,
        ),
        (
            FactorKind::ValueAddPotential,
            unit(factors.value_add_potential),
            weights.value_add_potential,
        ),
    ];

    let trace: Vec<FactorContribution> = entries
        .into_iter()
        .map(|(factor, value, weight)| FactorContribution {
            factor,
            value,
            weight,
            contribution: value * weight,
        })
        .collect();
    let score = trace.iter().map(|c| c.contribution).sum();
    (score, trace)
}

/// Mean composite of the best [`VALUE_ADD_TOP_N`] items; 0 for an empty window.
pub fn value_add_potential(window: &ContextWindow) -> f32 {
    let top: Vec<f32> = window
        .ranked()
        .into_iter()
        .take(VALUE_ADD_TOP_N)
        .map(|i| i.composite)
        .collect();
    if top.is_empty() {
        return 0.0;
    }
    unit(top.iter().sum::<f32>() / top.len() as f32)
}

/// Whether the thread has been waiting longer than `threshold` for someone
/// other than `author` to reply.
///
/// Waiting time is the age of the newest thread reply from another author,
/// or, when nobody else has replied, the age of the oldest thread item.
pub fn conversation_gap(items: &[ScoredContextItem], author: &str, threshold: Duration) -> bool {
    let thread: Vec<&ScoredContextItem> = items
        .iter()
        .filter(|i| i.candidate.source == SourceKind::Thread)
        .collect();
    if thread.is_empty() {
        return false;
    }

    let last_other_reply = thread
        .iter()
        .filter(|i| i.candidate.item.author_id.as_deref() != Some(author))
        .map(|i| i.candidate.age)
        .min();
    let waiting = match last_other_reply {
        Some(age) => age,
        None => thread
            .iter()
            .map(|i| i.candidate.age)
            .max()
            .unwrap_or_default(),
    };
    waiting > threshold
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

fn unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::candidate;
    use threadwise_types::context::SubScores;

    fn scored(id: &str, author: &str, age_secs: u64, composite: f32) -> ScoredContextItem {
        ScoredContextItem {
            candidate: candidate(SourceKind::Thread, id, author, "text", 0.5, age_secs),
            scores: SubScores::default(),
            composite,
        }
    }

    #[test]
    fn all_factors_on_scores_one() {
        let factors = DecisionFactors {
            directly_mentioned: true,
            question_asked: true,
            expertise_match: 1.0,
            conversation_gap: true,
            value_add_potential: 1.0,
        };
        let (score, trace) = weighted_score(&factors, &FactorWeights::default());
        assert!((score - 1.0).abs() < 1e-5);
        assert_eq!(trace.len(), 5);
        assert_eq!(trace[0].factor, FactorKind::DirectlyMentioned);
        assert_eq!(trace[4].factor, FactorKind::ValueAddPotential);
    }

    #[test]
    fn trace_contributions_sum_to_score() {
        let factors = DecisionFactors {
            directly_mentioned: true,
            question_asked: false,
            expertise_match: 0.4,
            conversation_gap: false,
            value_add_potential: 0.7,
        };
        let (score, trace) = weighted_score(&factors, &FactorWeights::default());
        let sum: f32 = trace.iter().map(|c| c.contribution).sum();
        assert_eq!(score, sum);
        assert!((score - (0.35 + 0.15 * 0.4 + 0.2 * 0.7)).abs() < 1e-6);
    }

    #[test]
    fn weighted_score_is_deterministic() {
        let factors = DecisionFactors {
            directly_mentioned: false,
            question_asked: true,
            expertise_match: 0.33,
            conversation_gap: true,
            value_add_potential: 0.61,
        };
        let weights = FactorWeights::default();
        assert_eq!(weighted_score(&factors, &weights), weighted_score(&factors, &weights));
    }

    #[test]
    fn raising_any_factor_never_lowers_score() {
        let weights = FactorWeights::default();
        let levels = [0.0_f32, 0.3, 0.7, 1.0];
        for mention in [false, true] {
            for question in [false, true] {
                for gap in [false, true] {
                    for &expertise in &levels {
                        for &value_add in &levels {
                            let base = DecisionFactors {
                                directly_mentioned: mention,
                                question_asked: question,
                                expertise_match: expertise,
                                conversation_gap: gap,
                                value_add_potential: value_add,
                            };
                            let (score, _) = weighted_score(&base, &weights);
                            let raised = [
                                DecisionFactors { directly_mentioned: true, ..base },
                                DecisionFactors { question_asked: true, ..base },
                                DecisionFactors { conversation_gap: true, ..base },
                                DecisionFactors { expertise_match: (expertise + 0.2).min(1.0), ..base },
                                DecisionFactors { value_add_potential: (value_add + 0.2).min(1.0), ..base },
                            ];
                            for r in raised {
                                let (higher, _) = weighted_score(&r, &weights);
                                assert!(higher >= score, "{r:?} scored {higher} < {score}");
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn out_of_range_factor_values_are_clamped() {
        let factors = DecisionFactors {
            expertise_match: 4.0,
            value_add_potential: f32::NAN,
            ..DecisionFactors::default()
        };
        let (score, trace) = weighted_score(&factors, &FactorWeights::default());
        assert_eq!(trace[2].value, 1.0);
        assert_eq!(trace[4].value, 0.0);
        assert!((score - 0.15).abs() < 1e-6);
    }

    #[test]
    fn value_add_averages_top_three() {
        let mut window = ContextWindow::new(1_000);
        for (id, composite) in [("a", 0.9), ("b", 0.6), ("c", 0.3), ("d", 0.1)] {
            window.try_admit(scored(id, "U2", 60, composite));
        }
        assert!((value_add_potential(&window) - 0.6).abs() < 1e-6);
        assert_eq!(value_add_potential(&ContextWindow::new(10)), 0.0);
    }

    #[test]
    fn gap_when_nobody_else_replied_for_long() {
        let threshold = Duration::from_secs(1_800);
        let items = vec![scored("root", "U1", 7_200, 0.5), scored("r1", "U1", 3_600, 0.5)];
        assert!(conversation_gap(&items, "U1", threshold));
    }

    #[test]
    fn no_gap_after_recent_reply_from_someone_else() {
        let threshold = Duration::from_secs(1_800);
        let items = vec![scored("root", "U1", 7_200, 0.5), scored("r1", "U2", 120, 0.5)];
        assert!(!conversation_gap(&items, "U1", threshold));
    }

    #[test]
    fn gap_when_others_went_quiet() {
        let threshold = Duration::from_secs(1_800);
        let items = vec![scored("r1", "U2", 5_400, 0.5), scored("r2", "U1", 60, 0.5)];
        assert!(conversation_gap(&items, "U1", threshold));
    }

    #[test]
    fn no_gap_without_thread_items() {
        assert!(!conversation_gap(&[], "U1", Duration::from_secs(1)));
    }
}
