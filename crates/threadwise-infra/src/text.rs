//! Tokenization shared by the in-memory adapters.

use std::collections::BTreeSet;

/// Words too common to carry meaning in overlap scores.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "do", "for", "from", "had", "has",
    "have", "i", "if", "in", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or", "our",
    "so", "that", "the", "this", "to", "was", "we", "were", "what", "when", "which", "who",
    "why", "will", "with", "you", "your",
];

/// Distinct lowercase terms of `text`, without stopwords or `<@USER>` tokens.
pub fn terms(text: &str) -> BTreeSet<String> {
    threadwise_types::message::strip_mentions(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard overlap of the term sets of `a` and `b`, `[0, 1]`.
pub fn lexical_overlap(a: &str, b: &str) -> f32 {
    let a = terms(a);
    let b = terms(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f32 / union as f32
}
