//! Message classifiers for the question and expertise factors.
//!
//! The engine only depends on the [`Classifier`] port. The default
//! [`HeuristicClassifier`] needs no network; a model-backed classifier can
//! replace it, and any error or timeout it produces falls back to a
//! conservative factor value in the engine.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use threadwise_types::error::ClassificationError;

/// Words that open a question even without a question mark.
const INTERROGATIVES: &[&str] = &[
    "who", "what", "when", "where", "why", "how", "which", "can", "could", "would", "should",
    "is", "are", "does", "do", "did", "will", "has", "have", "any", "anyone", "anybody",
];

/// Classifies message text. Uses RPITIT (Rust 2024 edition).
pub trait Classifier: Send + Sync {
    /// Whether the text asks something.
    fn is_question(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<bool, ClassificationError>> + Send;

    /// Overlap between the text and the given expertise areas, `[0, 1]`.
    fn expertise_match(
        &self,
        text: &str,
        areas: &[String],
    ) -> impl Future<Output = Result<f32, ClassificationError>> + Send;
}

/// Object-safe version of [`Classifier`].
pub trait ClassifierDyn: Send + Sync {
    fn is_question_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ClassificationError>> + Send + 'a>>;

    fn expertise_match_boxed<'a>(
        &'a self,
        text: &'a str,
        areas: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<f32, ClassificationError>> + Send + 'a>>;
}

impl<T: Classifier> ClassifierDyn for T {
    fn is_question_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ClassificationError>> + Send + 'a>> {
        Box::pin(self.is_question(text))
    }

    fn expertise_match_boxed<'a>(
        &'a self,
        text: &'a str,
        areas: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<f32, ClassificationError>> + Send + 'a>> {
        Box::pin(self.expertise_match(text, areas))
    }
}

/// Type-erased classifier selected at startup.
pub struct BoxClassifier {
    inner: Box<dyn ClassifierDyn + Send + Sync>,
}

impl BoxClassifier {
    pub fn new<T: Classifier + 'static>(classifier: T) -> Self {
        Self {
            inner: Box::new(classifier),
        }
    }

    pub async fn is_question(&self, text: &str) -> Result<bool, ClassificationError> {
        self.inner.is_question_boxed(text).await
    }

    pub async fn expertise_match(
        &self,
        text: &str,
        areas: &[String],
    ) -> Result<f32, ClassificationError> {
        self.inner.expertise_match_boxed(text, areas).await
    }
}

impl Default for BoxClassifier {
    fn default() -> Self {
        Self::new(HeuristicClassifier)
    }
}

impl std::fmt::Debug for BoxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxClassifier").finish_non_exhaustive()
    }
}

/// Punctuation/interrogative question detection and term-overlap expertise
/// matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn detect_question(text: &str) -> bool {
        if text.contains('?') {
            return true;
        }
        text.split(|c: char| !c.is_alphanumeric())
            .find(|w| !w.is_empty())
            .is_some_and(|first| INTERROGATIVES.contains(&first.to_lowercase().as_str()))
    }

    /// Best coverage of any single area: the fraction of the area's terms
    /// that appear in the text.
    pub fn score_expertise(text: &str, areas: &[String]) -> f32 {
        let words: BTreeSet<String> = terms(text).into_iter().collect();
        if words.is_empty() {
            return 0.0;
        }
        areas
            .iter()
            .map(|area| {
                let area_terms = terms(area);
                if area_terms.is_empty() {
                    return 0.0;
                }
                let hits = area_terms.iter().filter(|t| words.contains(*t)).count();
                hits as f32 / area_terms.len() as f32
            })
            .fold(0.0, f32::max)
    }
}

impl Classifier for HeuristicClassifier {
    async fn is_question(&self, text: &str) -> Result<bool, ClassificationError> {
        Ok(Self::detect_question(text))
    }

    async fn expertise_match(&self, text: &str, areas: &[String]) -> Result<f32, ClassificationError> {
        Ok(Self::score_expertise(text, areas))
    }
}

/// Lowercased alphanumeric terms with a trailing plural `s` removed.
fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let lower = w.to_lowercase();
            match lower.strip_suffix('s') {
                Some(stem) if stem.len() >= 3 && !stem.ends_with('s') => stem.to_string(),
                _ => lower,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_mark_is_a_question() {
        assert!(HeuristicClassifier::detect_question("deploy is red?"));
        assert!(HeuristicClassifier::detect_question("so... is it fixed? thanks"));
    }

    #[test]
    fn interrogative_opening_is_a_question() {
        assert!(HeuristicClassifier::detect_question("How do I rotate the keys"));
        assert!(HeuristicClassifier::detect_question("anyone seen this before"));
        assert!(!HeuristicClassifier::detect_question("Deployed the fix, all green"));
        assert!(!HeuristicClassifier::detect_question(""));
    }

    #[test]
    fn expertise_matches_plural_forms() {
        let areas = vec!["deploys".to_string(), "kubernetes".to_string()];
        let score = HeuristicClassifier::score_expertise("why did the deploy fail", &areas);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn expertise_partial_multi_word_area() {
        let areas = vec!["database migrations".to_string()];
        let score = HeuristicClassifier::score_expertise("the migration hangs", &areas);
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn expertise_without_areas_is_zero() {
        assert_eq!(HeuristicClassifier::score_expertise("anything", &[]), 0.0);
        assert_eq!(
            HeuristicClassifier::score_expertise("", &["rust".to_string()]),
            0.0
        );
    }

    #[tokio::test]
    async fn box_classifier_delegates() {
        let classifier = BoxClassifier::default();
        assert!(classifier.is_question("what broke?").await.unwrap());
        let areas = vec!["rust".to_string()];
        let score = classifier.expertise_match("rust borrow checker", &areas).await.unwrap();
        assert_eq!(score, 1.0);
    }
}
