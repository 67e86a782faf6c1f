//! Response decisions: factors, classifiers, cooldowns and the engine.

pub mod classifier;
pub mod cooldown;
pub mod engine;
pub mod factors;
pub mod tracking;

pub use classifier::{BoxClassifier, Classifier, HeuristicClassifier};
pub use cooldown::{CommitError, CooldownPolicy, CooldownRecord, CooldownTracker};
pub use engine::DecisionEngine;
