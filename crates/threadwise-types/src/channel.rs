//! Channel and persona settings for Threadwise.
//!
//! These are read-only snapshots owned by the external settings store. The
//! core receives them by reference for each evaluation and never mutates
//! them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When the bot is allowed to speak in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Only respond when directly mentioned.
    #[default]
    MentionOnly,
    /// Respond whenever the decision score clears the channel threshold.
    Open,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::MentionOnly => write!(f, "mention_only"),
            ResponseMode::Open => write!(f, "open"),
        }
    }
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mention_only" => Ok(ResponseMode::MentionOnly),
            "open" => Ok(ResponseMode::Open),
            other => Err(format!("invalid response mode: '{other}'")),
        }
    }
}

/// How often the bot should chime in. Mapped to a numeric threshold by
/// the decision configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFrequency {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for ResponseFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFrequency::Low => write!(f, "low"),
            ResponseFrequency::Medium => write!(f, "medium"),
            ResponseFrequency::High => write!(f, "high"),
        }
    }
}

/// How far back the channel stage looks for recent activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContextWindowSetting {
    #[serde(rename = "1_hour")]
    OneHour,
    #[default]
    #[serde(rename = "1_day")]
    OneDay,
    /// Resolves to the upper bound, three days.
    #[serde(rename = "2-3_days")]
    TwoToThreeDays,
    #[serde(rename = "1_week")]
    OneWeek,
}

impl fmt::Display for ContextWindowSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextWindowSetting::OneHour => write!(f, "1_hour"),
            ContextWindowSetting::OneDay => write!(f, "1_day"),
            ContextWindowSetting::TwoToThreeDays => write!(f, "2-3_days"),
            ContextWindowSetting::OneWeek => write!(f, "1_week"),
        }
    }
}

impl ContextWindowSetting {
    pub fn duration(&self) -> Duration {
        const HOUR: u64 = 60 * 60;
        match self {
            ContextWindowSetting::OneHour => Duration::from_secs(HOUR),
            ContextWindowSetting::OneDay => Duration::from_secs(24 * HOUR),
            ContextWindowSetting::TwoToThreeDays => Duration::from_secs(72 * HOUR),
            ContextWindowSetting::OneWeek => Duration::from_secs(7 * 24 * HOUR),
        }
    }
}

/// Optional per-channel overrides of engine-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelOverrides {
    /// Minimum seconds between two responses anywhere in the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    /// Minimum seconds between two responses within one thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_cooldown_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency_half_life_secs: Option<u64>,
    /// Accumulated composite relevance at which aggregation stops expanding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_target: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<usize>,
    /// Explicit numeric threshold, bypassing the frequency mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_threshold: Option<f32>,
}

/// Per-channel settings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default)]
    pub context_window: ContextWindowSetting,
    #[serde(default)]
    pub response_frequency: ResponseFrequency,
    /// Topics used to find related discussions in other channels.
    #[serde(default)]
    pub topic_tags: Vec<String>,
    /// Knowledge-base sources (wiki spaces, doc sets) enabled for this channel.
    #[serde(default)]
    pub knowledge_sources: Vec<String>,
    /// Reply inside the message's thread rather than at the top level.
    #[serde(default = "default_reply_in_thread")]
    pub reply_in_thread: bool,
    #[serde(default)]
    pub overrides: ChannelOverrides,
}

fn default_reply_in_thread() -> bool {
    true
}

impl ChannelConfig {
    /// A channel with default settings.
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            response_mode: ResponseMode::default(),
            context_window: ContextWindowSetting::default(),
            response_frequency: ResponseFrequency::default(),
            topic_tags: Vec::new(),
            knowledge_sources: Vec::new(),
            reply_in_thread: default_reply_in_thread(),
            overrides: ChannelOverrides::default(),
        }
    }

    pub fn is_mention_only(&self) -> bool {
        self.response_mode == ResponseMode::MentionOnly
    }
}

/// The bot's persona as configured by the settings store.
///
/// Only `expertise_areas` feeds the decision; role and tone are carried
/// through for the response-generation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub expertise_areas: Vec<String>,
    #[serde(default)]
    pub tone: String,
}
