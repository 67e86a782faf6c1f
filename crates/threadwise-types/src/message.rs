//! Chat message types for Threadwise.
//!
//! `ChatMessage` is the normalized message handed over by the ingestion
//! collaborator. The core only ever borrows it.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of conversation a message was posted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// A shared channel with many members.
    #[default]
    Channel,
    /// A 1:1 direct conversation with the bot.
    Direct,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Channel => write!(f, "channel"),
            ChannelKind::Direct => write!(f, "direct"),
        }
    }
}

/// A normalized chat message.
///
/// Immutable once ingested. Identifiers are the chat platform's own string
/// IDs (e.g. `C024BE91L`, `1712345678.000200`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    /// Parent thread, `None` for top-level messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub author_id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    /// User IDs explicitly mentioned by the platform's mention metadata.
    #[serde(default)]
    pub mentions: BTreeSet<String>,
    #[serde(default)]
    pub reaction_count: u32,
    #[serde(default)]
    pub channel_kind: ChannelKind,
    /// Whether the author is an automated account.
    #[serde(default)]
    pub is_bot: bool,
}

impl ChatMessage {
    /// Key identifying the conversation thread this message belongs to.
    ///
    /// Top-level messages start their own thread, keyed by their own ID.
    pub fn thread_key(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.id)
    }

    /// Whether `user_id` is mentioned, either in the mention set or inline.
    pub fn mentions_user(&self, user_id: &str) -> bool {
        self.mentions.contains(user_id) || inline_mentions(&self.text).any(|m| m == user_id)
    }

    /// Message text with inline `<@USER>` tokens removed.
    ///
    /// Falls back to the trimmed raw text when nothing else remains.
    pub fn clean_text(&self) -> String {
        let cleaned = strip_mentions(&self.text);
        if cleaned.is_empty() {
            self.text.trim().to_string()
        } else {
            cleaned
        }
    }

    /// Everyone this message involves: the author plus mentioned users.
    pub fn participants(&self) -> BTreeSet<String> {
        let mut participants = self.mentions.clone();
        participants.extend(inline_mentions(&self.text).map(str::to_string));
        participants.insert(self.author_id.clone());
        participants
    }
}

/// Iterate over user IDs referenced by inline `<@USER>` tokens.
///
/// Tokens with a display-name suffix (`<@U123|alice>`) yield only the ID.
pub fn inline_mentions(text: &str) -> impl Iterator<Item = &str> {
    text.split("<@").skip(1).filter_map(|rest| {
        let end = rest.find('>')?;
        let id = rest[..end].split('|').next()?;
        (!id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())).then_some(id)
    })
}

/// Remove inline `<@USER>` tokens and collapse the surrounding whitespace.
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('>') {
            Some(end)
                if tail[..end]
                    .split('|')
                    .next()
                    .is_some_and(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())) =>
            {
                rest = &tail[end + 1..];
            }
            _ => {
                out.push_str("<@");
                rest = tail;
            }
        }
    }
    out.push_str(rest);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            id: "1712345678.000200".to_string(),
            channel_id: "C1".to_string(),
            thread_id: None,
            author_id: "U1".to_string(),
            timestamp: Utc::now(),
            text: text.to_string(),
            mentions: BTreeSet::new(),
            reaction_count: 0,
            channel_kind: ChannelKind::Channel,
            is_bot: false,
        }
    }

    #[test]
    fn test_thread_key_falls_back_to_own_id() {
        let mut msg = message("hello");
        assert_eq!(msg.thread_key(), "1712345678.000200");
        msg.thread_id = Some("1712340000.000100".to_string());
        assert_eq!(msg.thread_key(), "1712340000.000100");
    }

    #[test]
    fn test_inline_mentions_extracts_ids() {
        let ids: Vec<&str> = inline_mentions("hey <@UBOT> and <@U2|alice> <@bad id>").collect();
        assert_eq!(ids, vec!["UBOT", "U2"]);
    }

    #[test]
    fn test_strip_mentions_removes_tokens() {
        assert_eq!(strip_mentions("<@UBOT>  how do   I deploy?"), "how do I deploy?");
        assert_eq!(strip_mentions("a <@ not a mention"), "a <@ not a mention");
    }

    #[test]
    fn test_clean_text_falls_back_when_only_mention() {
        let msg = message("<@UBOT>");
        assert_eq!(msg.clean_text(), "<@UBOT>");
    }

    #[test]
    fn test_mentions_user_checks_set_and_text() {
        let mut msg = message("ping <@UBOT>");
        assert!(msg.mentions_user("UBOT"));
        assert!(!msg.mentions_user("U9"));
        msg.mentions.insert("U9".to_string());
        assert!(msg.mentions_user("U9"));
    }

    #[test]
    fn test_participants_include_author_and_mentions() {
        let mut msg = message("cc <@U3>");
        msg.mentions.insert("U2".to_string());
        let p = msg.participants();
        assert!(p.contains("U1") && p.contains("U2") && p.contains("U3"));
    }

    #[test]
    fn test_chat_message_deserialize_defaults() {
        let json = r#"{
            "id": "1.0",
            "channel_id": "C1",
            "author_id": "U1",
            "timestamp": "2026-01-01T00:00:00Z",
            "text": "hi"
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert!(msg.thread_id.is_none());
        assert!(msg.mentions.is_empty());
        assert_eq!(msg.channel_kind, ChannelKind::Channel);
        assert!(!msg.is_bot);
    }
}
