//! `threadwise evaluate`: replay recorded messages through the engine.
//!
//! Stores are seeded from the history file, then each message is evaluated
//! in order and ingested afterwards, the way a live ingestion pipeline
//! would feed them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::broadcast::Receiver;

use threadwise_core::decision::DecisionEngine;
use threadwise_core::event::EventBus;
use threadwise_infra::config::load_engine_config;
use threadwise_infra::seed::{History, InMemoryStores};
use threadwise_infra::vector::HashingEmbedder;
use threadwise_types::channel::ChannelConfig;
use threadwise_types::config::EngineConfig;
use threadwise_types::decision::DecisionResult;
use threadwise_types::event::DecisionEvent;
use threadwise_types::message::ChatMessage;

use super::render;

pub struct EvaluateArgs {
    pub config: PathBuf,
    pub history: Option<PathBuf>,
    pub messages: PathBuf,
    pub events: bool,
}

/// Parse a JSONL message file. Blank lines and `#` comments are skipped.
pub fn parse_messages(content: &str) -> Result<Vec<ChatMessage>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str::<ChatMessage>(line)
                .with_context(|| format!("line {}: not a valid message", idx + 1))
        })
        .collect()
}

async fn load_history(path: Option<&Path>) -> Result<History> {
    let Some(path) = path else {
        return Ok(History::default());
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read history {}", path.display()))?;
    History::from_json(&content).with_context(|| format!("invalid history {}", path.display()))
}

/// Channel settings for a message: its `[[channels]]` entry or defaults.
fn channel_for(config: &EngineConfig, channel_id: &str) -> ChannelConfig {
    config
        .channel(channel_id)
        .cloned()
        .unwrap_or_else(|| ChannelConfig::new(channel_id))
}

fn drain(events: &mut Receiver<DecisionEvent>) -> Vec<DecisionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub async fn evaluate(args: &EvaluateArgs, json: bool) -> Result<()> {
    let config = load_engine_config(&args.config)
        .await
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;
    let history = load_history(args.history.as_deref()).await?;
    let content = tokio::fs::read_to_string(&args.messages)
        .await
        .with_context(|| format!("failed to read messages {}", args.messages.display()))?;
    let messages = parse_messages(&content)
        .with_context(|| format!("invalid messages file {}", args.messages.display()))?;

    tracing::info!(
        messages = messages.len(),
        history = history.messages.len(),
        documents = history.documents.len(),
        "replaying messages"
    );

    let bus = EventBus::default();
    let mut receiver = bus.subscribe();
    let show_events = args.events;

    let results = replay(config, history, &messages, bus, |message, result| {
        let events = drain(&mut receiver);
        if json {
            if show_events {
                for event in &events {
                    if let Ok(line) = serde_json::to_string(event) {
                        println!("{line}");
                    }
                }
            }
            match serde_json::to_string(result) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(message_id = %message.id, error = %e, "failed to encode result"),
            }
        } else {
            render::print_decision(message, result);
            if show_events {
                events.iter().for_each(render::print_event);
            }
        }
    })
    .await?;

    if !json {
        let responded = results.iter().filter(|r| r.respond).count();
        render::print_summary(responded, results.len() - responded);
    }
    Ok(())
}

/// Seed stores, then evaluate and ingest each message in order.
///
/// Channel topic tags from the configuration are merged into the history so
/// cross-channel retrieval and the relationship graph see them.
pub async fn replay(
    config: EngineConfig,
    mut history: History,
    messages: &[ChatMessage],
    bus: EventBus,
    mut on_result: impl FnMut(&ChatMessage, &DecisionResult),
) -> Result<Vec<DecisionResult>> {
    for channel in &config.channels {
        history.tag_channel(&channel.channel_id, channel.topic_tags.iter().cloned());
    }
    let stores = InMemoryStores::from_history(&history, HashingEmbedder::default())
        .await
        .context("failed to seed stores")?;
    let engine = DecisionEngine::new(config, stores.memory_stores())?.with_event_bus(bus);

    let mut results = Vec::with_capacity(messages.len());
    for message in messages {
        let channel = channel_for(engine.config(), &message.channel_id);
        let result = engine.evaluate(message, &channel).await;
        stores
            .ingest(message)
            .await
            .with_context(|| format!("failed to ingest {}", message.id))?;
        on_result(message, &result);
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadwise_types::decision::SuppressionReason;

    const REPLAY: &str = r#"
# deploy incident
{"id":"m1","channel_id":"C-eng","author_id":"U1","timestamp":"2026-03-02T09:00:00Z","text":"staging deploy is stuck"}
{"id":"m2","channel_id":"C-eng","thread_id":"m1","author_id":"U2","timestamp":"2026-03-02T09:01:00Z","text":"<@threadwise> why is the deploy stuck?","mentions":["threadwise"]}
{"id":"m3","channel_id":"C-eng","thread_id":"m1","author_id":"U1","timestamp":"2026-03-02T09:01:20Z","text":"<@threadwise> any update?","mentions":["threadwise"]}
{"id":"m4","channel_id":"C-eng","thread_id":"m1","author_id":"threadwise","timestamp":"2026-03-02T09:01:30Z","text":"looking at the migration lock"}
"#;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.persona.expertise_areas = vec!["deploy".to_string()];
        let mut channel = ChannelConfig::new("C-eng");
        channel.topic_tags = vec!["deploys".to_string()];
        config.channels.push(channel);
        config
    }

    #[test]
    fn jsonl_skips_blank_and_comment_lines() {
        let messages = parse_messages(REPLAY).unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].thread_id.as_deref(), Some("m1"));
        assert!(messages[1].mentions.contains("threadwise"));
    }

    #[test]
    fn bad_line_is_reported_by_number() {
        let err = parse_messages("\n{\"id\": 1}\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn unlisted_channels_get_defaults() {
        let config = config();
        assert_eq!(channel_for(&config, "C-eng").topic_tags, ["deploys"]);
        assert!(channel_for(&config, "C-other").topic_tags.is_empty());
    }

    #[tokio::test]
    async fn replay_applies_mention_cooldown_and_own_message_rules() {
        let messages = parse_messages(REPLAY).unwrap();
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();
        let mut seen = Vec::new();

        let results = replay(config(), History::default(), &messages, bus, |message, _| {
            seen.push(message.id.clone());
        })
        .await
        .unwrap();

        assert_eq!(seen, ["m1", "m2", "m3", "m4"]);
        assert_eq!(
            results[0].suppression_reason(),
            Some(&SuppressionReason::MentionRequired)
        );
        assert!(results[1].respond, "score {} threshold {}", results[1].score, results[1].threshold);
        assert_eq!(results[1].reply_thread_id.as_deref(), Some("m1"));
        assert!(matches!(
            results[2].suppression_reason(),
            Some(SuppressionReason::Cooldown { .. })
        ));
        assert_eq!(
            results[3].suppression_reason(),
            Some(&SuppressionReason::OwnMessage)
        );

        let events = drain(&mut receiver);
        assert!(events.iter().any(|e| matches!(e, DecisionEvent::Responded { .. })));
    }
}
