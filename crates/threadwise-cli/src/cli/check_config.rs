//! `threadwise check-config`: validate a configuration and show what each
//! channel resolves to.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use threadwise_infra::config::load_engine_config;
use threadwise_types::channel::ChannelConfig;
use threadwise_types::config::EngineConfig;

/// Label used for channels that have no `[[channels]]` entry.
const UNLISTED: &str = "(unlisted)";

/// Effective settings of one channel after applying overrides.
#[derive(Debug, serde::Serialize)]
pub struct ResolvedChannel {
    pub channel_id: String,
    pub response_mode: String,
    pub response_frequency: String,
    pub context_window: String,
    pub threshold: f32,
    pub cooldown_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_cooldown_secs: Option<u64>,
    pub half_life_secs: u64,
    pub relevance_target: f32,
    pub token_budget: usize,
    pub topic_tags: Vec<String>,
    pub knowledge_sources: Vec<String>,
}

pub fn resolve(config: &EngineConfig, channel: &ChannelConfig) -> ResolvedChannel {
    ResolvedChannel {
        channel_id: channel.channel_id.clone(),
        response_mode: channel.response_mode.to_string(),
        response_frequency: channel.response_frequency.to_string(),
        context_window: channel.context_window.to_string(),
        threshold: config.threshold_for(channel),
        cooldown_secs: config.cooldown_for(channel).as_secs(),
        thread_cooldown_secs: config.thread_cooldown_for(channel).map(|d| d.as_secs()),
        half_life_secs: config.half_life_for(channel).as_secs(),
        relevance_target: config.relevance_target_for(channel),
        token_budget: config.token_budget_for(channel),
        topic_tags: channel.topic_tags.clone(),
        knowledge_sources: channel.knowledge_sources.clone(),
    }
}

/// Every configured channel plus the defaults applied to unlisted ones.
pub fn resolve_all(config: &EngineConfig) -> Vec<ResolvedChannel> {
    config
        .channels
        .iter()
        .chain(std::iter::once(&ChannelConfig::new(UNLISTED)))
        .map(|channel| resolve(config, channel))
        .collect()
}

pub async fn check_config(path: &Path, json: bool) -> Result<()> {
    let config = load_engine_config(path)
        .await
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    let channels = resolve_all(&config);

    if json {
        let report = serde_json::json!({
            "path": path.display().to_string(),
            "bot_user_id": config.bot.user_id,
            "persona": config.persona,
            "channels": channels,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} is valid",
        style("✓").green().bold(),
        style(path.display()).cyan()
    );
    println!(
        "  {} {}",
        style("Bot user:").bold(),
        style(&config.bot.user_id).yellow()
    );
    if !config.persona.expertise_areas.is_empty() {
        println!(
            "  {} {}",
            style("Expertise:").bold(),
            config.persona.expertise_areas.join(", ")
        );
    }
    println!();

    for channel in &channels {
        println!("  {}", style(format!("── {} ──", channel.channel_id)).dim());
        println!(
            "  Mode:       {} / {}",
            channel.response_mode, channel.response_frequency
        );
        println!("  Threshold:  {}", style(format!("{:.2}", channel.threshold)).bold());
        match channel.thread_cooldown_secs {
            Some(thread) => println!("  Cooldown:   {}s (thread {}s)", channel.cooldown_secs, thread),
            None => println!("  Cooldown:   {}s", channel.cooldown_secs),
        }
        println!(
            "  Context:    {} window, half-life {}s, budget {} tokens, target {:.1}",
            channel.context_window,
            channel.half_life_secs,
            channel.token_budget,
            channel.relevance_target
        );
        if !channel.topic_tags.is_empty() {
            println!("  Topics:     {}", channel.topic_tags.join(", "));
        }
        if !channel.knowledge_sources.is_empty() {
            println!("  Knowledge:  {}", channel.knowledge_sources.join(", "));
        }
        println!();
    }

    Ok(())
}
