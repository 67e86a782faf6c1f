//! Styled terminal output for decisions and events.

use console::style;

use threadwise_types::decision::{DecisionResult, Outcome};
use threadwise_types::event::DecisionEvent;
use threadwise_types::message::ChatMessage;

/// Longest message excerpt shown in a decision header.
const EXCERPT_CHARS: usize = 72;

pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

pub fn print_decision(message: &ChatMessage, result: &DecisionResult) {
    let verdict = match &result.outcome {
        Outcome::Responded => format!("{}", style("RESPOND").green().bold()),
        Outcome::Suppressed(reason) => {
            format!("{} {}", style("SUPPRESS").yellow().bold(), style(reason).yellow())
        }
    };

    println!();
    println!(
        "  {} {} {}",
        style(&message.id).cyan(),
        style(format!("#{}", message.channel_id)).dim(),
        excerpt(&message.text, EXCERPT_CHARS)
    );
    println!(
        "  {}  score {:.3} / threshold {:.2}{}",
        verdict,
        result.score,
        result.threshold,
        if result.degraded {
            format!(" {}", style("(degraded)").red())
        } else {
            String::new()
        }
    );

    for contribution in &result.trace {
        println!(
            "    {} {:<20} {:.3} × {:.2} = {:.3}",
            style("•").dim(),
            contribution.factor.to_string(),
            contribution.value,
            contribution.weight,
            contribution.contribution
        );
    }

    if result.respond {
        if let Some(thread) = &result.reply_thread_id {
            println!("    {} reply in thread {}", style("↳").dim(), style(thread).cyan());
        }
        for item in &result.selected_context {
            println!(
                "    {} [{}] {:.3} {}",
                style("▸").blue(),
                item.candidate.source,
                item.composite,
                excerpt(&item.candidate.item.text, EXCERPT_CHARS - 12)
            );
        }
    }
}

pub fn print_event(event: &DecisionEvent) {
    let line = match event {
        DecisionEvent::EvaluationStarted { message_id, .. } => format!("started {message_id}"),
        DecisionEvent::StageCompleted {
            source,
            fetched,
            admitted,
            accumulated_relevance,
            ..
        } => format!(
            "stage {source}: fetched {fetched}, admitted {admitted}, relevance {accumulated_relevance:.2}"
        ),
        DecisionEvent::StoreDegraded { store, error, .. } => format!("store {store} degraded: {error}"),
        DecisionEvent::Responded { context_items, .. } => {
            format!("responded with {context_items} context items")
        }
        DecisionEvent::Suppressed { reason, .. } => format!("suppressed: {reason}"),
    };
    println!("    {} {}", style("event").magenta().dim(), style(line).dim());
}

pub fn print_summary(responded: usize, suppressed: usize) {
    println!();
    println!(
        "  {} {} responded, {} suppressed",
        style("Σ").bold(),
        style(responded).green(),
        style(suppressed).yellow()
    );
    println!();
}
