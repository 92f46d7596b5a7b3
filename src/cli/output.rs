//! CLI output formatting

use crate::{
    core::stage::value_text,
    persistence::CheckpointSummary,
};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "= ");

/// Format a checkpoint listing entry for display
pub fn format_checkpoint_summary(summary: &CheckpointSummary) -> String {
    format!(
        "{} {} - after stage {} ({}) - {} [{}]",
        PAUSE,
        style(&summary.namespace).bold(),
        style(summary.stage_index).cyan(),
        summary.stage_name,
        style(summary.checkpointed_at.format("%Y-%m-%d %H:%M:%S UTC")).dim(),
        style(&summary.sink).dim()
    )
}

/// Format a stored state value, one line per entry
pub fn format_state_value(key: &str, value: &serde_json::Value, max_lines: usize) -> String {
    let text = format_output(&value_text(value), max_lines);
    if text.contains('\n') {
        format!("{}:\n{}", style(key).cyan(), indent(&text, 4))
    } else {
        format!("{}: {}", style(key).cyan(), text)
    }
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate multi-line text to `max_lines`
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
