//! CLI output formatting

use crate::{
    cache::SaveOutcome,
    core::{CacheOutcome, RunStatus},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "# ");

/// Create a step progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a cache outcome for display
pub fn format_cache_outcome(outcome: &CacheOutcome) -> String {
    match outcome {
        CacheOutcome::Disabled => format!("{}cache disabled", PACKAGE),
        CacheOutcome::Hit { key } => {
            format!("{}cache {} ({})", PACKAGE, style("hit").green(), style(key).dim())
        }
        CacheOutcome::Miss { key } => {
            format!("{}cache {} ({})", PACKAGE, style("miss").yellow(), style(key).dim())
        }
        CacheOutcome::Unavailable { reason } => {
            format!("{}cache {}: {}", WARN, style("unavailable").yellow(), style(reason).dim())
        }
    }
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    let trigger = match &summary.branch {
        Some(branch) => format!("{} {}", summary.event_kind, branch),
        None => summary.event_kind.clone(),
    };

    let mut line = format!(
        "{}{} - {} - {} - {} ({}/{}) - exit {}",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        style(trigger).cyan(),
        format_status(summary.status),
        summary.steps_run,
        summary.total_steps,
        summary.exit_code
    );
    if let Some(step) = &summary.failed_step {
        line.push_str(&format!(" - failed at {}", style(step).red()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::TriggerRejected { event, reason } => format!(
            "{}Skipping {}: {}",
            INFO,
            style(event).cyan(),
            style(reason).dim()
        ),
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            event,
            total_steps,
        } => format!(
            "{}Starting {} on {} ({} steps, {})",
            ROCKET,
            style(pipeline_name).bold(),
            style(event).cyan(),
            total_steps,
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::Provisioned { workspace, toolchain } => format!(
            "{}Workspace {} with {}",
            INFO,
            style(workspace.display()).dim(),
            style(toolchain).cyan()
        ),
        ExecutionEvent::ProvisionFailed { error } => {
            format!("{}Provisioning failed: {}", CROSS, style(error).red())
        }
        ExecutionEvent::CacheRestored { outcome } => format_cache_outcome(outcome),
        ExecutionEvent::StepStarted {
            index,
            total,
            name,
            command,
        } => format!(
            "{}[{}/{}] {} {}",
            SPINNER,
            style(index + 1).cyan(),
            style(total).dim(),
            style(name).bold(),
            style(command).dim()
        ),
        ExecutionEvent::StepCompleted { name, duration_ms, .. } => format!(
            "{}{} ({})",
            CHECK,
            style(name).green(),
            style(format_duration(Duration::from_millis(*duration_ms))).dim()
        ),
        ExecutionEvent::StepFailed { name, failure, .. } => {
            format!("{}{}: {}", CROSS, style(name).red(), style(failure).dim())
        }
        ExecutionEvent::CacheSaved { key, outcome } => match outcome {
            SaveOutcome::Saved { bytes } => format!(
                "{}cache saved ({} bytes, {})",
                PACKAGE,
                bytes,
                style(key).dim()
            ),
            SaveOutcome::Unchanged => format!("{}cache unchanged", PACKAGE),
        },
        ExecutionEvent::CacheError { error } => {
            format!("{}cache error: {}", WARN, style(error).dim())
        }
        ExecutionEvent::RunFinished {
            run_id,
            status,
            exit_code,
        } => format!(
            "{}Run ({}) {} with exit code {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status),
            exit_code
        ),
    }
}

/// Format step output with truncation, keeping the last `max_lines`
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            lines[lines.len() - max_lines..].join("\n")
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
