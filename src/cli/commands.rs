//! CLI command definitions

use crate::core::{Event, EventKind};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tracing::debug;

/// Run the pipeline for an event
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file (the built-in Rust pipeline when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Event kind: pull_request or push
    #[arg(short, long, default_value = "pull_request")]
    pub event: String,

    /// Target branch of a push event
    #[arg(short, long)]
    pub branch: Option<String>,

    /// JSON file describing the event ({"kind": ..., "branch": ...})
    #[arg(long, conflicts_with_all = ["event", "branch"])]
    pub event_file: Option<PathBuf>,

    /// Source tree to check
    #[arg(short, long, default_value = ".")]
    pub source: PathBuf,

    /// Directory holding per-run workspaces
    #[arg(long, env = "CHECKRUN_WORKSPACE_DIR")]
    pub workspace: Option<PathBuf>,

    /// Run directly in the source tree instead of a snapshot
    #[arg(long, conflicts_with = "workspace")]
    pub in_place: bool,

    /// Leave the snapshot workspace on disk after the run
    #[arg(long)]
    pub keep_workspace: bool,

    /// Dependency cache directory
    #[arg(long, env = "CHECKRUN_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disable the dependency cache
    #[arg(long)]
    pub no_cache: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Skip toolchain installation
    #[arg(long)]
    pub no_install: bool,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Lines of failing step output to print
    #[arg(long, default_value_t = 20)]
    pub tail: usize,
}

impl RunCommand {
    /// The event described by the flags
    pub fn event(&self) -> Result<Event> {
        if let Some(path) = &self.event_file {
            return Event::from_json_file(path);
        }

        let kind = EventKind::parse(&self.event);
        if kind == EventKind::Unknown {
            debug!(event = %self.event, "Unrecognized event kind, treating as unknown");
        }
        Ok(Event::new(kind, self.branch.clone()))
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file (the built-in Rust pipeline when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print the cache key of a source tree
#[derive(Debug, Args, Clone)]
pub struct FingerprintCommand {
    /// Path to pipeline YAML file (the built-in Rust pipeline when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Source tree holding the manifest
    #[arg(short, long, default_value = ".")]
    pub source: PathBuf,

    /// Toolchain version string to mix into the key
    #[arg(long)]
    pub toolchain_version: Option<String>,
}

/// List pipelines with archived runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
