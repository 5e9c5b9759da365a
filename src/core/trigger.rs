//! Trigger evaluation - decides whether an incoming event schedules a run

use crate::core::config::TriggerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Kind of repository event that may trigger a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Pull request opened, updated or reopened
    PullRequest,
    /// Push to a branch
    Push,
    /// Anything this runner does not understand
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Parse an event kind, mapping anything unrecognized to `Unknown`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pull_request" | "pr" => EventKind::PullRequest,
            "push" => EventKind::Push,
            _ => EventKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PullRequest => "pull_request",
            EventKind::Push => "push",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming repository event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind
    pub kind: EventKind,

    /// Target branch (meaningful for pushes)
    #[serde(default)]
    pub branch: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, branch: Option<String>) -> Self {
        Self { kind, branch }
    }

    pub fn pull_request() -> Self {
        Self::new(EventKind::PullRequest, None)
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new(EventKind::Push, Some(branch.into()))
    }

    /// Load an event record from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse an event record from JSON
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Branch name with any `refs/heads/` prefix removed
    pub fn branch_name(&self) -> Option<&str> {
        self.branch
            .as_deref()
            .map(|b| b.strip_prefix("refs/heads/").unwrap_or(b))
            .filter(|b| !b.is_empty())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch_name() {
            Some(branch) => write!(f, "{} ({})", self.kind, branch),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Admission rule built from the pipeline's `on` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRule {
    /// Admit every pull request event
    pub pull_request: bool,

    /// Branches whose pushes are admitted
    pub push_branches: Vec<String>,
}

impl TriggerRule {
    pub fn from_config(config: &TriggerConfig) -> Self {
        Self {
            pull_request: config.pull_request,
            push_branches: config
                .push
                .as_ref()
                .map(|p| p.branches.clone())
                .unwrap_or_default(),
        }
    }

    /// Decide whether `event` schedules a run
    pub fn should_run(&self, event: &Event) -> bool {
        match event.kind {
            EventKind::PullRequest => self.pull_request,
            EventKind::Push => event
                .branch_name()
                .is_some_and(|branch| self.push_branches.iter().any(|b| b == branch)),
            EventKind::Unknown => false,
        }
    }

    /// Human-readable reason for a rejection
    pub fn rejection_reason(&self, event: &Event) -> String {
        match event.kind {
            EventKind::PullRequest => "pull_request trigger is disabled".to_string(),
            EventKind::Push => match event.branch_name() {
                Some(branch) => format!(
                    "push to '{}' does not match [{}]",
                    branch,
                    self.push_branches.join(", ")
                ),
                None => "push event has no branch".to_string(),
            },
            EventKind::Unknown => "unknown event kind".to_string(),
        }
    }
}

impl Default for TriggerRule {
    fn default() -> Self {
        Self::from_config(&TriggerConfig::default())
    }
}
