//! Step domain model

use crate::core::{config::StepConfig, state::StepFailure};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Matches rustc/cargo style warning lines
pub const DEFAULT_WARNING_PATTERN: &str = r"(?m)^warning(\[\w+\])?:";

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Position in the pipeline (0-based)
    pub index: usize,

    /// Step name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Command template; arguments may contain `{{ variable }}`
    pub command: Vec<String>,

    /// Treat warnings in the output as a failure
    pub deny_warnings: bool,

    /// How warnings are recognized
    pub warning_pattern: ConditionPattern,

    /// Timeout in seconds
    pub timeout_secs: u64,

    /// Step-specific environment
    pub env: BTreeMap<String, String>,
}

/// Pattern for matching step output
#[derive(Debug, Clone)]
pub enum ConditionPattern {
    /// Simple string contains match
    Simple(String),
    /// Regular expression match
    Regex(Regex),
}

impl ConditionPattern {
    /// Check if the pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        match self {
            ConditionPattern::Simple(pattern) => text.contains(pattern),
            ConditionPattern::Regex(regex) => regex.is_match(text),
        }
    }

    /// Count the matches in the given text
    pub fn count(&self, text: &str) -> usize {
        match self {
            ConditionPattern::Simple(pattern) if pattern.is_empty() => 0,
            ConditionPattern::Simple(pattern) => text.matches(pattern.as_str()).count(),
            ConditionPattern::Regex(regex) => regex.find_iter(text).count(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            ConditionPattern::Simple(s) => s.clone(),
            ConditionPattern::Regex(r) => format!("[regex: {}]", r.as_str()),
        }
    }
}

impl Step {
    /// Create a step from a step config
    pub fn from_config(index: usize, config: &StepConfig, defaults: &StepDefaults) -> Result<Self> {
        let command = match (&config.builtin, &config.run) {
            (Some(builtin), _) => builtin.command(),
            (None, Some(run)) => run.clone(),
            (None, None) => anyhow::bail!("Step '{}' has no command", config.name),
        };

        let deny_warnings = config
            .deny_warnings
            .unwrap_or_else(|| config.builtin.is_some_and(|b| b.denies_warnings()));

        let warning_pattern = match &config.warning_pattern {
            Some(pattern) if config.use_regex => ConditionPattern::Regex(
                Regex::new(pattern)
                    .with_context(|| format!("Invalid warning pattern for step '{}'", config.name))?,
            ),
            Some(pattern) => ConditionPattern::Simple(pattern.clone()),
            None => ConditionPattern::Regex(Regex::new(DEFAULT_WARNING_PATTERN)?),
        };

        Ok(Step {
            index,
            name: config.name.clone(),
            description: config.description.clone(),
            command,
            deny_warnings,
            warning_pattern,
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            env: config.env.clone(),
        })
    }

    /// Render the command line with variable substitution
    pub fn render_command(&self, variables: &HashMap<String, String>) -> Vec<String> {
        self.command.iter().map(|arg| render_template(arg, variables)).collect()
    }

    /// Render step-specific environment with variable substitution
    pub fn render_env(&self, variables: &HashMap<String, String>) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), render_template(v, variables)))
            .collect()
    }

    /// Decide the step outcome from its exit status and output.
    ///
    /// Returns `None` when the step passed.
    pub fn evaluate(&self, exit_code: i32, output: &str) -> Option<StepFailure> {
        if exit_code != 0 {
            return Some(StepFailure::ExitCode(exit_code));
        }

        if self.deny_warnings {
            // Colored output must still match line-anchored patterns
            let plain = console::strip_ansi_codes(output);
            let warnings = self.warning_pattern.count(&plain);
            if warnings > 0 {
                return Some(StepFailure::WarningsDenied { warnings });
            }
        }

        None
    }

    /// Display form of the command line
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Replace `{{ name }}` placeholders
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{ {} }}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }

    rendered
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 1800, // 30 minutes
        }
    }
}
