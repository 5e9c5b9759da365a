//! Pipeline configuration from YAML

use crate::core::Pipeline;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// The canonical Rust pipeline used when no configuration file is given
pub const DEFAULT_PIPELINE: &str = r#"
name: "rust-ci"

on:
  pull_request: true
  push:
    branches: ["main"]

toolchain:
  channel: "stable"
  profile: "minimal"
  components: ["rustfmt", "clippy"]

cache:
  manifest: "Cargo.lock"
  paths: ["target", ".cargo/registry", ".cargo/git"]
  key_prefix: "cargo"

env:
  CARGO_HOME: "{{ workspace }}/.cargo"
  CARGO_TERM_COLOR: "always"

steps:
  - name: "fetch"
    builtin: fetch
  - name: "fmt"
    builtin: fmt
  - name: "build"
    builtin: build
  - name: "clippy"
    builtin: clippy
  - name: "test-build"
    builtin: test-build
  - name: "test"
    builtin: test
"#;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Events that schedule a run
    #[serde(default, rename = "on")]
    pub triggers: TriggerConfig,

    /// Toolchain to provision
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Dependency cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Environment exported to every step (values may use `{{ variable }}`)
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// User variables available for substitution
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Pipeline steps, in execution order
    pub steps: Vec<StepConfig>,

    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// The `on` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Run for every pull request event
    #[serde(default = "default_true")]
    pub pull_request: bool,

    /// Run for pushes to these branches (`null` disables push triggers)
    #[serde(default = "default_push_trigger")]
    pub push: Option<PushTrigger>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTrigger {
    #[serde(default)]
    pub branches: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pull_request: true,
            push: default_push_trigger(),
        }
    }
}

/// Toolchain requested for the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default = "default_profile")]
    pub profile: String,

    /// Auxiliary components (formatter, linter, ...)
    #[serde(default = "default_components")]
    pub components: Vec<String>,

    /// Install the toolchain during provisioning
    #[serde(default = "default_true")]
    pub install: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            profile: default_profile(),
            components: default_components(),
            install: true,
        }
    }
}

/// Dependency cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Dependency lock manifest, relative to the workspace
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// Workspace-relative paths holding dependency state
    #[serde(default = "default_cache_paths")]
    pub paths: Vec<String>,

    /// Prefix of every cache key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest: default_manifest(),
            paths: default_cache_paths(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, unique within the pipeline
    pub name: String,

    /// Optional step description
    #[serde(default)]
    pub description: Option<String>,

    /// One of the canonical cargo steps
    #[serde(default)]
    pub builtin: Option<BuiltinStep>,

    /// Explicit command line (first element is the executable)
    #[serde(default)]
    pub run: Option<Vec<String>>,

    /// Fail the step when its output reports warnings
    #[serde(default)]
    pub deny_warnings: Option<bool>,

    /// Pattern identifying a warning in step output
    #[serde(default)]
    pub warning_pattern: Option<String>,

    /// Whether `warning_pattern` is a regular expression
    #[serde(default)]
    pub use_regex: bool,

    /// Timeout for this step (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extra environment for this step
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Canonical steps of a Rust pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinStep {
    /// cargo fetch
    Fetch,
    /// cargo fmt --all -- --check
    Fmt,
    /// cargo build --all-targets
    Build,
    /// cargo clippy --all-targets -- -D warnings
    Clippy,
    /// cargo test --no-run
    TestBuild,
    /// cargo test
    Test,
}

impl BuiltinStep {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStep::Fetch => "fetch",
            BuiltinStep::Fmt => "fmt",
            BuiltinStep::Build => "build",
            BuiltinStep::Clippy => "clippy",
            BuiltinStep::TestBuild => "test-build",
            BuiltinStep::Test => "test",
        }
    }

    /// The step's command line
    pub fn command(&self) -> Vec<String> {
        let args: &[&str] = match self {
            BuiltinStep::Fetch => &["cargo", "fetch", "--locked"],
            BuiltinStep::Fmt => &["cargo", "fmt", "--all", "--", "--check"],
            BuiltinStep::Build => &["cargo", "build", "--all-targets", "--locked"],
            BuiltinStep::Clippy => &["cargo", "clippy", "--all-targets", "--locked", "--", "-D", "warnings"],
            BuiltinStep::TestBuild => &["cargo", "test", "--no-run", "--locked"],
            BuiltinStep::Test => &["cargo", "test", "--locked"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }

    /// Whether warnings are treated as errors by default
    pub fn denies_warnings(&self) -> bool {
        matches!(self, BuiltinStep::Clippy)
    }
}

fn default_true() -> bool {
    true
}

fn default_push_trigger() -> Option<PushTrigger> {
    Some(PushTrigger {
        branches: vec!["main".to_string()],
    })
}

fn default_channel() -> String {
    "stable".to_string()
}

fn default_profile() -> String {
    "minimal".to_string()
}

fn default_components() -> Vec<String> {
    vec!["rustfmt".to_string(), "clippy".to_string()]
}

fn default_manifest() -> String {
    "Cargo.lock".to_string()
}

fn default_cache_paths() -> Vec<String> {
    vec![
        "target".to_string(),
        ".cargo/registry".to_string(),
        ".cargo/git".to_string(),
    ]
}

fn default_key_prefix() -> String {
    "cargo".to_string()
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// The built-in Rust pipeline
    pub fn rust_default() -> Result<Self> {
        Self::from_yaml(DEFAULT_PIPELINE)
    }

    /// Load `path` if given, otherwise the built-in pipeline
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::rust_default(),
        }
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        let mut seen_names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                anyhow::bail!("Step names must not be empty");
            }
            if !seen_names.insert(&step.name) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }

            match (&step.builtin, &step.run) {
                (Some(_), Some(_)) => anyhow::bail!(
                    "Step '{}' sets both 'builtin' and 'run'",
                    step.name
                ),
                (None, None) => anyhow::bail!(
                    "Step '{}' needs either 'builtin' or 'run'",
                    step.name
                ),
                (None, Some(run)) if run.is_empty() || run[0].trim().is_empty() => {
                    anyhow::bail!("Step '{}' has an empty command", step.name)
                }
                _ => {}
            }

            if let Some(pattern) = &step.warning_pattern {
                if step.use_regex {
                    Regex::new(pattern).with_context(|| {
                        format!("Step '{}' has an invalid warning_pattern", step.name)
                    })?;
                }
            }

            if step.timeout_secs == Some(0) {
                anyhow::bail!("Step '{}' has a zero timeout", step.name);
            }
        }

        if self.default_timeout_secs == Some(0) {
            anyhow::bail!("Pipeline has a zero default_timeout_secs");
        }

        if self.toolchain.channel.trim().is_empty() {
            anyhow::bail!("Toolchain channel must not be empty");
        }

        if self.cache.enabled && self.cache.manifest.trim().is_empty() {
            anyhow::bail!("Cache is enabled but no manifest is configured");
        }

        for path in &self.cache.paths {
            let p = Path::new(path);
            if p.is_absolute() || p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
                anyhow::bail!("Cache path '{}' must be relative to the workspace", path);
            }
        }

        if let Some(push) = &self.triggers.push {
            if push.branches.iter().any(|b| b.trim().is_empty()) {
                anyhow::bail!("Push trigger branches must not be empty");
            }
        }

        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self)
    }
}
