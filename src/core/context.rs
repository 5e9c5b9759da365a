//! Execution context - the shared, mutable state of one run

use crate::core::step::{render_template, Step};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Toolchain provisioned for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainInfo {
    pub channel: String,
    pub profile: String,
    pub components: Vec<String>,

    /// Resolved compiler version, when known
    pub version: Option<String>,
}

/// Execution context for a pipeline run
///
/// Every step runs against the same context, so whatever one step leaves in
/// the workspace (fetched dependencies, build artifacts) is visible to the
/// steps after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Run this context belongs to
    pub run_id: Uuid,

    /// Root of the isolated workspace
    pub workspace: PathBuf,

    pub toolchain: ToolchainInfo,

    /// Environment exported to every step (values may use `{{ variable }}`)
    pub env: BTreeMap<String, String>,

    /// Global and user-defined variables
    pub variables: HashMap<String, String>,

    /// Output tails of completed steps (step name -> output)
    pub step_outputs: HashMap<String, String>,

    /// The step currently executing (if any)
    pub current_step: Option<String>,

    /// Metadata about the execution
    pub metadata: HashMap<String, String>,
}

impl ExecutionContext {
    /// Create a context rooted at `workspace`
    pub fn new(run_id: Uuid, workspace: impl Into<PathBuf>, toolchain: ToolchainInfo) -> Self {
        Self {
            run_id,
            workspace: workspace.into(),
            toolchain,
            env: BTreeMap::new(),
            variables: HashMap::new(),
            step_outputs: HashMap::new(),
            current_step: None,
            metadata: HashMap::new(),
        }
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: String, value: String) {
        self.variables.insert(key, value);
    }

    /// Get a variable
    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    /// Set the output of a step
    pub fn set_step_output(&mut self, step: &str, output: String) {
        self.step_outputs.insert(step.to_string(), output);
    }

    /// Get the output of a step
    pub fn get_step_output(&self, step: &str) -> Option<&String> {
        self.step_outputs.get(step)
    }

    /// Resolve a workspace-relative path
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.workspace.join(relative)
    }

    /// Get all variables available for substitution
    pub fn get_rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();

        vars.insert("workspace".to_string(), self.workspace.display().to_string());
        vars.insert("toolchain".to_string(), self.toolchain.channel.clone());
        if let Some(version) = &self.toolchain.version {
            vars.insert("toolchain_version".to_string(), version.clone());
        }
        vars.insert("run_id".to_string(), self.run_id.to_string());

        for (step, output) in &self.step_outputs {
            vars.insert(format!("steps.{}.output", step), output.clone());
        }

        if let Some(ref current_step) = self.current_step {
            vars.insert("current_step".to_string(), current_step.clone());
        }

        vars
    }

    /// The full environment for `step`: toolchain selection, pipeline env,
    /// then step env, all rendered
    pub fn step_env(&self, step: &Step) -> BTreeMap<String, String> {
        let vars = self.get_rendering_variables();

        let mut env = BTreeMap::new();
        env.insert("RUSTUP_TOOLCHAIN".to_string(), self.toolchain.channel.clone());
        for (key, value) in &self.env {
            env.insert(key.clone(), render_template(value, &vars));
        }
        env.extend(step.render_env(&vars));
        env
    }
}
