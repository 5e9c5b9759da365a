//! Local provisioner - snapshots a source tree and installs a rustup toolchain

use crate::core::{config::ToolchainConfig, ExecutionContext, Pipeline, PipelineRun, ToolchainInfo};
use crate::provision::{ProvisionError, Provisioner};
use crate::runner::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where steps run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceMode {
    /// Copy the source into `<root>/<run id>` and run there
    Snapshot { root: PathBuf },
    /// Run directly in the source directory
    InPlace,
}

/// Provisioner for a source tree on the local filesystem
pub struct LocalProvisioner<R> {
    source: PathBuf,
    mode: WorkspaceMode,
    excludes: Vec<String>,
    keep_workspace: bool,
    toolchain: ToolchainConfig,
    env: BTreeMap<String, String>,
    variables: HashMap<String, String>,
    install_timeout: Duration,
    runner: R,
}

impl<R: CommandRunner> LocalProvisioner<R> {
    /// Create a provisioner for `source` using the pipeline's toolchain and env
    pub fn new(source: impl Into<PathBuf>, pipeline: &Pipeline, runner: R) -> Self {
        Self {
            source: source.into(),
            mode: WorkspaceMode::InPlace,
            excludes: vec![".git".to_string(), "target".to_string()],
            keep_workspace: false,
            toolchain: pipeline.toolchain.clone(),
            env: pipeline.env.clone(),
            variables: pipeline.variables.clone(),
            install_timeout: Duration::from_secs(900),
            runner,
        }
    }

    pub fn with_mode(mut self, mode: WorkspaceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    /// Leave snapshot workspaces on disk after the run
    pub fn keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    async fn checkout(&self, run: &PipelineRun) -> Result<PathBuf, ProvisionError> {
        match &self.mode {
            WorkspaceMode::InPlace => Ok(self.source.clone()),
            WorkspaceMode::Snapshot { root } => {
                let workspace = root.join(run.id.to_string());
                let source = self.source.clone();
                let target = workspace.clone();
                let excludes = self.excludes.clone();

                let copied = tokio::task::spawn_blocking(move || {
                    snapshot_tree(&source, &target, &excludes)
                })
                .await
                .map_err(|e| ProvisionError::Checkout(e.to_string()))??;

                info!(
                    workspace = %workspace.display(),
                    files = copied,
                    "Snapshot of source tree created"
                );
                Ok(workspace)
            }
        }
    }

    async fn install_toolchain(&self, workspace: &Path) -> Result<Option<String>, ProvisionError> {
        let channel = &self.toolchain.channel;
        if !self.toolchain.install {
            debug!(channel = %channel, "Toolchain installation disabled");
            return Ok(None);
        }

        let mut argv = vec![
            "rustup".to_string(),
            "toolchain".to_string(),
            "install".to_string(),
            channel.clone(),
            "--profile".to_string(),
            self.toolchain.profile.clone(),
        ];
        if !self.toolchain.components.is_empty() {
            argv.push("--component".to_string());
            argv.push(self.toolchain.components.join(","));
        }

        info!(channel = %channel, profile = %self.toolchain.profile, "Installing toolchain");
        let install = CommandSpec::new(argv, workspace).with_timeout(self.install_timeout);
        let output = self
            .runner
            .run(&install)
            .await
            .map_err(|e| self.toolchain_error(e.to_string()))?;
        if !output.success() {
            return Err(self.toolchain_error(format!(
                "rustup exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let version_check = CommandSpec::new(
            vec!["rustc".to_string(), format!("+{}", channel), "--version".to_string()],
            workspace,
        )
        .with_timeout(Duration::from_secs(60));
        let output = self
            .runner
            .run(&version_check)
            .await
            .map_err(|e| self.toolchain_error(e.to_string()))?;
        if !output.success() {
            return Err(self.toolchain_error(format!(
                "rustc --version exited with code {}",
                output.exit_code
            )));
        }

        let version = output.stdout.trim().to_string();
        info!(version = %version, "Toolchain ready");
        Ok(Some(version))
    }

    fn toolchain_error(&self, message: String) -> ProvisionError {
        ProvisionError::Toolchain {
            channel: self.toolchain.channel.clone(),
            message,
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Provisioner for LocalProvisioner<R> {
    async fn provision(&self, run: &PipelineRun) -> Result<ExecutionContext, ProvisionError> {
        if !self.source.is_dir() {
            return Err(ProvisionError::SourceMissing(self.source.clone()));
        }

        // snapshot_tree removes its own partial output
        let workspace = self.checkout(run).await?;
        let version = match self.install_toolchain(&workspace).await {
            Ok(version) => version,
            Err(e) => {
                self.discard(&workspace).await;
                return Err(e);
            }
        };

        let toolchain = ToolchainInfo {
            channel: self.toolchain.channel.clone(),
            profile: self.toolchain.profile.clone(),
            components: self.toolchain.components.clone(),
            version,
        };

        let mut context = ExecutionContext::new(run.id, workspace, toolchain);
        context.env = self.env.clone();
        context.variables = self.variables.clone();
        context
            .metadata
            .insert("source".to_string(), self.source.display().to_string());
        context
            .metadata
            .insert("event".to_string(), run.event.to_string());

        Ok(context)
    }

    async fn release(&self, context: &ExecutionContext) {
        self.discard(&context.workspace).await;
    }
}

impl<R> LocalProvisioner<R> {
    /// Remove a snapshot workspace unless it is the source or must be kept
    async fn discard(&self, workspace: &Path) {
        if self.keep_workspace || self.mode == WorkspaceMode::InPlace {
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(workspace).await {
            warn!(workspace = %workspace.display(), "Failed to remove workspace: {}", e);
        }
    }
}

/// Copy `source` into `target`, skipping excluded relative paths.
///
/// Symlinks are recreated as links. A partially written `target` is removed
/// on failure. Returns the number of files and links copied.
fn snapshot_tree(source: &Path, target: &Path, excludes: &[String]) -> Result<usize, ProvisionError> {
    if target.exists() {
        return Err(ProvisionError::Checkout(format!(
            "workspace {} already exists",
            target.display()
        )));
    }
    std::fs::create_dir_all(target).map_err(|e| ProvisionError::Checkout(e.to_string()))?;

    copy_tree(source, target, excludes).inspect_err(|_| {
        if let Err(e) = std::fs::remove_dir_all(target) {
            warn!(workspace = %target.display(), "Failed to remove partial workspace: {}", e);
        }
    })
}

fn copy_tree(source: &Path, target: &Path, excludes: &[String]) -> Result<usize, ProvisionError> {
    let checkout_err = |path: &Path, e: &dyn std::fmt::Display| {
        ProvisionError::Checkout(format!("{}: {}", path.display(), e))
    };

    let excluded = |path: &Path| {
        path.strip_prefix(source)
            .map(|rel| excludes.iter().any(|ex| rel.starts_with(ex)))
            .unwrap_or(false)
    };

    let mut copied = 0;
    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !excluded(e.path()))
    {
        let entry = entry.map_err(|e| checkout_err(source, &e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| checkout_err(entry.path(), &e))?;
        let destination = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&destination).map_err(|e| checkout_err(entry.path(), &e))?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| checkout_err(entry.path(), &e))?;
        }
        if file_type.is_symlink() {
            copy_link(entry.path(), &destination).map_err(|e| checkout_err(entry.path(), &e))?;
        } else {
            std::fs::copy(entry.path(), &destination).map_err(|e| checkout_err(entry.path(), &e))?;
        }
        copied += 1;
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_link(link: &Path, destination: &Path) -> std::io::Result<()> {
    let points_to = std::fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, destination)
}

#[cfg(not(unix))]
fn copy_link(link: &Path, destination: &Path) -> std::io::Result<()> {
    std::fs::copy(link, destination).map(|_| ())
}
