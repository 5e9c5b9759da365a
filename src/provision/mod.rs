//! Environment provisioning - a clean, isolated context for each run

pub mod local;

use crate::core::{ExecutionContext, PipelineRun};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use local::{LocalProvisioner, WorkspaceMode};

/// Errors that stop a run before any step executes
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Source directory not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Checkout failed: {0}")]
    Checkout(String),

    #[error("Toolchain '{channel}' could not be installed: {message}")]
    Toolchain { channel: String, message: String },
}

/// Trait for building execution contexts
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Produce a fresh workspace and toolchain for `run`
    async fn provision(&self, run: &PipelineRun) -> Result<ExecutionContext, ProvisionError>;

    /// Release whatever `provision` created once the run is over
    async fn release(&self, _context: &ExecutionContext) {}
}
