//! Pipeline domain model

use crate::core::{
    config::{CacheConfig, PipelineConfig, ToolchainConfig},
    run::PipelineRun,
    step::{Step, StepDefaults},
    trigger::{Event, TriggerRule},
};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Admission rule for incoming events
    pub trigger: TriggerRule,

    pub toolchain: ToolchainConfig,

    pub cache: CacheConfig,

    /// Environment exported to every step
    pub env: BTreeMap<String, String>,

    /// Global variables available to all steps
    pub variables: HashMap<String, String>,

    /// Ordered steps, shared read-only with the executor
    steps: Arc<[Step]>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let defaults = StepDefaults {
            timeout_secs: config
                .default_timeout_secs
                .unwrap_or(StepDefaults::default().timeout_secs),
        };

        let steps = config
            .steps
            .iter()
            .enumerate()
            .map(|(index, step_config)| Step::from_config(index, step_config, &defaults))
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline {
            name: config.name.clone(),
            trigger: TriggerRule::from_config(&config.triggers),
            toolchain: config.toolchain.clone(),
            cache: config.cache.clone(),
            env: config.env.clone(),
            variables: config.variables.clone(),
            steps: steps.into(),
        })
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// A shared handle on the step list
    pub fn shared_steps(&self) -> Arc<[Step]> {
        Arc::clone(&self.steps)
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Whether `event` schedules a run of this pipeline
    pub fn admits(&self, event: &Event) -> bool {
        self.trigger.should_run(event)
    }

    /// Create a pending run for an admitted event
    pub fn new_run(&self, event: Event) -> PipelineRun {
        PipelineRun::new(self.name.clone(), event, self.steps.len())
    }
}
