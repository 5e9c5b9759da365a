//! Core domain models
//!
//! This module defines the fundamental data structures that represent
//! pipelines, triggers, steps, runs and their configuration.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod run;
pub mod state;
pub mod step;
pub mod trigger;

pub use context::*;
pub use pipeline::*;
pub use run::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
