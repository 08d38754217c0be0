//! Declarative multi-step pipelines
//!
//! A pipeline is an ordered list of steps, each claimed by an agent with a
//! given role. Step outputs accumulate in a shared context that later step
//! prompts can reference as `{step_0_output}` or `{last_output}`.

pub mod engine;
pub mod schema;
pub mod template;

use thiserror::Error;

pub use engine::PipelineEngine;
pub use schema::{
    PipelineDefinition, PipelineRun, PipelineStep, RunStatus, StepResult, StepStatus, load_pipeline_dir,
};
pub use template::{TemplateError, render};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown pipeline run: {0}")]
    UnknownRun(String),

    #[error("Pipeline run {run_id} is {actual}, expected {expected}")]
    InvalidTransition {
        run_id: String,
        actual: RunStatus,
        expected: RunStatus,
    },

    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("Failed to parse pipeline YAML: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}
