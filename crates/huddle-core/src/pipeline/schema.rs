//! Pipeline definitions and run state

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::PipelineError;

fn default_timeout_seconds() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStep {
    pub name: String,
    /// Role of the agent that claims this step, e.g. `developer`
    pub agent_role: String,
    /// Prompt template with `{key}` placeholders filled from the run context
    pub prompt: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Extra attempts after the first one fails
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Pause the run before this step until a human approves it
    #[serde(default)]
    pub requires_approval: bool,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, agent_role: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_role: agent_role.into(),
            prompt: prompt.into(),
            timeout_seconds: default_timeout_seconds(),
            retry_count: default_retry_count(),
            requires_approval: false,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<PipelineStep>,
    /// Initial run context
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<PipelineStep>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
            context: Map::new(),
        }
    }

    /// Parse and validate a YAML definition
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let definition: Self = serde_yml::from_str(yaml)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidDefinition("pipeline name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(PipelineError::InvalidDefinition(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "step {} of '{}' has no name",
                    i, self.name
                )));
            }
            if step.agent_role.trim().is_empty() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "step '{}' of '{}' has no agent_role",
                    step.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Load every `*.yaml`/`*.yml` definition in `dir`, sorted by file name.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_pipeline_dir(dir: &Path) -> Result<Vec<PipelineDefinition>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read pipeline directory {}", dir.display()))?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        let yaml = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match PipelineDefinition::from_yaml(&yaml) {
            Ok(def) => {
                debug!("Loaded pipeline '{}' from {}", def.name, path.display());
                definitions.push(def);
            }
            Err(e) => warn!("Skipping pipeline {}: {}", path.display(), e),
        }
    }
    Ok(definitions)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl StepResult {
    pub fn completed(step: &str, agent: &str, output: impl Into<String>, attempts: u32) -> Self {
        Self {
            step: step.to_string(),
            agent: Some(agent.to_string()),
            status: StepStatus::Completed,
            output: Some(output.into()),
            error: None,
            attempts,
        }
    }

    pub fn failed(step: &str, agent: Option<&str>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            step: step.to_string(),
            agent: agent.map(str::to_string),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// One execution of a [`PipelineDefinition`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub pipeline_name: String,
    pub channel_id: String,
    pub current_step: usize,
    pub status: RunStatus,
    pub context: Map<String, Value>,
    pub step_results: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>, channel_id: impl Into<String>, context: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline_name: pipeline_name.into(),
            channel_id: channel_id.into(),
            current_step: 0,
            status: RunStatus::Running,
            context,
            step_results: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn last_output(&self) -> Option<&str> {
        self.context.get("last_output").and_then(Value::as_str)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REVIEW_PIPELINE: &str = r#"
name: feature
description: Build and review a feature
context:
  feature: login page
steps:
  - name: implement
    agent_role: developer
    prompt: "Implement {feature}"
  - name: review
    agent_role: reviewer
    prompt: "Review this: {last_output}"
    timeout_seconds: 60
    retry_count: 0
    requires_approval: true
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let def = PipelineDefinition::from_yaml(REVIEW_PIPELINE).unwrap();
        assert_eq!(def.name, "feature");
        assert_eq!(def.context["feature"], "login page");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].timeout_seconds, 300);
        assert_eq!(def.steps[0].retry_count, 1);
        assert!(!def.steps[0].requires_approval);
        assert_eq!(def.steps[1].timeout_seconds, 60);
        assert_eq!(def.steps[1].retry_count, 0);
        assert!(def.steps[1].requires_approval);
    }

    #[test]
    fn test_validation_rejects_empty_pipelines() {
        let err = PipelineDefinition::from_yaml("name: empty\nsteps: []\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDefinition(_)));

        let def = PipelineDefinition::new("p", vec![PipelineStep::new("s", " ", "do it")]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_from_yaml_rejects_missing_fields() {
        let err = PipelineDefinition::from_yaml("name: broken\nsteps:\n  - name: a\n").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn test_load_pipeline_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.yaml"), REVIEW_PIPELINE).unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "name: docs\nsteps:\n  - name: write\n    agent_role: documenter\n    prompt: Write docs\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "name: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let defs = load_pipeline_dir(dir.path()).unwrap();
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "feature"]);
    }

    #[test]
    fn test_run_serializes_status_lowercase() {
        let run = PipelineRun::new("p", "general", Map::new());
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["current_step"], 0);
    }
}
