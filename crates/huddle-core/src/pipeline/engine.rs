//! Sequential pipeline execution through the orchestrator

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::PipelineError;
use super::schema::{PipelineDefinition, PipelineRun, PipelineStep, RunStatus, StepResult, StepStatus};
use super::template::render;
use crate::orchestrator::Orchestrator;
use crate::types::{InboundMessage, MessageType, PIPELINE_CHANNEL};

struct RunSlot {
    run: PipelineRun,
    definition: Arc<PipelineDefinition>,
}

/// Runs pipelines step by step, each step claimed by the first registered
/// agent with the step's role. Runs are kept in memory for inspection and
/// for resuming after an approval gate.
pub struct PipelineEngine {
    orchestrator: Arc<Orchestrator>,
    runs: RwLock<HashMap<String, RunSlot>>,
}

impl PipelineEngine {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Start a run and execute until it completes, fails or pauses.
    ///
    /// `initial_context` is layered over the definition's own context.
    pub async fn start_pipeline(
        &self,
        definition: PipelineDefinition,
        channel_id: &str,
        initial_context: Option<Map<String, Value>>,
    ) -> Result<PipelineRun, PipelineError> {
        definition.validate()?;

        let mut context = definition.context.clone();
        if let Some(extra) = initial_context {
            context.extend(extra);
        }
        let run = PipelineRun::new(&definition.name, channel_id, context);
        let definition = Arc::new(definition);
        self.runs.write().await.insert(
            run.id.clone(),
            RunSlot {
                run: run.clone(),
                definition: definition.clone(),
            },
        );

        info!("Starting pipeline '{}' (run: {})", definition.name, run.id);
        Ok(self.execute(run, &definition, None).await)
    }

    /// Resume a paused run, approving the step it is waiting on
    pub async fn approve(&self, run_id: &str) -> Result<PipelineRun, PipelineError> {
        let (run, definition) = {
            let mut runs = self.runs.write().await;
            let slot = runs
                .get_mut(run_id)
                .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))?;
            expect_paused(&slot.run)?;
            slot.run.status = RunStatus::Running;
            (slot.run.clone(), slot.definition.clone())
        };

        let step = run.current_step;
        info!("Pipeline run {} approved at step {}", run_id, step);
        Ok(self.execute(run, &definition, Some(step)).await)
    }

    /// Fail a paused run without executing the step it is waiting on
    pub async fn reject(&self, run_id: &str, reason: &str) -> Result<PipelineRun, PipelineError> {
        let mut runs = self.runs.write().await;
        let slot = runs
            .get_mut(run_id)
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))?;
        expect_paused(&slot.run)?;

        let step_name = slot
            .definition
            .steps
            .get(slot.run.current_step)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        slot.run.step_results.push(StepResult {
            step: step_name,
            agent: None,
            status: StepStatus::Rejected,
            output: None,
            error: Some(reason.to_string()),
            attempts: 0,
        });
        slot.run.status = RunStatus::Failed;
        slot.run.finished_at = Some(Utc::now());
        warn!("Pipeline run {} rejected: {}", run_id, reason);
        Ok(slot.run.clone())
    }

    pub async fn get_run(&self, run_id: &str) -> Option<PipelineRun> {
        self.runs.read().await.get(run_id).map(|slot| slot.run.clone())
    }

    /// All known runs, oldest first
    pub async fn list_runs(&self) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self.runs.read().await.values().map(|slot| slot.run.clone()).collect();
        runs.sort_by_key(|run| run.started_at);
        runs
    }

    async fn execute(
        &self,
        mut run: PipelineRun,
        definition: &PipelineDefinition,
        approved_step: Option<usize>,
    ) -> PipelineRun {
        let total = definition.steps.len();
        for (i, step) in definition.steps.iter().enumerate().skip(run.current_step) {
            run.current_step = i;

            if step.requires_approval && approved_step != Some(i) {
                run.status = RunStatus::Paused;
                info!(
                    "Pipeline '{}' paused before step '{}' awaiting approval (run: {})",
                    definition.name, step.name, run.id
                );
                self.save(&run).await;
                return run;
            }

            info!("Pipeline step {}/{}: {}", i + 1, total, step.name);
            let result = self.run_step(definition, step, &run).await;
            let output = match (&result.status, &result.output) {
                (StepStatus::Completed, Some(output)) => Some(output.clone()),
                _ => None,
            };
            run.step_results.push(result);

            let Some(output) = output else {
                run.status = RunStatus::Failed;
                break;
            };
            run.context.insert(format!("step_{}_output", i), Value::String(output.clone()));
            run.context.insert("last_output".to_string(), Value::String(output));
            self.save(&run).await;
        }

        if run.status == RunStatus::Running {
            run.status = RunStatus::Completed;
        }
        run.finished_at = Some(Utc::now());
        info!(
            "Pipeline '{}' {} ({} steps)",
            definition.name,
            run.status,
            run.step_results.len()
        );
        self.save(&run).await;
        run
    }

    async fn run_step(&self, definition: &PipelineDefinition, step: &PipelineStep, run: &PipelineRun) -> StepResult {
        let Some(agent) = self.orchestrator.find_agent_by_role(&step.agent_role).await else {
            error!("No agent for role '{}'", step.agent_role);
            return StepResult::failed(
                &step.name,
                None,
                format!("No agent with role '{}' available", step.agent_role),
                0,
            );
        };

        let prompt = match render(&step.prompt, &run.context) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!("Step '{}' prompt could not be rendered: {}", step.name, e);
                return StepResult::failed(&step.name, Some(&agent.name), e.to_string(), 0);
            }
        };
        let content = format!("[Pipeline: {}, Step: {}]\n\n{}", definition.name, step.name, prompt);

        let attempts = step.retry_count.saturating_add(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let msg = InboundMessage::new(PIPELINE_CHANNEL, PIPELINE_CHANNEL, &run.channel_id, &content)
                .with_mentions(vec![agent.name.clone()])
                .with_owner(&agent.record.id);

            let dispatch = self.orchestrator.process_message(msg);
            match tokio::time::timeout(Duration::from_secs(step.timeout_seconds), dispatch).await {
                Ok(responses) => match responses.first() {
                    Some(reply)
                        if !reply.is_error()
                            && reply.message_type() != MessageType::System
                            && !reply.content().trim().is_empty() =>
                    {
                        return StepResult::completed(&step.name, &agent.name, reply.content(), attempt);
                    }
                    Some(reply) => {
                        last_error = reply.content().to_string();
                        error!("Step '{}' failed (attempt {}): {}", step.name, attempt, last_error);
                    }
                    None => {
                        last_error = "no response".to_string();
                        error!("Step '{}' got no response (attempt {})", step.name, attempt);
                    }
                },
                Err(_) => {
                    last_error = format!("timed out after {}s", step.timeout_seconds);
                    warn!("Step '{}' timed out (attempt {})", step.name, attempt);
                }
            }
        }

        StepResult::failed(&step.name, Some(&agent.name), last_error, attempts)
    }

    async fn save(&self, run: &PipelineRun) {
        if let Some(slot) = self.runs.write().await.get_mut(&run.id) {
            slot.run = run.clone();
        }
    }
}

fn expect_paused(run: &PipelineRun) -> Result<(), PipelineError> {
    if run.status == RunStatus::Paused {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition {
            run_id: run.id.clone(),
            actual: run.status,
            expected: RunStatus::Paused,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentFactory, AgentReply, AgentRequest, AgentRunner, TokenUsage};
    use crate::context::AgentIdentity;
    use crate::orchestrator::OrchestratorConfig;
    use crate::store::{AgentRecord, MemoryStore, Store};
    use crate::tools::ToolRegistry;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Behaviour is picked from the agent's role
    struct MockAgent {
        name: String,
        role: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentRunner for MockAgent {
        async fn process(&self, request: AgentRequest) -> Result<AgentReply> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.role.as_str() {
                "qa" => bail!("tests are red"),
                "flaky" if call == 0 => bail!("transient failure"),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    bail!("unreachable")
                }
                _ => {}
            }
            let prompt = request.content.split("\n\n").last().unwrap_or_default().to_string();
            Ok(AgentReply {
                content: format!("{} did: {}", self.name, prompt),
                usage: TokenUsage::default(),
                model: "mock".to_string(),
            })
        }

        fn tool_names(&self) -> Vec<String> {
            Vec::new()
        }

        fn stop(&self) {}
    }

    struct MockFactory;

    impl AgentFactory for MockFactory {
        fn default_tools(&self) -> ToolRegistry {
            ToolRegistry::new()
        }

        fn create(
            &self,
            record: &AgentRecord,
            _identity: AgentIdentity,
            _tools: ToolRegistry,
        ) -> Result<Arc<dyn AgentRunner>> {
            Ok(Arc::new(MockAgent {
                name: record.name.clone(),
                role: record.role.clone(),
                calls: AtomicUsize::new(0),
            }))
        }
    }

    async fn engine(agents: &[(&str, &str)]) -> PipelineEngine {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::new(store.clone(), Arc::new(MockFactory), OrchestratorConfig::default());
        for (name, role) in agents {
            let record = store.create_agent(AgentRecord::new(*name, *role)).await.unwrap();
            orch.register_agent(record).await.unwrap();
        }
        PipelineEngine::new(Arc::new(orch))
    }

    fn three_steps(last_role: &str) -> PipelineDefinition {
        PipelineDefinition::new(
            "release",
            vec![
                PipelineStep::new("plan", "planner", "Plan {feature}"),
                PipelineStep::new("build", "developer", "Build from {step_0_output}"),
                PipelineStep::new("verify", last_role, "Verify {last_output}"),
            ],
        )
    }

    fn context() -> Option<Map<String, Value>> {
        json!({"feature": "search"}).as_object().cloned()
    }

    #[tokio::test]
    async fn test_all_steps_complete() {
        let engine = engine(&[("Max", "planner"), ("Ada", "developer"), ("Rex", "reviewer")]).await;
        let run = engine
            .start_pipeline(three_steps("reviewer"), "general", context())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results.len(), 3);
        assert_eq!(run.context["step_0_output"], "Max did: Plan search");
        assert_eq!(run.context["step_1_output"], "Ada did: Build from Max did: Plan search");
        assert!(run.context.contains_key("step_2_output"));
        assert_eq!(run.last_output(), run.step_results[2].output.as_deref());
        assert_eq!(run.step_results[1].agent.as_deref(), Some("Ada"));
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_step_stops_run() {
        let engine = engine(&[("Max", "planner"), ("Ada", "developer"), ("Quinn", "qa")]).await;
        let run = engine.start_pipeline(three_steps("qa"), "general", context()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.current_step, 2);
        assert_eq!(run.step_results.len(), 3);
        assert_eq!(run.step_results[0].status, StepStatus::Completed);
        assert_eq!(run.step_results[1].status, StepStatus::Completed);

        let failed = &run.step_results[2];
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert_eq!(failed.agent.as_deref(), Some("Quinn"));
        assert!(failed.error.as_deref().unwrap().contains("tests are red"));
        assert!(!run.context.contains_key("step_2_output"));
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let engine = engine(&[("Flo", "flaky")]).await;
        let def = PipelineDefinition::new("retry", vec![PipelineStep::new("try", "flaky", "go")]);
        let run = engine.start_pipeline(def, "general", None).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_missing_role_fails_without_retry() {
        let engine = engine(&[("Max", "planner")]).await;
        let run = engine
            .start_pipeline(three_steps("reviewer"), "general", context())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.current_step, 1);
        assert_eq!(run.step_results.len(), 2);
        assert_eq!(run.step_results[1].attempts, 0);
        assert!(run.step_results[1].agent.is_none());
        assert!(run.step_results[1].error.as_deref().unwrap().contains("No agent with role 'developer'"));
    }

    #[tokio::test]
    async fn test_missing_template_key_fails_step() {
        let engine = engine(&[("Max", "planner"), ("Ada", "developer"), ("Rex", "reviewer")]).await;
        let run = engine.start_pipeline(three_steps("reviewer"), "general", None).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.current_step, 0);
        assert_eq!(run.step_results[0].attempts, 0);
        assert!(run.step_results[0].error.as_deref().unwrap().contains("feature"));
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let engine = engine(&[("Sid", "slow")]).await;
        let step = PipelineStep::new("wait", "slow", "hurry").with_timeout(1).with_retries(0);
        let run = engine
            .start_pipeline(PipelineDefinition::new("slow", vec![step]), "general", None)
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.step_results[0].error.as_deref(), Some("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_approval_gate() {
        let engine = engine(&[("Max", "planner"), ("Ada", "developer")]).await;
        let def = PipelineDefinition::new(
            "gated",
            vec![
                PipelineStep::new("plan", "planner", "Plan it"),
                PipelineStep::new("ship", "developer", "Ship {last_output}").with_approval(),
            ],
        );

        let paused = engine.start_pipeline(def.clone(), "general", None).await.unwrap();
        assert_eq!(paused.status, RunStatus::Paused);
        assert_eq!(paused.current_step, 1);
        assert_eq!(paused.step_results.len(), 1);
        assert_eq!(engine.get_run(&paused.id).await.unwrap().status, RunStatus::Paused);

        let done = engine.approve(&paused.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.step_results.len(), 2);
        assert!(matches!(
            engine.approve(&paused.id).await,
            Err(PipelineError::InvalidTransition { .. })
        ));

        let second = engine.start_pipeline(def, "general", None).await.unwrap();
        let rejected = engine.reject(&second.id, "not today").await.unwrap();
        assert_eq!(rejected.status, RunStatus::Failed);
        assert_eq!(rejected.step_results[1].status, StepStatus::Rejected);
        assert_eq!(rejected.step_results[1].step, "ship");

        assert_eq!(engine.list_runs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let engine = engine(&[]).await;
        assert!(matches!(engine.approve("nope").await, Err(PipelineError::UnknownRun(_))));
        assert!(matches!(engine.reject("nope", "x").await, Err(PipelineError::UnknownRun(_))));
        assert!(engine.get_run("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_definition_rejected() {
        let engine = engine(&[]).await;
        let result = engine
            .start_pipeline(PipelineDefinition::new("empty", vec![]), "general", None)
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidDefinition(_))));
    }
}
