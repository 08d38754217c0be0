//! Per-agent execution units
//!
//! The orchestrator only sees [`AgentRunner`]: message text and a session key
//! in, response text plus token usage out. [`LlmAgent`] is the bundled
//! implementation, running a bounded tool loop over an [`LlmProvider`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{AgentIdentity, build_system_prompt};
use crate::providers::types::{ChatRequest, LlmProvider, Part, Turn};
use crate::store::AgentRecord;
use crate::tools::workspace::workspace_tools;
use crate::tools::{ToolContext, ToolRegistry};

/// Upper bound on model round trips for a single message
pub const MAX_TOOL_ITERATIONS: usize = 20;
const MAX_TOOL_OUTPUT: usize = 100_000;
/// Messages kept per session; older turns are dropped from the front
const MAX_HISTORY_MESSAGES: usize = 40;

/// Token usage reported for one processed message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, input: u32, output: u32) {
        self.input_tokens += u64::from(input);
        self.output_tokens += u64::from(output);
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One unit of work for an agent
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub content: String,
    /// Selects the conversation memory, `<chat_id>:<agent>`
    pub session_key: String,
    pub context: ToolContext,
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that produced the reply
    pub model: String,
}

/// Execution unit owned by one agent registration
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn process(&self, request: AgentRequest) -> Result<AgentReply>;

    /// Names of the tools this agent may call
    fn tool_names(&self) -> Vec<String>;

    /// Refuse further work. In-flight calls are allowed to finish.
    fn stop(&self);
}

/// Builds runners for the orchestrator
pub trait AgentFactory: Send + Sync {
    /// Tools every agent starts with before role filtering
    fn default_tools(&self) -> ToolRegistry;

    fn create(
        &self,
        record: &AgentRecord,
        identity: AgentIdentity,
        tools: ToolRegistry,
    ) -> Result<Arc<dyn AgentRunner>>;
}

/// LLM-backed agent with per-session history
pub struct LlmAgent {
    identity: AgentIdentity,
    model: String,
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    sessions: Mutex<HashMap<String, Vec<Turn>>>,
    cancel: CancellationToken,
}

impl LlmAgent {
    pub fn new(
        identity: AgentIdentity,
        model: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            identity,
            model: model.into(),
            provider,
            tools,
            sessions: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    async fn run_tool_loop(
        &self,
        conversation: &mut Vec<Turn>,
        system: &str,
        ctx: &ToolContext,
    ) -> Result<(String, TokenUsage)> {
        let definitions = self.tools.definitions();
        let mut usage = TokenUsage::default();

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            debug!("{} tool loop iteration {}", self.identity.name, iteration);
            let response = self
                .provider
                .chat(ChatRequest {
                    model: &self.model,
                    system,
                    turns: conversation.as_slice(),
                    tools: &definitions,
                })
                .await?;
            usage.add(response.usage.input_tokens, response.usage.output_tokens);

            let calls = response.tool_uses();
            if calls.is_empty() {
                let text = response.text();
                if text.trim().is_empty() {
                    return Err(anyhow!("Model returned no text"));
                }
                conversation.push(Turn::assistant(vec![Part::Text { text: text.clone() }]));
                return Ok((text, usage));
            }

            conversation.push(Turn::assistant(response.parts));
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                info!("{} calling tool {}", self.identity.name, call.name);
                let output = self
                    .tools
                    .execute(&call.name, ctx, call.input)
                    .await
                    .unwrap_or_else(|e| format!("Error: {}", e));
                results.push(Part::ToolResult {
                    tool_use_id: call.id,
                    content: truncate_output(output),
                });
            }
            conversation.push(Turn::tool_results(results));
        }

        warn!(
            "{} hit the tool loop limit ({})",
            self.identity.name, MAX_TOOL_ITERATIONS
        );
        Err(anyhow!("Tool loop exceeded maximum iterations"))
    }
}

fn truncate_output(mut output: String) -> String {
    if output.len() <= MAX_TOOL_OUTPUT {
        return output;
    }
    let mut end = MAX_TOOL_OUTPUT;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output.truncate(end);
    output.push_str("\n[Output truncated]");
    output
}

#[async_trait]
impl AgentRunner for LlmAgent {
    async fn process(&self, request: AgentRequest) -> Result<AgentReply> {
        if self.cancel.is_cancelled() {
            return Err(anyhow!("Agent {} is stopped", self.identity.name));
        }

        let mut conversation = {
            let sessions = self.sessions.lock().await;
            sessions.get(&request.session_key).cloned().unwrap_or_default()
        };
        conversation.push(Turn::user(request.content.clone()));

        let system = build_system_prompt(&self.identity, Some(&request.session_key));
        let (content, usage) = self
            .run_tool_loop(&mut conversation, &system, &request.context)
            .await?;

        if conversation.len() > MAX_HISTORY_MESSAGES {
            let excess = conversation.len() - MAX_HISTORY_MESSAGES;
            conversation.drain(..excess);
            // History must open on a prompt, never on a tool result or reply
            while conversation.first().is_some_and(|t| !t.is_user_prompt()) {
                conversation.remove(0);
            }
        }
        self.sessions
            .lock()
            .await
            .insert(request.session_key, conversation);

        Ok(AgentReply {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    fn tool_names(&self) -> Vec<String> {
        self.tools.tool_names()
    }

    fn stop(&self) {
        info!("Stopping agent {}", self.identity.name);
        self.cancel.cancel();
    }
}

/// Creates [`LlmAgent`]s sharing one provider and workspace
pub struct LlmAgentFactory {
    provider: Arc<dyn LlmProvider>,
    workspace: PathBuf,
}

impl LlmAgentFactory {
    pub fn new(provider: Arc<dyn LlmProvider>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            workspace: workspace.into(),
        }
    }
}

impl AgentFactory for LlmAgentFactory {
    fn default_tools(&self) -> ToolRegistry {
        workspace_tools(self.workspace.clone())
    }

    fn create(
        &self,
        record: &AgentRecord,
        identity: AgentIdentity,
        tools: ToolRegistry,
    ) -> Result<Arc<dyn AgentRunner>> {
        let model = record
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());
        debug!("Creating LLM agent {} on model {}", record.name, model);
        Ok(Arc::new(LlmAgent::new(identity, model, self.provider.clone(), tools)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::{ChatResponse, ChatUsage, StopReason};
    use crate::tools::{ToolHandler, json_schema};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Provider that replays a fixed script of responses
    struct ScriptedProvider {
        script: StdMutex<VecDeque<ChatResponse>>,
        seen: StdMutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<ChatResponse>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
            self.seen.lock().unwrap().push(request.turns.len());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input"
        }

        fn input_schema(&self) -> Value {
            json_schema(serde_json::json!({"text": {"type": "string"}}), vec!["text"])
        }

        async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
            Ok(format!("{} says {}", ctx.agent_name, input["text"].as_str().unwrap_or_default()))
        }
    }

    fn text(t: &str) -> ChatResponse {
        ChatResponse {
            parts: vec![Part::Text { text: t.to_string() }],
            stop_reason: StopReason::EndTurn,
            usage: ChatUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        }
    }

    fn tool_call() -> ChatResponse {
        ChatResponse {
            parts: vec![Part::ToolUse {
                id: "tu_1".to_string(),
                name: "echo".to_string(),
                input: serde_json::json!({"text": "hi"}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: ChatUsage {
                input_tokens: 7,
                output_tokens: 3,
            },
        }
    }

    fn request(session: &str) -> AgentRequest {
        AgentRequest {
            content: "hello".to_string(),
            session_key: session.to_string(),
            context: ToolContext {
                agent_name: "Ada".to_string(),
                ..Default::default()
            },
        }
    }

    fn agent(provider: Arc<ScriptedProvider>) -> LlmAgent {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        LlmAgent::new(AgentIdentity::new("Ada", "developer"), "m", provider, tools)
    }

    #[tokio::test]
    async fn test_tool_loop_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_call(), text("done")]));
        let agent = agent(provider.clone());

        let reply = agent.process(request("s1")).await.unwrap();
        assert_eq!(reply.content, "done");
        assert_eq!(reply.usage.total(), 25);
        assert_eq!(reply.model, "m");
        // user, then user + assistant tool call + tool result
        assert_eq!(*provider.seen.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_history_is_per_session() {
        let provider = Arc::new(ScriptedProvider::new(vec![text("a"), text("b"), text("c")]));
        let agent = agent(provider.clone());

        agent.process(request("s1")).await.unwrap();
        agent.process(request("s1")).await.unwrap();
        agent.process(request("s2")).await.unwrap();
        assert_eq!(*provider.seen.lock().unwrap(), vec![1, 3, 1]);
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let script = (0..MAX_TOOL_ITERATIONS).map(|_| tool_call()).collect();
        let agent = agent(Arc::new(ScriptedProvider::new(script)));
        let err = agent.process(request("s1")).await.unwrap_err();
        assert!(err.to_string().contains("maximum iterations"));
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        let long = "é".repeat(MAX_TOOL_OUTPUT);
        let cut = truncate_output(long);
        assert!(cut.ends_with("[Output truncated]"));
        assert!(cut.len() <= MAX_TOOL_OUTPUT + "\n[Output truncated]".len());
        assert_eq!(truncate_output("short".to_string()), "short");
    }

    #[tokio::test]
    async fn test_stopped_agent_refuses_work() {
        let agent = agent(Arc::new(ScriptedProvider::new(vec![text("x")])));
        agent.stop();
        assert!(agent.process(request("s1")).await.is_err());
    }

    #[test]
    fn test_factory_uses_record_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let factory = LlmAgentFactory::new(provider, "/tmp");
        assert!(factory.default_tools().get("read_file").is_some());

        let mut record = AgentRecord::new("Ada", "developer");
        record.model = Some("custom".to_string());
        let runner = factory
            .create(&record, AgentIdentity::new("Ada", "developer"), ToolRegistry::new())
            .unwrap();
        assert!(runner.tool_names().is_empty());
    }
}
