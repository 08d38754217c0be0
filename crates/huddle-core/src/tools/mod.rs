//! Tool registry and role permissions

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::providers::types::ToolDefinition;

pub mod team;
pub mod workspace;

/// Who is calling a tool and where.
///
/// Built fresh for every agent invocation and passed into each tool call, so
/// tools never hold per-conversation state.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Origin tag of the message being handled (`web`, `cli`, `pipeline`)
    pub origin: String,
    /// Channel the conversation happens in
    pub channel_id: String,
    pub agent_id: String,
    pub agent_name: String,
}

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String>;
}

/// Per-agent set of tools, kept in name order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler, replacing any tool with the same name
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, handler);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Take over every tool from `other`, replacing same-named ones
    pub fn merge(&mut self, other: ToolRegistry) {
        self.tools.extend(other.tools);
    }

    /// Drop every tool whose name is not in `allowed`
    pub fn retain(&mut self, allowed: &[&str]) {
        self.tools.retain(|name, _| allowed.contains(&name.as_str()));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions advertised to the model
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|handler| ToolDefinition {
                name: handler.name().to_string(),
                description: handler.description().to_string(),
                input_schema: handler.input_schema(),
            })
            .collect()
    }

    /// Run `tool_name` for the agent in `ctx`. A name outside this registry is
    /// an error, so an agent can never reach a tool its role does not allow.
    pub async fn execute(&self, tool_name: &str, ctx: &ToolContext, input: Value) -> Result<String> {
        let handler = self
            .tools
            .get(tool_name)
            .ok_or_else(|| anyhow!("Tool '{}' is not available to {}", tool_name, ctx.agent_name))?;
        debug!("{} runs {} in {}", ctx.agent_name, tool_name, ctx.channel_id);

        handler
            .execute(ctx, input)
            .await
            .inspect_err(|e| warn!("Tool {} failed for {}: {}", tool_name, ctx.agent_name, e))
    }
}

/// Tools each role may use. Unknown roles get nothing.
pub fn allowed_tools(role: &str) -> &'static [&'static str] {
    match role {
        "coordinator" => &["delegate", "message", "log_update"],
        "developer" => &[
            "read_file",
            "write_file",
            "edit_file",
            "list_dir",
            "exec",
            "web_search",
            "web_fetch",
            "log_update",
        ],
        "reviewer" => &["read_file", "list_dir", "web_search", "web_fetch", "log_update"],
        "planner" => &[
            "create_doc",
            "edit_doc",
            "query_docs",
            "create_task",
            "complete_task",
            "read_file",
            "list_dir",
            "log_update",
        ],
        "researcher" => &[
            "read_file",
            "list_dir",
            "web_search",
            "web_fetch",
            "query_docs",
            "log_update",
        ],
        "documenter" => &[
            "create_doc",
            "edit_doc",
            "query_docs",
            "read_file",
            "list_dir",
            "log_update",
        ],
        _ => &[],
    }
}

/// Helper function to create a JSON schema for tool input
pub fn json_schema(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Required string argument
pub(crate) fn str_arg<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("Missing '{}' parameter", key))
}
