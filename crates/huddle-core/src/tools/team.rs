//! Team collaboration tools backed by the store and the message bus

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{ToolContext, ToolHandler, ToolRegistry, json_schema, str_arg};
use crate::bus::MessageBus;
use crate::incentives::PerformanceTracker;
use crate::router::same_agent_name;
use crate::store::{AgentUpdate, Document, Store, Task};
use crate::types::{InboundMessage, OutboundMessage, SenderAgent};

/// Every team tool wired to the given collaborators
pub fn team_tools(store: Arc<dyn Store>, bus: Option<Arc<MessageBus>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(LogUpdateTool::new(store.clone())));
    registry.register(Arc::new(CreateTaskTool::new(store.clone())));
    registry.register(Arc::new(CompleteTaskTool::new(store.clone())));
    registry.register(Arc::new(CreateDocTool::new(store.clone())));
    registry.register(Arc::new(EditDocTool::new(store.clone())));
    registry.register(Arc::new(QueryDocsTool::new(store.clone())));
    registry.register(Arc::new(DelegateTool::new(store, bus.clone())));
    registry.register(Arc::new(MessageTool::new(bus)));
    registry
}

fn require_channel(ctx: &ToolContext) -> Result<&str> {
    if ctx.channel_id.is_empty() {
        return Err(anyhow!("No channel context set"));
    }
    Ok(&ctx.channel_id)
}

fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Records an activity summary used in standup reports
pub struct LogUpdateTool {
    store: Arc<dyn Store>,
}

impl LogUpdateTool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for LogUpdateTool {
    fn name(&self) -> &str {
        "log_update"
    }

    fn description(&self) -> &str {
        "Log a progress update or activity summary. These logs are used for @here standup reports."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "summary": {
                    "type": "string",
                    "description": "A concise summary of what you did or accomplished"
                }
            }),
            vec!["summary"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let summary = str_arg(&input, "summary")?;
        let channel_id = require_channel(ctx)?;
        self.store
            .create_update(AgentUpdate::new(&ctx.agent_id, channel_id, summary))
            .await
            .context("Failed to log update")?;
        debug!("{} logged an update in {}", ctx.agent_name, channel_id);
        Ok(format!("Update logged: {}", preview(summary, 100)))
    }
}

pub struct CreateTaskTool {
    store: Arc<dyn Store>,
}

impl CreateTaskTool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CreateTaskTool {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "Create a new task and optionally assign it to an agent."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "title": { "type": "string", "description": "Task title" },
                "description": { "type": "string", "description": "Task description" },
                "assigned_to": { "type": "string", "description": "Agent ID to assign to (optional)" },
                "priority": {
                    "type": "integer",
                    "description": "Priority (0=low, 1=medium, 2=high)",
                    "minimum": 0,
                    "maximum": 2
                }
            }),
            vec!["title"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let mut task = Task::new(str_arg(&input, "title")?);
        task.channel_id = (!ctx.channel_id.is_empty()).then(|| ctx.channel_id.clone());
        task.description = input.get("description").and_then(|v| v.as_str()).map(str::to_string);
        task.assigned_to = input.get("assigned_to").and_then(|v| v.as_str()).map(str::to_string);
        task.priority = input
            .get("priority")
            .and_then(|v| v.as_i64())
            .map(|p| p.clamp(0, 2) as i32)
            .unwrap_or(0);

        let task = self.store.create_task(task).await.context("Failed to create task")?;
        let assigned = task
            .assigned_to
            .as_deref()
            .map(|a| format!(", assigned to {}", a))
            .unwrap_or_default();
        Ok(format!("Task created: '{}' (id: {}{})", task.title, task.id, assigned))
    }
}

/// Marks a task done and credits the assignee's performance history
pub struct CompleteTaskTool {
    store: Arc<dyn Store>,
    tracker: PerformanceTracker,
}

impl CompleteTaskTool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            tracker: PerformanceTracker::new(store.clone()),
            store,
        }
    }
}

#[async_trait]
impl ToolHandler for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark a task as completed, optionally with a quality score."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "task_id": { "type": "string", "description": "Task ID to complete" },
                "quality_score": {
                    "type": "number",
                    "description": "Quality score (0.0-1.0)",
                    "minimum": 0.0,
                    "maximum": 1.0
                }
            }),
            vec!["task_id"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let task_id = str_arg(&input, "task_id")?;
        let quality = input
            .get("quality_score")
            .and_then(|v| v.as_f64())
            .map(|q| q.clamp(0.0, 1.0));

        let Some(task) = self
            .store
            .complete_task(task_id, quality)
            .await
            .context("Failed to complete task")?
        else {
            return Ok(format!("Error: Task '{}' not found", task_id));
        };

        let credited = task.assigned_to.as_deref().unwrap_or(&ctx.agent_id);
        self.tracker.log_task_completed(credited, &task.id, quality).await?;

        let score = quality.map(|q| format!(" (quality: {:.1})", q)).unwrap_or_default();
        Ok(format!("Task completed: '{}'{}", task.title, score))
    }
}

pub struct CreateDocTool {
    store: Arc<dyn Store>,
}

impl CreateDocTool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CreateDocTool {
    fn name(&self) -> &str {
        "create_doc"
    }

    fn description(&self) -> &str {
        "Create a new document in the current channel. Returns the document ID."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "title": { "type": "string", "description": "Document title" },
                "content": { "type": "string", "description": "Document content (markdown)" },
                "doc_type": {
                    "type": "string",
                    "description": "Document type: note, spec, plan, report (default: note)"
                }
            }),
            vec!["title", "content"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let channel_id = require_channel(ctx)?;
        let content = input.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        let mut doc = Document::new(channel_id, str_arg(&input, "title")?, content);
        if let Some(doc_type) = input.get("doc_type").and_then(|v| v.as_str()) {
            doc.doc_type = doc_type.to_string();
        }
        doc.created_by = Some(ctx.agent_id.clone());

        let doc = self.store.create_document(doc).await.context("Failed to create document")?;
        info!("{} created document '{}'", ctx.agent_name, doc.title);
        Ok(format!("Document created: '{}' (id: {})", doc.title, doc.id))
    }
}

pub struct EditDocTool {
    store: Arc<dyn Store>,
}

impl EditDocTool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for EditDocTool {
    fn name(&self) -> &str {
        "edit_doc"
    }

    fn description(&self) -> &str {
        "Edit an existing document by ID. Replaces the full content and bumps the version."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "document_id": { "type": "string", "description": "Document ID" },
                "content": { "type": "string", "description": "New full content" }
            }),
            vec!["document_id", "content"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let doc_id = str_arg(&input, "document_id")?;
        let content = input
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'content' parameter"))?;

        match self
            .store
            .update_document(doc_id, content, Some(&ctx.agent_id))
            .await
            .context("Failed to update document")?
        {
            Some(doc) => Ok(format!("Document updated: '{}' (version {})", doc.title, doc.version)),
            None => Ok(format!("Error: Document '{}' not found", doc_id)),
        }
    }
}

pub struct QueryDocsTool {
    store: Arc<dyn Store>,
}

impl QueryDocsTool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for QueryDocsTool {
    fn name(&self) -> &str {
        "query_docs"
    }

    fn description(&self) -> &str {
        "List or search documents in the current channel."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "query": { "type": "string", "description": "Text to search for in titles and content" },
                "doc_type": { "type": "string", "description": "Only documents of this type" }
            }),
            vec![],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let channel_id = require_channel(ctx)?;
        let query = input.get("query").and_then(|v| v.as_str());
        let doc_type = input.get("doc_type").and_then(|v| v.as_str());

        let docs: Vec<Document> = self
            .store
            .list_channel_documents(channel_id, query)
            .await
            .context("Failed to query documents")?
            .into_iter()
            .filter(|d| doc_type.is_none_or(|t| d.doc_type == t))
            .collect();

        if docs.is_empty() {
            return Ok("No documents found.".to_string());
        }

        let mut lines = vec![format!("Found {} document(s):", docs.len())];
        lines.extend(
            docs.iter()
                .map(|d| format!("- [{}] {} (id: {}, v{})", d.doc_type, d.title, d.id, d.version)),
        );
        Ok(lines.join("\n"))
    }
}

/// Hands a task to a teammate by posting an inbound message that mentions them
pub struct DelegateTool {
    store: Arc<dyn Store>,
    bus: Option<Arc<MessageBus>>,
}

impl DelegateTool {
    pub fn new(store: Arc<dyn Store>, bus: Option<Arc<MessageBus>>) -> Self {
        Self { store, bus }
    }
}

#[async_trait]
impl ToolHandler for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a task to another agent on the team. Use this when a message should be handled by a specialist."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "agent_name": {
                    "type": "string",
                    "description": "Name of the agent to delegate to (e.g., 'Alice', 'Bob')"
                },
                "task": { "type": "string", "description": "Description of the task to delegate" }
            }),
            vec!["agent_name", "task"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let agent_name = str_arg(&input, "agent_name")?;
        let task = str_arg(&input, "task")?;

        if same_agent_name(agent_name, &ctx.agent_name) {
            return Ok("Error: cannot delegate to yourself".to_string());
        }
        let agents = self.store.list_agents(None).await?;
        let Some(target) = agents.into_iter().find(|a| same_agent_name(&a.name, agent_name)) else {
            return Ok(format!("Error: Agent '{}' not found", agent_name));
        };

        let content = format!("@{} {}", target.name, task);
        if let Some(bus) = &self.bus {
            let msg = InboundMessage::new(ctx.origin.clone(), ctx.agent_name.clone(), ctx.channel_id.clone(), content)
                .with_mentions(vec![target.name.clone()]);
            // Called from inside the inbound consumer; waiting for room would deadlock it
            if let Err(e) = bus.try_publish_inbound(msg) {
                return Ok(format!("Error: could not delegate to @{}: {}", target.name, e));
            }
            info!("{} delegated a task to {}", ctx.agent_name, target.name);
        }
        Ok(format!("Delegated to @{}: {}", target.name, task))
    }
}

/// Posts a message from the calling agent into the current conversation
pub struct MessageTool {
    bus: Option<Arc<MessageBus>>,
}

impl MessageTool {
    pub fn new(bus: Option<Arc<MessageBus>>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ToolHandler for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the current channel without waiting for your final reply."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "content": { "type": "string", "description": "Message text" }
            }),
            vec!["content"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<String> {
        let content = str_arg(&input, "content")?;
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| anyhow!("Message bus is not available"))?;
        let sender = SenderAgent {
            id: Some(ctx.agent_id.clone()),
            name: Some(ctx.agent_name.clone()),
            role: None,
        };
        bus.publish_outbound(OutboundMessage::post(&ctx.origin, &ctx.channel_id, content, sender))
            .await?;
        Ok("Message sent".to_string())
    }
}
