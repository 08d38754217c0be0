//! In-memory [`Store`] implementation

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    AgentPatch, AgentRecord, AgentStatus, AgentUpdate, Channel, ChannelMember, Document,
    MessageRecord, PerformanceLog, Reward, Store, Task, TaskStatus,
};

#[derive(Default)]
struct Tables {
    agents: Vec<AgentRecord>,
    channels: Vec<Channel>,
    members: Vec<ChannelMember>,
    messages: Vec<MessageRecord>,
    updates: Vec<AgentUpdate>,
    documents: Vec<Document>,
    tasks: Vec<Task>,
    performance: Vec<PerformanceLog>,
    rewards: Vec<Reward>,
}

/// Store that keeps every table in process memory.
///
/// Rows are kept in insertion order, which gives stable membership ordering.
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_agent(&self, agent: AgentRecord) -> Result<AgentRecord> {
        let mut tables = self.tables.write().await;
        if tables.agents.iter().any(|a| a.name == agent.name) {
            return Err(anyhow!("Agent named '{}' already exists", agent.name));
        }
        debug!("Created agent {} ({})", agent.name, agent.id);
        tables.agents.push(agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.agents.iter().find(|a| a.id == agent_id).cloned())
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Option<AgentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.agents.iter().find(|a| a.name == name).cloned())
    }

    async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<AgentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .agents
            .iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect())
    }

    async fn update_agent(&self, agent_id: &str, patch: AgentPatch) -> Result<Option<AgentRecord>> {
        let mut tables = self.tables.write().await;
        let Some(agent) = tables.agents.iter_mut().find(|a| a.id == agent_id) else {
            return Ok(None);
        };
        patch.apply(agent);
        Ok(Some(agent.clone()))
    }

    async fn create_channel(&self, channel: Channel) -> Result<Channel> {
        let mut tables = self.tables.write().await;
        tables.channels.push(channel.clone());
        Ok(channel)
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>> {
        let tables = self.tables.read().await;
        Ok(tables.channels.iter().find(|c| c.id == channel_id).cloned())
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        let tables = self.tables.read().await;
        Ok(tables.channels.iter().find(|c| c.name == name).cloned())
    }

    async fn add_member(&self, member: ChannelMember) -> Result<ChannelMember> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .members
            .iter()
            .find(|m| m.channel_id == member.channel_id && m.agent_id == member.agent_id)
        {
            return Ok(existing.clone());
        }
        tables.members.push(member.clone());
        Ok(member)
    }

    async fn get_channel_members(&self, channel_id: &str, include_paused: bool) -> Result<Vec<ChannelMember>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .iter()
            .filter(|m| m.channel_id == channel_id && (include_paused || !m.is_paused))
            .cloned()
            .collect())
    }

    async fn set_member_paused(&self, channel_id: &str, agent_id: &str, paused: bool) -> Result<()> {
        let mut tables = self.tables.write().await;
        let member = tables
            .members
            .iter_mut()
            .find(|m| m.channel_id == channel_id && m.agent_id == agent_id)
            .ok_or_else(|| anyhow!("Agent {} is not a member of channel {}", agent_id, channel_id))?;
        member.is_paused = paused;
        Ok(())
    }

    async fn create_message(&self, message: MessageRecord) -> Result<MessageRecord> {
        let mut tables = self.tables.write().await;
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn get_channel_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .rev()
            .filter(|m| m.channel_id == channel_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_update(&self, update: AgentUpdate) -> Result<AgentUpdate> {
        let mut tables = self.tables.write().await;
        tables.updates.push(update.clone());
        Ok(update)
    }

    async fn get_recent_agent_updates(&self, channel_id: &str, hours: i64) -> Result<Vec<AgentUpdate>> {
        let cutoff = Utc::now() - Duration::hours(hours);
        let tables = self.tables.read().await;
        let mut updates: Vec<AgentUpdate> = tables
            .updates
            .iter()
            .filter(|u| u.channel_id == channel_id && u.created_at >= cutoff)
            .cloned()
            .collect();
        updates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(updates)
    }

    async fn create_document(&self, doc: Document) -> Result<Document> {
        let mut tables = self.tables.write().await;
        tables.documents.push(doc.clone());
        Ok(doc)
    }

    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>> {
        let tables = self.tables.read().await;
        Ok(tables.documents.iter().find(|d| d.id == doc_id).cloned())
    }

    async fn list_channel_documents(&self, channel_id: &str, query: Option<&str>) -> Result<Vec<Document>> {
        let needle = query.map(str::to_lowercase);
        let tables = self.tables.read().await;
        Ok(tables
            .documents
            .iter()
            .filter(|d| d.channel_id == channel_id)
            .filter(|d| match &needle {
                Some(q) => {
                    d.title.to_lowercase().contains(q) || d.content.to_lowercase().contains(q)
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn update_document(&self, doc_id: &str, content: &str, edited_by: Option<&str>) -> Result<Option<Document>> {
        let mut tables = self.tables.write().await;
        let Some(doc) = tables.documents.iter_mut().find(|d| d.id == doc_id) else {
            return Ok(None);
        };
        doc.content = content.to_string();
        doc.last_edited_by = edited_by.map(str::to_string);
        doc.version += 1;
        doc.updated_at = Utc::now();
        Ok(Some(doc.clone()))
    }

    async fn create_task(&self, task: Task) -> Result<Task> {
        let mut tables = self.tables.write().await;
        tables.tasks.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let tables = self.tables.read().await;
        Ok(tables.tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn complete_task(&self, task_id: &str, quality_score: Option<f64>) -> Result<Option<Task>> {
        let mut tables = self.tables.write().await;
        let Some(task) = tables.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Ok(None);
        };
        task.status = TaskStatus::Completed;
        task.quality_score = quality_score;
        task.completed_at = Some(Utc::now());
        Ok(Some(task.clone()))
    }

    async fn log_performance(&self, log: PerformanceLog) -> Result<PerformanceLog> {
        let mut tables = self.tables.write().await;
        tables.performance.push(log.clone());
        Ok(log)
    }

    async fn get_performance_logs(&self, agent_id: &str, limit: usize) -> Result<Vec<PerformanceLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .performance
            .iter()
            .rev()
            .filter(|l| l.agent_id == agent_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_reward(&self, reward: Reward) -> Result<Reward> {
        let mut tables = self.tables.write().await;
        tables.rewards.push(reward.clone());
        Ok(reward)
    }

    async fn get_agent_rewards(&self, agent_id: &str) -> Result<Vec<Reward>> {
        let tables = self.tables.read().await;
        Ok(tables
            .rewards
            .iter()
            .rev()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect())
    }
}
