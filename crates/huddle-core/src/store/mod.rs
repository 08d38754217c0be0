//! Persistence collaborator
//!
//! The orchestrator never talks to a database directly. Everything it needs is
//! expressed by the [`Store`] trait so that any backend can be plugged in.
//! [`MemoryStore`] is the in-process implementation used by the CLI and tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::MessageType;

pub use memory::MemoryStore;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Employment status of an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Active,
    Warning,
    Fired,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Warning => write!(f, "warning"),
            Self::Fired => write!(f, "fired"),
        }
    }
}

/// Agent as persisted by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub model: Option<String>,
    pub token_budget: i64,
    pub salary_balance: i64,
    pub performance_score: f64,
    pub created_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            role: role.into(),
            status: AgentStatus::Active,
            model: None,
            token_budget: 100_000,
            salary_balance: 0,
            performance_score: 0.5,
            created_at: Utc::now(),
        }
    }
}

/// Partial update applied by [`Store::update_agent`]
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub status: Option<AgentStatus>,
    pub performance_score: Option<f64>,
    pub salary_balance: Option<i64>,
    pub token_budget: Option<i64>,
}

impl AgentPatch {
    fn apply(&self, agent: &mut AgentRecord) {
        if let Some(status) = self.status {
            agent.status = status;
        }
        if let Some(score) = self.performance_score {
            agent.performance_score = score;
        }
        if let Some(balance) = self.salary_balance {
            agent.salary_balance = balance;
        }
        if let Some(budget) = self.token_budget {
            agent.token_budget = budget;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Project,
    Dm,
}

/// A conversation scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: ChannelKind,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            description: None,
            kind: ChannelKind::Project,
            created_at: Utc::now(),
        }
    }
}

/// Membership of an agent in a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub agent_id: String,
    pub is_paused: bool,
    pub joined_at: DateTime<Utc>,
}

impl ChannelMember {
    pub fn new(channel_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            agent_id: agent_id.into(),
            is_paused: false,
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Human,
    Agent,
    System,
}

/// Message history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub channel_id: String,
    pub sender_id: Option<String>,
    pub sender_type: SenderType,
    pub sender_name: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        channel_id: impl Into<String>,
        sender_type: SenderType,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: new_id(),
            channel_id: channel_id.into(),
            sender_id: None,
            sender_type,
            sender_name: None,
            content: content.into(),
            message_type,
            mentions: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Activity summary logged by an agent, shown in standup reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub id: String,
    pub agent_id: String,
    pub channel_id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl AgentUpdate {
    pub fn new(
        agent_id: impl Into<String>,
        channel_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            agent_id: agent_id.into(),
            channel_id: channel_id.into(),
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }
}

/// Shared document in a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub content: String,
    pub doc_type: String,
    pub created_by: Option<String>,
    pub last_edited_by: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        channel_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            channel_id: channel_id.into(),
            title: title.into(),
            content: content.into(),
            doc_type: "note".to_string(),
            created_by: None,
            last_edited_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// Unit of work assigned to an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub channel_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub quality_score: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            channel_id: None,
            title: title.into(),
            description: None,
            assigned_to: None,
            status: TaskStatus::Pending,
            priority: 0,
            quality_score: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

fn default_review_score() -> f64 {
    0.5
}

/// Scored or informational event in an agent's performance history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PerformanceEvent {
    TaskCompleted {
        task_id: String,
        quality_score: Option<f64>,
    },
    TaskFailed {
        task_id: String,
        reason: String,
    },
    ReviewScore {
        task_id: String,
        #[serde(default = "default_review_score")]
        score: f64,
    },
    TokenUsage {
        tokens_used: u64,
        model: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceLog {
    pub id: String,
    pub agent_id: String,
    pub event: PerformanceEvent,
    pub created_at: DateTime<Utc>,
}

impl PerformanceLog {
    pub fn new(agent_id: impl Into<String>, event: PerformanceEvent) -> Self {
        Self {
            id: new_id(),
            agent_id: agent_id.into(),
            event,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    Bonus,
    Salary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: String,
    pub agent_id: String,
    pub kind: RewardKind,
    pub amount: i64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Reward {
    pub fn new(agent_id: impl Into<String>, kind: RewardKind, amount: i64, reason: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            agent_id: agent_id.into(),
            kind,
            amount,
            reason: Some(reason.into()),
            created_at: Utc::now(),
        }
    }
}

/// Storage backend consumed by the orchestrator, tools and incentive code.
///
/// All calls may fail. Callers decide whether a failure is fatal.
#[async_trait]
pub trait Store: Send + Sync {
    // Agents
    async fn create_agent(&self, agent: AgentRecord) -> Result<AgentRecord>;
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>>;
    async fn get_agent_by_name(&self, name: &str) -> Result<Option<AgentRecord>>;
    async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<AgentRecord>>;
    async fn update_agent(&self, agent_id: &str, patch: AgentPatch) -> Result<Option<AgentRecord>>;

    // Channels and membership
    async fn create_channel(&self, channel: Channel) -> Result<Channel>;
    async fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>>;
    async fn get_channel_by_name(&self, name: &str) -> Result<Option<Channel>>;
    async fn add_member(&self, member: ChannelMember) -> Result<ChannelMember>;
    /// Members in join order; paused members only when `include_paused`
    async fn get_channel_members(&self, channel_id: &str, include_paused: bool) -> Result<Vec<ChannelMember>>;
    async fn set_member_paused(&self, channel_id: &str, agent_id: &str, paused: bool) -> Result<()>;

    // Messages
    async fn create_message(&self, message: MessageRecord) -> Result<MessageRecord>;
    /// Most recent messages first
    async fn get_channel_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<MessageRecord>>;

    // Activity updates
    async fn create_update(&self, update: AgentUpdate) -> Result<AgentUpdate>;
    /// Updates in a channel from the last `hours`, newest first
    async fn get_recent_agent_updates(&self, channel_id: &str, hours: i64) -> Result<Vec<AgentUpdate>>;

    // Documents
    async fn create_document(&self, doc: Document) -> Result<Document>;
    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>>;
    /// Documents in a channel, optionally filtered by a case-insensitive substring
    async fn list_channel_documents(&self, channel_id: &str, query: Option<&str>) -> Result<Vec<Document>>;
    async fn update_document(&self, doc_id: &str, content: &str, edited_by: Option<&str>) -> Result<Option<Document>>;

    // Tasks
    async fn create_task(&self, task: Task) -> Result<Task>;
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;
    async fn complete_task(&self, task_id: &str, quality_score: Option<f64>) -> Result<Option<Task>>;

    // Economy
    async fn log_performance(&self, log: PerformanceLog) -> Result<PerformanceLog>;
    /// The `limit` most recent events for an agent, newest first
    async fn get_performance_logs(&self, agent_id: &str, limit: usize) -> Result<Vec<PerformanceLog>>;
    async fn create_reward(&self, reward: Reward) -> Result<Reward>;
    async fn get_agent_rewards(&self, agent_id: &str) -> Result<Vec<Reward>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_record_defaults() {
        let agent = AgentRecord::new("Ada", "developer");
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.token_budget, 100_000);
        assert_eq!(agent.salary_balance, 0);
        assert!((agent.performance_score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_patch_only_touches_set_fields() {
        let mut agent = AgentRecord::new("Ada", "developer");
        AgentPatch {
            status: Some(AgentStatus::Warning),
            ..Default::default()
        }
        .apply(&mut agent);
        assert_eq!(agent.status, AgentStatus::Warning);
        assert_eq!(agent.token_budget, 100_000);
    }

    #[test]
    fn test_performance_event_serde() {
        let event = PerformanceEvent::TaskCompleted {
            task_id: "t1".to_string(),
            quality_score: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "task_completed");
        let back: PerformanceEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);

        let review: PerformanceEvent =
            serde_json::from_str(r#"{"event_type":"review_score","task_id":"t2"}"#).unwrap();
        assert_eq!(
            review,
            PerformanceEvent::ReviewScore {
                task_id: "t2".to_string(),
                score: 0.5
            }
        );
    }
}
