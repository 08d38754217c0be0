//! Performance event logging

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::store::{PerformanceEvent, PerformanceLog, Store};

#[derive(Clone)]
pub struct PerformanceTracker {
    store: Arc<dyn Store>,
}

impl PerformanceTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn log(&self, agent_id: &str, event: PerformanceEvent) -> Result<()> {
        debug!("Performance event for {}: {:?}", agent_id, event);
        self.store
            .log_performance(PerformanceLog::new(agent_id, event))
            .await
            .context("Failed to log performance event")?;
        Ok(())
    }

    pub async fn log_task_completed(&self, agent_id: &str, task_id: &str, quality_score: Option<f64>) -> Result<()> {
        self.log(
            agent_id,
            PerformanceEvent::TaskCompleted {
                task_id: task_id.to_string(),
                quality_score,
            },
        )
        .await
    }

    pub async fn log_task_failed(&self, agent_id: &str, task_id: &str, reason: &str) -> Result<()> {
        self.log(
            agent_id,
            PerformanceEvent::TaskFailed {
                task_id: task_id.to_string(),
                reason: reason.to_string(),
            },
        )
        .await
    }

    pub async fn log_review_score(&self, agent_id: &str, task_id: &str, score: f64) -> Result<()> {
        self.log(
            agent_id,
            PerformanceEvent::ReviewScore {
                task_id: task_id.to_string(),
                score: score.clamp(0.0, 1.0),
            },
        )
        .await
    }

    pub async fn log_token_usage(&self, agent_id: &str, tokens_used: u64, model: &str) -> Result<()> {
        self.log(
            agent_id,
            PerformanceEvent::TokenUsage {
                tokens_used,
                model: model.to_string(),
            },
        )
        .await
    }
}
