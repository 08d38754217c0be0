//! Token budget tracking

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::store::{AgentPatch, Store};

/// Reads and adjusts agents' token budgets in the store
#[derive(Clone)]
pub struct BudgetManager {
    store: Arc<dyn Store>,
}

impl BudgetManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `(has_budget, remaining)`; unknown agents have none
    pub async fn check_budget(&self, agent_id: &str) -> Result<(bool, i64)> {
        Ok(match self.store.get_agent(agent_id).await? {
            Some(agent) => (agent.token_budget > 0, agent.token_budget),
            None => (false, 0),
        })
    }

    /// Subtract usage, never going below zero. Returns the remaining budget.
    pub async fn deduct_tokens(&self, agent_id: &str, tokens_used: u64) -> Result<i64> {
        let Some(agent) = self.store.get_agent(agent_id).await? else {
            return Ok(0);
        };
        let used = i64::try_from(tokens_used).unwrap_or(i64::MAX);
        let remaining = agent.token_budget.saturating_sub(used).max(0);
        self.set_budget(agent_id, remaining).await?;
        if remaining == 0 {
            warn!("Agent {} has exhausted its token budget", agent.name);
        }
        Ok(remaining)
    }

    /// Add `amount` tokens. Returns the new budget.
    pub async fn refill_budget(&self, agent_id: &str, amount: i64) -> Result<i64> {
        let Some(agent) = self.store.get_agent(agent_id).await? else {
            return Ok(0);
        };
        let budget = agent.token_budget.saturating_add(amount);
        self.set_budget(agent_id, budget).await?;
        info!("Refilled {} budget by {} -> {}", agent.name, amount, budget);
        Ok(budget)
    }

    async fn set_budget(&self, agent_id: &str, budget: i64) -> Result<()> {
        self.store
            .update_agent(
                agent_id,
                AgentPatch {
                    token_budget: Some(budget),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}
