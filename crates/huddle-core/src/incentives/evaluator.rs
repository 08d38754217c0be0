//! Rolling performance score and its consequences

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};

use crate::store::{AgentPatch, AgentStatus, PerformanceEvent, Reward, RewardKind, Store};

pub const WARNING_THRESHOLD: f64 = 0.3;
pub const FIRING_THRESHOLD: f64 = 0.15;
pub const BONUS_THRESHOLD: f64 = 0.8;
pub const SALARY_PER_CYCLE: i64 = 10;
pub const BONUS_AMOUNT: i64 = 50;

/// Number of most recent events that make up the rolling window
pub const EVALUATION_WINDOW: usize = 50;

const DEFAULT_TASK_QUALITY: f64 = 0.7;

/// What an evaluation did to the agent
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationAction {
    None,
    Warning,
    Fired,
    Bonus,
    Active,
}

impl std::fmt::Display for EvaluationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Warning => write!(f, "warning"),
            Self::Fired => write!(f, "fired"),
            Self::Bonus => write!(f, "bonus"),
            Self::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Evaluation {
    pub agent_name: String,
    pub score: f64,
    pub status: AgentStatus,
    pub action: EvaluationAction,
}

/// Score contributed by one event, if it is a scored kind
fn event_score(event: &PerformanceEvent) -> Option<f64> {
    match event {
        PerformanceEvent::TaskCompleted { quality_score, .. } => {
            Some(quality_score.unwrap_or(DEFAULT_TASK_QUALITY))
        }
        PerformanceEvent::TaskFailed { .. } => Some(0.0),
        PerformanceEvent::ReviewScore { score, .. } => Some(*score),
        PerformanceEvent::TokenUsage { .. } => None,
    }
}

/// Mean of the scored events, `None` when nothing is scored
pub fn rolling_score<'a>(events: impl IntoIterator<Item = &'a PerformanceEvent>) -> Option<f64> {
    let scores: Vec<f64> = events.into_iter().filter_map(event_score).collect();
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

pub struct PerformanceEvaluator {
    store: Arc<dyn Store>,
}

impl PerformanceEvaluator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recompute an agent's score from its recent events and apply the outcome.
    ///
    /// With scored events the thresholds are re-applied on every call, so a
    /// repeated evaluation reports its action again and a fired agent whose
    /// score recovers is reinstated. `None` means nothing was scored.
    pub async fn evaluate_agent(&self, agent_id: &str) -> Result<Evaluation> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| anyhow!("Agent not found: {}", agent_id))?;
        let logs = self
            .store
            .get_performance_logs(agent_id, EVALUATION_WINDOW)
            .await
            .context("Failed to load performance logs")?;

        let Some(score) = rolling_score(logs.iter().map(|l| &l.event)) else {
            return Ok(Evaluation {
                agent_name: agent.name,
                score: agent.performance_score,
                status: agent.status,
                action: EvaluationAction::None,
            });
        };

        let (status, action) = if score < FIRING_THRESHOLD {
            warn!("Agent {} FIRED (score: {:.2})", agent.name, score);
            (AgentStatus::Fired, EvaluationAction::Fired)
        } else if score < WARNING_THRESHOLD {
            warn!("Agent {} WARNING (score: {:.2})", agent.name, score);
            (AgentStatus::Warning, EvaluationAction::Warning)
        } else if score >= BONUS_THRESHOLD {
            (AgentStatus::Active, EvaluationAction::Bonus)
        } else {
            (AgentStatus::Active, EvaluationAction::Active)
        };

        let mut patch = AgentPatch {
            status: Some(status),
            performance_score: Some(score),
            ..Default::default()
        };

        if action == EvaluationAction::Bonus {
            self.store
                .create_reward(Reward::new(
                    agent_id,
                    RewardKind::Bonus,
                    BONUS_AMOUNT,
                    format!("High performance score: {:.2}", score),
                ))
                .await
                .context("Failed to record bonus")?;
            patch.salary_balance = Some(agent.salary_balance + BONUS_AMOUNT);
            info!("Agent {} BONUS +{} (score: {:.2})", agent.name, BONUS_AMOUNT, score);
        }

        self.store
            .update_agent(agent_id, patch)
            .await
            .context("Failed to persist evaluation")?;

        Ok(Evaluation {
            agent_name: agent.name,
            score,
            status,
            action,
        })
    }

    /// Evaluate every agent, then pay salary to those still employed.
    ///
    /// One agent failing is logged and does not stop the cycle.
    pub async fn run_cycle(&self) -> Result<Vec<Evaluation>> {
        let agents = self.store.list_agents(None).await.context("Failed to list agents")?;
        let mut evaluations = Vec::with_capacity(agents.len());
        for agent in agents {
            match self.evaluate_agent(&agent.id).await {
                Ok(eval) => {
                    if eval.status != AgentStatus::Fired
                        && let Err(e) = self.pay_salary(&agent.id).await
                    {
                        warn!("Failed to pay salary to {}: {}", agent.name, e);
                    }
                    evaluations.push(eval);
                }
                Err(e) => warn!("Failed to evaluate {}: {}", agent.name, e),
            }
        }
        info!("Economy cycle evaluated {} agents", evaluations.len());
        Ok(evaluations)
    }

    /// Pay one salary cycle. Fired agents are not paid. Returns the new balance.
    pub async fn pay_salary(&self, agent_id: &str) -> Result<i64> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| anyhow!("Agent not found: {}", agent_id))?;
        if agent.status == AgentStatus::Fired {
            return Ok(agent.salary_balance);
        }

        let balance = agent.salary_balance + SALARY_PER_CYCLE;
        self.store
            .update_agent(
                agent_id,
                AgentPatch {
                    salary_balance: Some(balance),
                    ..Default::default()
                },
            )
            .await?;
        self.store
            .create_reward(Reward::new(
                agent_id,
                RewardKind::Salary,
                SALARY_PER_CYCLE,
                "Regular salary cycle",
            ))
            .await?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AgentRecord, MemoryStore, PerformanceLog};

    async fn agent_with_events(store: &MemoryStore, events: Vec<PerformanceEvent>) -> String {
        let agent = store.create_agent(AgentRecord::new("Ada", "developer")).await.unwrap();
        for event in events {
            store.log_performance(PerformanceLog::new(&agent.id, event)).await.unwrap();
        }
        agent.id
    }

    fn review(score: f64) -> PerformanceEvent {
        PerformanceEvent::ReviewScore {
            task_id: "t".to_string(),
            score,
        }
    }

    #[test]
    fn test_rolling_score_kinds() {
        let events = vec![
            PerformanceEvent::TaskCompleted {
                task_id: "a".to_string(),
                quality_score: None,
            },
            PerformanceEvent::TaskFailed {
                task_id: "b".to_string(),
                reason: "timeout".to_string(),
            },
            PerformanceEvent::TokenUsage {
                tokens_used: 100,
                model: "m".to_string(),
            },
        ];
        let score = rolling_score(&events).unwrap();
        assert!((score - 0.35).abs() < 1e-9);

        let unscored = vec![PerformanceEvent::TokenUsage {
            tokens_used: 1,
            model: "m".to_string(),
        }];
        assert!(rolling_score(&unscored).is_none());
    }

    #[tokio::test]
    async fn test_high_scores_pay_bonus() {
        let store = Arc::new(MemoryStore::new());
        let id = agent_with_events(&store, vec![review(1.0), review(1.0), review(0.9)]).await;
        let evaluator = PerformanceEvaluator::new(store.clone());

        let eval = evaluator.evaluate_agent(&id).await.unwrap();
        assert_eq!(eval.action, EvaluationAction::Bonus);
        assert_eq!(eval.status, AgentStatus::Active);

        let agent = store.get_agent(&id).await.unwrap().unwrap();
        assert_eq!(agent.salary_balance, BONUS_AMOUNT);
        assert!((agent.performance_score - 2.9 / 3.0).abs() < 1e-9);

        let rewards = store.get_agent_rewards(&id).await.unwrap();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].kind, RewardKind::Bonus);
    }

    #[tokio::test]
    async fn test_low_scores_fire() {
        let store = Arc::new(MemoryStore::new());
        let id = agent_with_events(&store, vec![review(0.0), review(0.1)]).await;
        let evaluator = PerformanceEvaluator::new(store.clone());

        let eval = evaluator.evaluate_agent(&id).await.unwrap();
        assert_eq!(eval.action, EvaluationAction::Fired);
        assert_eq!(store.get_agent(&id).await.unwrap().unwrap().status, AgentStatus::Fired);

        let again = evaluator.evaluate_agent(&id).await.unwrap();
        assert_eq!(again.action, EvaluationAction::Fired);
        assert_eq!(again.status, AgentStatus::Fired);
    }

    #[tokio::test]
    async fn test_repeated_warning_is_reapplied() {
        let store = Arc::new(MemoryStore::new());
        let id = agent_with_events(&store, vec![review(0.2), review(0.25)]).await;
        let evaluator = PerformanceEvaluator::new(store.clone());

        assert_eq!(evaluator.evaluate_agent(&id).await.unwrap().action, EvaluationAction::Warning);
        let again = evaluator.evaluate_agent(&id).await.unwrap();
        assert_eq!(again.action, EvaluationAction::Warning);
        assert_eq!(again.status, AgentStatus::Warning);
    }

    #[tokio::test]
    async fn test_fired_agent_recovers_with_good_reviews() {
        let store = Arc::new(MemoryStore::new());
        let id = agent_with_events(&store, vec![review(0.0)]).await;
        let evaluator = PerformanceEvaluator::new(store.clone());
        assert_eq!(evaluator.evaluate_agent(&id).await.unwrap().action, EvaluationAction::Fired);

        for _ in 0..20 {
            store.log_performance(PerformanceLog::new(&id, review(1.0))).await.unwrap();
        }
        let after = evaluator.evaluate_agent(&id).await.unwrap();
        assert_eq!(after.action, EvaluationAction::Bonus);
        assert_eq!(after.status, AgentStatus::Active);
        assert!((after.score - 20.0 / 21.0).abs() < 1e-9);
        assert_eq!(store.get_agent(&id).await.unwrap().unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_middle_band_marks_active() {
        let store = Arc::new(MemoryStore::new());
        let id = agent_with_events(&store, vec![review(0.6)]).await;
        let eval = PerformanceEvaluator::new(store.clone()).evaluate_agent(&id).await.unwrap();
        assert_eq!(eval.action, EvaluationAction::Active);
        assert_eq!(eval.action.to_string(), "active");
    }

    #[tokio::test]
    async fn test_no_events_leaves_agent_untouched() {
        let store = Arc::new(MemoryStore::new());
        let id = agent_with_events(&store, vec![]).await;
        let eval = PerformanceEvaluator::new(store).evaluate_agent(&id).await.unwrap();
        assert_eq!(eval.action, EvaluationAction::None);
        assert!((eval.score - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_error() {
        let store = Arc::new(MemoryStore::new());
        assert!(PerformanceEvaluator::new(store).evaluate_agent("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_cycle_pays_everyone_but_the_fired() {
        let store = Arc::new(MemoryStore::new());
        let good = agent_with_events(&store, vec![review(0.6)]).await;
        let bad = store.create_agent(AgentRecord::new("Bob", "qa")).await.unwrap();
        store
            .log_performance(PerformanceLog::new(&bad.id, review(0.0)))
            .await
            .unwrap();

        let evaluations = PerformanceEvaluator::new(store.clone()).run_cycle().await.unwrap();
        assert_eq!(evaluations.len(), 2);
        assert_eq!(store.get_agent(&good).await.unwrap().unwrap().salary_balance, SALARY_PER_CYCLE);
        let bob = store.get_agent(&bad.id).await.unwrap().unwrap();
        assert_eq!(bob.status, AgentStatus::Fired);
        assert_eq!(bob.salary_balance, 0);
    }

    #[tokio::test]
    async fn test_pay_salary_skips_fired() {
        let store = Arc::new(MemoryStore::new());
        let id = agent_with_events(&store, vec![]).await;
        let evaluator = PerformanceEvaluator::new(store.clone());

        assert_eq!(evaluator.pay_salary(&id).await.unwrap(), SALARY_PER_CYCLE);
        store
            .update_agent(
                &id,
                AgentPatch {
                    status: Some(AgentStatus::Fired),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(evaluator.pay_salary(&id).await.unwrap(), SALARY_PER_CYCLE);
        assert_eq!(store.get_agent_rewards(&id).await.unwrap().len(), 1);
    }
}
