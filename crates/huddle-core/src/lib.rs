//! huddle-core - Multi-agent team orchestration
//!
//! This crate provides:
//! - Message bus and router that decide which agent(s) own a message
//! - Orchestrator with broadcast dispatch and standup aggregation
//! - Declarative pipelines with retries and approval gates
//! - LLM agent loop, Anthropic provider and role-scoped team tools
//! - Agent economy: performance scoring, salary and token budgets
//! - Store trait with an in-memory implementation

pub mod agent;
pub mod bus;
pub mod context;
pub mod incentives;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod router;
pub mod store;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use agent::{AgentFactory, AgentReply, AgentRequest, AgentRunner, LlmAgent, LlmAgentFactory};
pub use bus::{MessageBus, OutboundSubscriber};
pub use context::{AgentIdentity, build_system_prompt};
pub use incentives::{BudgetManager, Evaluation, EvaluationAction, PerformanceEvaluator, PerformanceTracker};
pub use orchestrator::{AgentRegistration, Orchestrator, OrchestratorConfig};
pub use pipeline::{PipelineDefinition, PipelineEngine, PipelineError, PipelineRun, PipelineStep, RunStatus};
pub use providers::{AnthropicProvider, LlmProvider};
pub use router::{MessageRouter, RouteDecision, RoutingMode};
pub use store::{MemoryStore, Store};
pub use tools::{ToolContext, ToolHandler, ToolRegistry};
pub use types::{InboundMessage, MessageType, OutboundMessage, SenderAgent};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = std::mem::size_of::<Orchestrator>();
        let _ = std::mem::size_of::<PipelineEngine>();
        let _ = std::mem::size_of::<MessageBus>();
        let _ = std::mem::size_of::<InboundMessage>();
        let _ = std::mem::size_of::<OutboundMessage>();
    }
}
