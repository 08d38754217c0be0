//! Agent economy: performance scoring, salary and token budgets

pub mod budget;
pub mod evaluator;
pub mod tracker;

pub use budget::BudgetManager;
pub use evaluator::{Evaluation, EvaluationAction, PerformanceEvaluator};
pub use tracker::PerformanceTracker;
