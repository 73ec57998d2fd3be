//! Multi-step planning: the task plan model and the
//! Planner-Executor-Verifier engine.

pub mod engine;
pub mod plan;

pub use engine::{
    FailSafeAction, FailSafeChoice, FailSafeHandler, PevEngine, PevResult, PevState, TaskPlanner,
    VerificationResult, Verifier,
};
pub use plan::{PlanStatus, PlanStep, StepStatus, TaskPlan};
