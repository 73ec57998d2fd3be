//! Multi-step task plans.
//!
//! A [`TaskPlan`] is an ordered list of [`PlanStep`]s with lifecycle status
//! on both levels. Status transitions are monotone: a terminal step never
//! becomes non-terminal again, and a plan terminates exactly once. Violating
//! transitions are rejected, not panicked on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Plan lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    /// Whether this status ends the plan.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Whether this status ends the step.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// Default retry cap per step.
const DEFAULT_STEP_MAX_RETRIES: u32 = 2;

/// One planned action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable step id within the plan.
    pub id: String,
    /// Tool to execute.
    pub tool: String,
    /// Tool arguments.
    pub args: serde_json::Map<String, Value>,
    /// Human-readable expectation, shown to the verifier.
    pub expected_outcome: String,
    status: StepStatus,
    retry_count: u32,
    max_retries: u32,
    /// Error from the last failure, if any.
    pub error: Option<String>,
    /// Result of the successful execution, if any.
    pub result: Option<Value>,
}

impl PlanStep {
    /// New pending step.
    pub fn new(tool: &str, args: serde_json::Map<String, Value>, expected_outcome: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool: tool.to_owned(),
            args,
            expected_outcome: expected_outcome.to_owned(),
            status: StepStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_STEP_MAX_RETRIES,
            error: None,
            result: None,
        }
    }

    /// Override the retry cap.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Current status.
    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Retries consumed.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Consume one retry.
    pub fn increment_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Attempt a status transition. Terminal states are frozen: the attempt
    /// is rejected and `false` returned.
    pub fn set_status(&mut self, status: StepStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    /// Mark success with its result.
    pub fn mark_success(&mut self, result: Value) -> bool {
        if !self.set_status(StepStatus::Success) {
            return false;
        }
        self.result = Some(result);
        true
    }

    /// Mark terminal failure with an error.
    pub fn mark_failed(&mut self, error: &str) -> bool {
        if !self.set_status(StepStatus::Failed) {
            return false;
        }
        self.error = Some(error.to_owned());
        true
    }

    /// Mark skipped.
    pub fn mark_skipped(&mut self) -> bool {
        self.set_status(StepStatus::Skipped)
    }
}

/// A multi-step plan: goal, ordered steps, lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    /// Unique plan id.
    pub id: String,
    /// The user's goal.
    pub goal: String,
    steps: Vec<PlanStep>,
    status: PlanStatus,
}

impl TaskPlan {
    /// New pending plan.
    pub fn new(goal: &str, steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.to_owned(),
            steps,
            status: PlanStatus::Pending,
        }
    }

    /// Current status.
    pub fn status(&self) -> PlanStatus {
        self.status
    }

    /// All steps.
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Mutable access to a step by id.
    pub fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Next pending step, if the plan is running.
    pub fn next_step(&mut self) -> Option<&mut PlanStep> {
        if self.status != PlanStatus::Running {
            return None;
        }
        self.steps
            .iter_mut()
            .find(|s| s.status() == StepStatus::Pending)
    }

    /// The step currently running, if any.
    pub fn running_step_mut(&mut self) -> Option<&mut PlanStep> {
        self.steps
            .iter_mut()
            .find(|s| s.status() == StepStatus::Running)
    }

    /// Attempt a plan transition. Terminal statuses are frozen.
    fn set_status(&mut self, status: PlanStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    /// Pending → Running.
    pub fn start(&mut self) -> bool {
        if self.status != PlanStatus::Pending {
            return false;
        }
        self.set_status(PlanStatus::Running)
    }

    /// Running → Paused.
    pub fn pause(&mut self) -> bool {
        if self.status != PlanStatus::Running {
            return false;
        }
        self.set_status(PlanStatus::Paused)
    }

    /// Paused → Running.
    pub fn resume(&mut self) -> bool {
        if self.status != PlanStatus::Paused {
            return false;
        }
        self.set_status(PlanStatus::Running)
    }

    /// Terminate as cancelled.
    pub fn cancel(&mut self) -> bool {
        self.set_status(PlanStatus::Cancelled)
    }

    /// Terminate as completed.
    pub fn complete(&mut self) -> bool {
        self.set_status(PlanStatus::Completed)
    }

    /// Terminate as failed.
    pub fn fail(&mut self) -> bool {
        self.set_status(PlanStatus::Failed)
    }

    /// Whether every step reached a terminal state.
    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status().is_terminal())
    }

    /// Count of steps in the given status.
    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status() == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(tool: &str) -> PlanStep {
        PlanStep::new(tool, serde_json::Map::new(), "works")
    }

    #[test]
    fn step_terminal_states_are_frozen() {
        let mut s = step("a.b");
        assert!(s.mark_success(json!({"ok": true})));
        assert!(!s.mark_failed("too late"));
        assert!(!s.set_status(StepStatus::Pending));
        assert_eq!(s.status(), StepStatus::Success);
        assert!(s.error.is_none());
    }

    #[test]
    fn step_failed_stays_failed() {
        let mut s = step("a.b");
        assert!(s.mark_failed("boom"));
        assert!(!s.mark_skipped());
        assert!(!s.mark_success(json!(1)));
        assert_eq!(s.status(), StepStatus::Failed);
        assert_eq!(s.error.as_deref(), Some("boom"));
    }

    #[test]
    fn running_step_may_return_to_pending() {
        // Non-terminal transitions are free; retries put a running step back.
        let mut s = step("a.b");
        assert!(s.set_status(StepStatus::Running));
        assert!(s.set_status(StepStatus::Pending));
    }

    #[test]
    fn retry_budget() {
        let mut s = step("a.b").with_max_retries(2);
        assert!(s.can_retry());
        s.increment_retry();
        s.increment_retry();
        assert!(!s.can_retry());
        assert_eq!(s.retry_count(), 2);
    }

    #[test]
    fn plan_lifecycle_happy_path() {
        let mut plan = TaskPlan::new("test goal", vec![step("a"), step("b")]);
        assert_eq!(plan.status(), PlanStatus::Pending);
        assert!(plan.next_step().is_none(), "not running yet");

        assert!(plan.start());
        let first_id = plan.next_step().expect("first step").id.clone();
        plan.step_mut(&first_id)
            .expect("step")
            .mark_success(json!(1));

        let second = plan.next_step().expect("second step");
        assert_ne!(second.id, first_id);
        second.mark_success(json!(2));

        assert!(plan.all_steps_terminal());
        assert!(plan.complete());
        assert_eq!(plan.status(), PlanStatus::Completed);
    }

    #[test]
    fn plan_terminates_only_once() {
        let mut plan = TaskPlan::new("g", vec![step("a")]);
        plan.start();
        assert!(plan.cancel());
        assert!(!plan.complete());
        assert!(!plan.fail());
        assert!(!plan.resume());
        assert_eq!(plan.status(), PlanStatus::Cancelled);
    }

    #[test]
    fn pause_resume_round_trip() {
        let mut plan = TaskPlan::new("g", vec![step("a")]);
        plan.start();
        assert!(plan.pause());
        assert!(plan.next_step().is_none(), "paused plan yields no steps");
        assert!(plan.resume());
        assert!(plan.next_step().is_some());
    }

    #[test]
    fn counts_by_status() {
        let mut plan = TaskPlan::new("g", vec![step("a"), step("b"), step("c")]);
        plan.start();
        let ids: Vec<String> = plan.steps().iter().map(|s| s.id.clone()).collect();
        plan.step_mut(&ids[0]).expect("a").mark_success(json!(1));
        plan.step_mut(&ids[1]).expect("b").mark_failed("x");
        plan.step_mut(&ids[2]).expect("c").mark_skipped();

        assert_eq!(plan.count_with_status(StepStatus::Success), 1);
        assert_eq!(plan.count_with_status(StepStatus::Failed), 1);
        assert_eq!(plan.count_with_status(StepStatus::Skipped), 1);
    }

    #[test]
    fn plan_roundtrips_through_json() {
        let plan = TaskPlan::new("takvimi düzenle", vec![step("calendar.list_events")]);
        let json = serde_json::to_string(&plan).expect("serialize");
        let back: TaskPlan = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.goal, "takvimi düzenle");
        assert_eq!(back.steps().len(), 1);
        assert_eq!(back.status(), PlanStatus::Pending);
    }
}
