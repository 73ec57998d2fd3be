//! The Planner-Executor-Verifier engine.
//!
//! Drives a [`TaskPlan`] step by step through the tool runner, optionally
//! verifying each result, and escalating repeated failures to an external
//! fail-safe handler (retry / skip / manual / abort). Pause, resume, and
//! cancel are cooperative: flags observed between steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::tools::runner::{Confirmation, ToolRunner};
use crate::tools::ToolRegistry;

use super::plan::{PlanStatus, PlanStep, StepStatus, TaskPlan};

/// Poll interval while paused or waiting.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// Engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PevState {
    Idle,
    Planning,
    Executing,
    Verifying,
    HandlingFailure,
    Completed,
    Failed,
    Cancelled,
}

/// Verdict from the external verifier.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Step the verdict belongs to.
    pub step_id: String,
    /// Whether the verifier accepted the result.
    pub verified: bool,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Optional free-form notes.
    pub notes: Option<String>,
}

/// External verifier contract.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Judge one step result.
    async fn verify(&self, step: &PlanStep, result: &Value) -> anyhow::Result<VerificationResult>;
}

/// What the fail-safe handler chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailSafeAction {
    Retry,
    Skip,
    Manual,
    Abort,
}

/// A recorded fail-safe decision.
#[derive(Debug, Clone)]
pub struct FailSafeChoice {
    pub step_id: String,
    pub action: FailSafeAction,
}

/// External fail-safe handler: decides what to do after repeated failures
/// and mediates manual completion.
#[async_trait]
pub trait FailSafeHandler: Send + Sync {
    /// Whether the failure count warrants asking the user.
    fn should_ask_user(&self, consecutive_failures: u32) -> bool;

    /// Choose a recovery action for a failed step.
    async fn handle(
        &self,
        plan: &TaskPlan,
        step: &PlanStep,
        error: &str,
        consecutive_failures: u32,
    ) -> FailSafeAction;

    /// Notify that a retry was chosen.
    async fn notify_retry(&self);

    /// Notify that manual completion was chosen.
    async fn notify_manual(&self);

    /// Block until the user reports manual completion.
    async fn wait_for_manual_completion(&self);
}

/// External planner contract: turns a goal into a [`TaskPlan`].
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    /// Build a plan for the goal, with optional context.
    async fn create_plan(&self, goal: &str, context: Option<&Value>) -> anyhow::Result<TaskPlan>;
}

/// Final report of a PEV run.
#[derive(Debug, Clone)]
pub struct PevResult {
    pub plan_id: String,
    pub goal: String,
    pub success: bool,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub duration_ms: u64,
    pub verification_results: Vec<VerificationResult>,
    pub failure_choices: Vec<FailSafeChoice>,
    pub error: Option<String>,
}

/// The PEV engine. One plan at a time; `pause`/`resume`/`cancel` may be
/// called from other tasks while `run_with_plan` is in flight.
pub struct PevEngine {
    runner: Arc<ToolRunner>,
    tools: Arc<ToolRegistry>,
    verifier: Option<Arc<dyn Verifier>>,
    failsafe: Arc<dyn FailSafeHandler>,
    auto_verify: bool,
    verify_threshold: f64,
    state: Mutex<PevState>,
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl std::fmt::Debug for PevEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PevEngine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PevEngine {
    /// Engine with verification enabled at the default 0.7 threshold.
    pub fn new(
        runner: Arc<ToolRunner>,
        tools: Arc<ToolRegistry>,
        verifier: Option<Arc<dyn Verifier>>,
        failsafe: Arc<dyn FailSafeHandler>,
    ) -> Self {
        Self::with_threshold(runner, tools, verifier, failsafe, 0.7)
    }

    /// Engine with a custom verification threshold.
    pub fn with_threshold(
        runner: Arc<ToolRunner>,
        tools: Arc<ToolRegistry>,
        verifier: Option<Arc<dyn Verifier>>,
        failsafe: Arc<dyn FailSafeHandler>,
        verify_threshold: f64,
    ) -> Self {
        let auto_verify = verifier.is_some();
        Self {
            runner,
            tools,
            verifier,
            failsafe,
            auto_verify,
            verify_threshold,
            state: Mutex::new(PevState::Idle),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current engine state.
    pub fn state(&self) -> PevState {
        self.state.lock().map(|s| *s).unwrap_or(PevState::Idle)
    }

    fn set_state(&self, state: PevState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    /// Request a pause; the engine stops pulling steps until [`resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume a paused run.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Request cancellation; the in-flight step is marked failed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Plan a goal through the external planner, then execute it.
    ///
    /// Returns the plan alongside the result so callers can persist it. A
    /// planner failure yields a failed result with an empty plan.
    pub async fn run_goal(
        &self,
        planner: &dyn TaskPlanner,
        goal: &str,
        context: Option<&Value>,
        correlation_id: &str,
    ) -> (TaskPlan, PevResult) {
        self.set_state(PevState::Planning);
        let started = Instant::now();

        let mut plan = match planner.create_plan(goal, context).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "planner failed to produce a plan");
                self.set_state(PevState::Failed);
                let plan = TaskPlan::new(goal, Vec::new());
                let result = PevResult {
                    plan_id: plan.id.clone(),
                    goal: goal.to_owned(),
                    success: false,
                    completed_steps: 0,
                    failed_steps: 0,
                    skipped_steps: 0,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    verification_results: Vec::new(),
                    failure_choices: Vec::new(),
                    error: Some(format!("planning failed: {e}")),
                };
                return (plan, result);
            }
        };

        let result = self.run_with_plan(&mut plan, correlation_id).await;
        (plan, result)
    }

    /// Execute a plan through the full PEV loop.
    pub async fn run_with_plan(&self, plan: &mut TaskPlan, correlation_id: &str) -> PevResult {
        let started = Instant::now();
        self.paused.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);

        let mut verification_results = Vec::new();
        let mut failure_choices = Vec::new();
        let mut consecutive_failures: u32 = 0;

        self.set_state(PevState::Executing);
        plan.start();
        info!(plan_id = %plan.id, steps = plan.steps().len(), "plan execution started");

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                if let Some(step) = plan.running_step_mut() {
                    step.mark_failed("cancelled");
                }
                plan.cancel();
                break;
            }

            if self.paused.load(Ordering::SeqCst) {
                plan.pause();
                while self.paused.load(Ordering::SeqCst)
                    && !self.cancelled.load(Ordering::SeqCst)
                {
                    tokio::time::sleep(PAUSE_POLL).await;
                }
                plan.resume();
                continue;
            }

            let Some(step) = plan.next_step() else { break };
            let step_id = step.id.clone();
            let tool_name = step.tool.clone();
            let args = step.args.clone();
            step.set_status(StepStatus::Running);

            // Execute through the tool runner (timeouts, retries, breaker).
            let outcome = match self.tools.get(&tool_name) {
                Some(tool) => Some(
                    self.runner
                        .run(&tool, &args, Confirmation::None, correlation_id)
                        .await,
                ),
                None => None,
            };

            let (success, result, error) = match outcome {
                Some(o) if o.success => (true, o.result, None),
                Some(o) => (
                    false,
                    Value::Null,
                    Some(o.error.unwrap_or_else(|| "unknown error".to_owned())),
                ),
                None => (false, Value::Null, Some(format!("tool not found: {tool_name}"))),
            };

            if success {
                consecutive_failures = 0;

                // Verification gate.
                if self.auto_verify {
                    if let Some(verifier) = &self.verifier {
                        self.set_state(PevState::Verifying);
                        let step_snapshot = match plan.step_mut(&step_id) {
                            Some(s) => s.clone(),
                            None => continue,
                        };
                        let verdict = verifier.verify(&step_snapshot, &result).await;
                        self.set_state(PevState::Executing);

                        match verdict {
                            Ok(verification) => {
                                let passed = verification.verified
                                    && verification.confidence >= self.verify_threshold;
                                verification_results.push(verification);

                                if !passed {
                                    consecutive_failures = consecutive_failures.saturating_add(1);
                                    debug!(step = %step_id, "verification rejected step result");
                                    if self.failsafe.should_ask_user(consecutive_failures) {
                                        let handled = self
                                            .handle_step_failure(
                                                plan,
                                                &step_id,
                                                "verification failed",
                                                consecutive_failures,
                                                &mut failure_choices,
                                            )
                                            .await;
                                        if handled.reset_failures {
                                            consecutive_failures = 0;
                                        }
                                        if handled.abort {
                                            break;
                                        }
                                    } else if let Some(step) = plan.step_mut(&step_id) {
                                        step.increment_retry();
                                        if step.can_retry() {
                                            step.set_status(StepStatus::Pending);
                                        } else {
                                            step.mark_failed("verification failed");
                                        }
                                    }
                                    continue;
                                }
                            }
                            Err(e) => {
                                // Verifier outage is not a step failure.
                                warn!(error = %e, "verifier unavailable, accepting step");
                            }
                        }
                    }
                }

                if let Some(step) = plan.step_mut(&step_id) {
                    step.mark_success(result);
                }
                continue;
            }

            // Step failed.
            consecutive_failures = consecutive_failures.saturating_add(1);
            let error = error.unwrap_or_else(|| "unknown error".to_owned());

            if self.failsafe.should_ask_user(consecutive_failures) {
                let handled = self
                    .handle_step_failure(
                        plan,
                        &step_id,
                        &error,
                        consecutive_failures,
                        &mut failure_choices,
                    )
                    .await;
                if handled.reset_failures {
                    consecutive_failures = 0;
                }
                if handled.abort {
                    break;
                }
            } else {
                // Auto-retry path: consume one retry, fail at exhaustion.
                if let Some(step) = plan.step_mut(&step_id) {
                    step.increment_retry();
                    if step.can_retry() {
                        step.set_status(StepStatus::Pending);
                    } else {
                        step.mark_failed(&error);
                    }
                }
            }
        }

        // Terminal bookkeeping.
        let final_state = match plan.status() {
            PlanStatus::Cancelled => PevState::Cancelled,
            _ if plan.count_with_status(StepStatus::Failed) == 0 && plan.all_steps_terminal() => {
                plan.complete();
                PevState::Completed
            }
            _ => {
                plan.fail();
                PevState::Failed
            }
        };
        self.set_state(final_state);

        let completed = plan.count_with_status(StepStatus::Success);
        let failed = plan.count_with_status(StepStatus::Failed);
        let skipped = plan.count_with_status(StepStatus::Skipped);
        let success = plan.status() == PlanStatus::Completed;

        info!(
            plan_id = %plan.id,
            ?final_state,
            completed,
            failed,
            skipped,
            "plan execution finished"
        );

        PevResult {
            plan_id: plan.id.clone(),
            goal: plan.goal.clone(),
            success,
            completed_steps: completed,
            failed_steps: failed,
            skipped_steps: skipped,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            verification_results,
            failure_choices,
            error: if success {
                None
            } else {
                Some(format!("plan ended with status {:?}", plan.status()))
            },
        }
    }

    /// Ask the fail-safe handler and apply its choice to the step.
    async fn handle_step_failure(
        &self,
        plan: &mut TaskPlan,
        step_id: &str,
        error: &str,
        consecutive_failures: u32,
        failure_choices: &mut Vec<FailSafeChoice>,
    ) -> FailureHandled {
        self.set_state(PevState::HandlingFailure);

        let Some(step_snapshot) = plan.step_mut(step_id).map(|s| s.clone()) else {
            return FailureHandled {
                abort: false,
                reset_failures: false,
            };
        };
        let action = self
            .failsafe
            .handle(plan, &step_snapshot, error, consecutive_failures)
            .await;
        failure_choices.push(FailSafeChoice {
            step_id: step_id.to_owned(),
            action,
        });
        self.set_state(PevState::Executing);

        match action {
            FailSafeAction::Abort => {
                if let Some(step) = plan.step_mut(step_id) {
                    step.mark_failed(error);
                }
                plan.cancel();
                FailureHandled {
                    abort: true,
                    reset_failures: false,
                }
            }
            FailSafeAction::Skip => {
                if let Some(step) = plan.step_mut(step_id) {
                    step.mark_skipped();
                }
                FailureHandled {
                    abort: false,
                    reset_failures: true,
                }
            }
            FailSafeAction::Retry => {
                self.failsafe.notify_retry().await;
                if let Some(step) = plan.step_mut(step_id) {
                    step.set_status(StepStatus::Pending);
                }
                FailureHandled {
                    abort: false,
                    reset_failures: false,
                }
            }
            FailSafeAction::Manual => {
                self.failsafe.notify_manual().await;
                self.failsafe.wait_for_manual_completion().await;
                if let Some(step) = plan.step_mut(step_id) {
                    step.mark_success(serde_json::json!({"manual": true}));
                }
                FailureHandled {
                    abort: false,
                    reset_failures: true,
                }
            }
        }
    }
}

struct FailureHandled {
    abort: bool,
    reset_failures: bool,
}
