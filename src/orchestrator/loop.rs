//! The per-turn orchestrator: Plan → Execute → Finalize → Update.
//!
//! Every turn the router LLM decides (route, intent, tools, confirmation),
//! the executor runs tools behind the confirmation firewall, the finalizer
//! phrases the reply (budget and availability permitting), and the session
//! state absorbs the result. Lifecycle events fan out over the bus in a
//! fixed order: `turn.start → llm.decision → tool.* → turn.end`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{Event, EventBus, EventType};
use crate::latency::{LatencyTracker, Phase};
use crate::memory::estimate_tokens;
use crate::policy::PolicyRegistry;
use crate::providers::{FinalizerLlm, LlmMessage, OrchestratorOutput, RouterLlm};
use crate::tools::formatter::ResultFormatter;
use crate::tools::runner::{Confirmation, ToolRunner};
use crate::tools::{ErrorKind, ToolError, ToolOutcome, ToolRegistry};

use super::firewall::{ConfirmationFirewall, FirewallDecision};
use super::guard::{passes_guard, RETRY_CONSTRAINT};
use super::state::{OrchestratorState, TurnTrace};

/// Fixed Turkish apology for a failed planning phase.
const PLANNER_FAILURE_REPLY: &str = "Efendim, bir sorun oluştu. Tekrar dener misiniz?";

/// Reply when a session-level cancel aborts the turn.
const TURN_CANCELLED_REPLY: &str = "İşlem iptal edildi efendim.";

/// Finalizer system prompt: the assistant persona.
const FINALIZER_SYSTEM_PROMPT: &str = "Sen Bantz'sın — Jarvis tarzı Türkçe asistan.\n\
     - \"Efendim\" hitabı kullan\n\
     - Nazik, profesyonel ama samimi\n\
     - Kısa ve öz cevaplar (1-2 cümle ideal)\n\
     Bağlama göre doğal, yardımsever bir cevap ver. Takvim işlemlerinde sonucu özetle.";

/// How a turn ended, modeled as data rather than control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Normal reply.
    Reply,
    /// The planner asked the user a question.
    Ask,
    /// A destructive tool awaits confirmation; resume on next input.
    PendingConfirmation,
    /// The turn failed; the reply is an apology.
    Error,
}

/// Result of one processed turn.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub outcome: TurnOutcome,
    /// Final user-facing reply.
    pub reply: String,
    pub route: String,
    pub intent: String,
    /// Outcomes of every tool the firewall let through (or denied).
    pub tool_outcomes: Vec<ToolOutcome>,
    /// Correlation id stamped on this turn's events.
    pub correlation_id: String,
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Finalizer sampling temperature.
    pub finalizer_temperature: f64,
    /// Finalizer completion cap.
    pub finalizer_max_tokens: u32,
    /// Availability probe timeout.
    pub availability_probe: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            finalizer_temperature: 0.4,
            finalizer_max_tokens: 256,
            availability_probe: Duration::from_millis(1500),
        }
    }
}

/// The turn orchestrator. One instance serves many sessions; per-session
/// state is passed in and owned by the caller.
pub struct TurnOrchestrator {
    router: Arc<dyn RouterLlm>,
    finalizer: Option<Arc<dyn FinalizerLlm>>,
    tools: Arc<ToolRegistry>,
    runner: Arc<ToolRunner>,
    firewall: ConfirmationFirewall,
    policy: Arc<PolicyRegistry>,
    latency: Arc<LatencyTracker>,
    bus: Arc<EventBus>,
    formatter: Arc<dyn ResultFormatter>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TurnOrchestrator {
    /// Assemble the orchestrator. Collaborators are shared, injected by the
    /// runtime wiring.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<dyn RouterLlm>,
        finalizer: Option<Arc<dyn FinalizerLlm>>,
        tools: Arc<ToolRegistry>,
        runner: Arc<ToolRunner>,
        policy: Arc<PolicyRegistry>,
        latency: Arc<LatencyTracker>,
        bus: Arc<EventBus>,
        formatter: Arc<dyn ResultFormatter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            router,
            finalizer,
            tools,
            runner,
            firewall: ConfirmationFirewall::new(Arc::clone(&policy)),
            policy,
            latency,
            bus,
            formatter,
            config,
        }
    }

    /// Process one conversation turn against the given session state.
    pub async fn process_turn(
        &self,
        user_text: &str,
        state: &mut OrchestratorState,
    ) -> TurnOutput {
        let turn_number = state.begin_turn();
        state.reset_cancel();
        let correlation_id = Uuid::new_v4().to_string();
        let mut run = self.latency.start_run();

        debug!(session = state.session_id(), turn = turn_number, "turn started");

        let mut start_data = serde_json::Map::new();
        start_data.insert("user_input".to_owned(), json!(user_text));
        self.bus.publish(
            Event::new(EventType::TurnStart, "orchestrator", start_data.clone())
                .with_correlation(&correlation_id),
        );
        start_data.insert("session_id".to_owned(), json!(state.session_id()));
        self.bus.publish(
            Event::new(EventType::RunStarted, "orchestrator", start_data)
                .with_correlation(&correlation_id),
        );

        // ── Phase 1: Plan ───────────────────────────────────────
        let injected_summary = {
            let summary = state.rolling_summary().to_owned();
            let turns = state.conversation_len();
            state.tracer_mut().record_injection(&summary, turns)
        };

        let router_started = Instant::now();
        let plan = self
            .router
            .plan(
                user_text,
                if injected_summary.is_empty() {
                    None
                } else {
                    Some(injected_summary.as_str())
                },
            )
            .await;
        let router_ms = ms_f64(router_started);

        let output = match plan {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "router planning failed");
                return self.fail_turn(user_text, state, &correlation_id, &mut run, &e.to_string());
            }
        };
        self.latency.record_phase(&mut run, Phase::Router, router_ms);

        let mut decision_data = serde_json::Map::new();
        decision_data.insert("route".to_owned(), json!(output.route));
        decision_data.insert("intent".to_owned(), json!(output.intent));
        decision_data.insert("confidence".to_owned(), json!(output.confidence));
        decision_data.insert("tool_plan".to_owned(), json!(output.tool_plan));
        decision_data.insert(
            "requires_confirmation".to_owned(),
            json!(output.requires_confirmation),
        );
        self.bus.publish(
            Event::new(EventType::LlmDecision, "orchestrator", decision_data)
                .with_correlation(&correlation_id),
        );

        // Cancellation is honored at suspension points: after the router
        // call and between tool invocations.
        if state.cancel_requested() {
            return self.cancelled_turn(user_text, state, &correlation_id, &mut run, &output, Vec::new());
        }

        // ── Phase 2: Execute ────────────────────────────────────
        let tool_started = Instant::now();
        let (tool_outcomes, pending_prompt) = self
            .execute_tools(&output, state, &correlation_id)
            .await;
        if !output.tool_plan.is_empty() {
            self.latency
                .record_phase(&mut run, Phase::Tool, ms_f64(tool_started));
        }

        if state.cancel_requested() {
            return self.cancelled_turn(
                user_text,
                state,
                &correlation_id,
                &mut run,
                &output,
                tool_outcomes,
            );
        }

        // ── Phase 3: Finalize ───────────────────────────────────
        let (reply, outcome, finalizer_used) = if let Some(prompt) = pending_prompt {
            (prompt, TurnOutcome::PendingConfirmation, false)
        } else if output.ask_user {
            (output.question.clone(), TurnOutcome::Ask, false)
        } else {
            let (reply, used) = self
                .finalize(user_text, &output, &tool_outcomes, state, &mut run)
                .await;
            (reply, TurnOutcome::Reply, used)
        };

        // ── Phase 4: Update ─────────────────────────────────────
        self.update_state(user_text, &reply, &output, &tool_outcomes, state);

        let status = "success";
        self.publish_turn_end(&correlation_id, &output, &reply, status, finalizer_used, &mut run);

        info!(
            session = state.session_id(),
            turn = turn_number,
            route = %output.route,
            tools = tool_outcomes.len(),
            outcome = ?outcome,
            "turn completed"
        );

        TurnOutput {
            outcome,
            reply,
            route: output.route,
            intent: output.intent,
            tool_outcomes,
            correlation_id,
        }
    }

    /// Planner failure path: fixed apology, route `unknown`, error status.
    fn fail_turn(
        &self,
        user_text: &str,
        state: &mut OrchestratorState,
        correlation_id: &str,
        run: &mut crate::latency::PipelineRun,
        error: &str,
    ) -> TurnOutput {
        let mut error_data = serde_json::Map::new();
        error_data.insert("error".to_owned(), json!(error));
        self.bus.publish(
            Event::new(EventType::Error, "orchestrator", error_data)
                .with_correlation(correlation_id),
        );

        let output = OrchestratorOutput::unknown(PLANNER_FAILURE_REPLY);
        self.update_state(user_text, PLANNER_FAILURE_REPLY, &output, &[], state);
        self.publish_turn_end(correlation_id, &output, PLANNER_FAILURE_REPLY, "error", false, run);

        TurnOutput {
            outcome: TurnOutcome::Error,
            reply: PLANNER_FAILURE_REPLY.to_owned(),
            route: output.route,
            intent: output.intent,
            tool_outcomes: Vec::new(),
            correlation_id: correlation_id.to_owned(),
        }
    }

    /// Session-cancel path: record the turn, end it with `status=cancelled`.
    fn cancelled_turn(
        &self,
        user_text: &str,
        state: &mut OrchestratorState,
        correlation_id: &str,
        run: &mut crate::latency::PipelineRun,
        output: &OrchestratorOutput,
        tool_outcomes: Vec<ToolOutcome>,
    ) -> TurnOutput {
        warn!(session = state.session_id(), "turn cancelled");
        self.update_state(user_text, TURN_CANCELLED_REPLY, output, &tool_outcomes, state);
        self.publish_turn_end(correlation_id, output, TURN_CANCELLED_REPLY, "cancelled", false, run);

        TurnOutput {
            outcome: TurnOutcome::Error,
            reply: TURN_CANCELLED_REPLY.to_owned(),
            route: output.route.clone(),
            intent: output.intent.clone(),
            tool_outcomes,
            correlation_id: correlation_id.to_owned(),
        }
    }

    /// Run the planned tools serially behind the firewall.
    ///
    /// Returns the aggregated outcomes plus the confirmation prompt when the
    /// plan paused on a pending confirmation.
    async fn execute_tools(
        &self,
        output: &OrchestratorOutput,
        state: &mut OrchestratorState,
        correlation_id: &str,
    ) -> (Vec<ToolOutcome>, Option<String>) {
        let mut outcomes = Vec::new();

        for tool_name in &output.tool_plan {
            if state.cancel_requested() {
                break;
            }
            match self.firewall.check(tool_name, output, state) {
                FirewallDecision::Deny { reason } => {
                    let mut data = serde_json::Map::new();
                    data.insert("tool".to_owned(), json!(tool_name));
                    data.insert("reason".to_owned(), json!(reason));
                    data.insert(
                        "risk_level".to_owned(),
                        json!(self.policy.risk_of(tool_name).as_str()),
                    );
                    data.insert("params".to_owned(), Value::Object(output.slots.clone()));
                    self.bus.publish(
                        Event::new(EventType::ToolDenied, "orchestrator", data)
                            .with_correlation(correlation_id),
                    );
                    warn!(tool = %tool_name, reason = %reason, "firewall denied tool");

                    let error = ToolError::new(ErrorKind::PolicyDenied, reason);
                    outcomes.push(ToolOutcome::failure(tool_name, &error, 0, 0));
                }
                FirewallDecision::AwaitConfirmation { prompt } => {
                    info!(tool = %tool_name, "holding tool for confirmation");
                    let mut data = serde_json::Map::new();
                    data.insert("text".to_owned(), json!(prompt));
                    data.insert("intent".to_owned(), json!("confirmation_request"));
                    data.insert("tool".to_owned(), json!(tool_name));
                    self.bus.publish(
                        Event::new(EventType::BantzMessage, "orchestrator", data)
                            .with_correlation(correlation_id),
                    );
                    // The plan pauses here; remaining tools wait for the
                    // confirmed re-plan on the next turn. Not an error in
                    // the logging sense, but visible in the outcomes.
                    let held = ToolError::new(ErrorKind::ConfirmationRequired, "confirmation pending");
                    outcomes.push(ToolOutcome::failure(tool_name, &held, 0, 0));
                    return (outcomes, Some(prompt));
                }
                FirewallDecision::Execute { confirmation } => {
                    if confirmation == Confirmation::User {
                        let mut data = serde_json::Map::new();
                        data.insert("tool".to_owned(), json!(tool_name));
                        data.insert(
                            "risk_level".to_owned(),
                            json!(self.policy.risk_of(tool_name).as_str()),
                        );
                        data.insert("params".to_owned(), Value::Object(output.slots.clone()));
                        self.bus.publish(
                            Event::new(EventType::ToolConfirmed, "orchestrator", data)
                                .with_correlation(correlation_id),
                        );
                    }

                    let outcome = match self.tools.get(tool_name) {
                        Some(tool) => {
                            self.runner
                                .run(&tool, &output.slots, confirmation, correlation_id)
                                .await
                        }
                        None => {
                            let error = ToolError::new(
                                ErrorKind::Internal,
                                format!("tool not found: {tool_name}"),
                            );
                            let failed = ToolOutcome::failure(tool_name, &error, 0, 0);
                            let mut data = serde_json::Map::new();
                            data.insert("tool".to_owned(), json!(tool_name));
                            data.insert("error".to_owned(), json!(error.message));
                            data.insert("error_kind".to_owned(), json!(error.kind.as_str()));
                            data.insert("elapsed_ms".to_owned(), json!(0));
                            data.insert(
                                "risk_level".to_owned(),
                                json!(self.policy.risk_of(tool_name).as_str()),
                            );
                            data.insert("success".to_owned(), json!(false));
                            self.bus.publish(
                                Event::new(EventType::ToolFailed, "orchestrator", data)
                                    .with_correlation(correlation_id),
                            );
                            failed
                        }
                    };
                    outcomes.push(outcome);
                }
            }
        }

        (outcomes, None)
    }

    /// Phase 3: produce the final reply.
    ///
    /// Degradation ladder: finalizer → planner reply → aggregate error text.
    /// Returns the reply and whether the finalizer was actually used.
    async fn finalize(
        &self,
        user_text: &str,
        output: &OrchestratorOutput,
        tool_outcomes: &[ToolOutcome],
        state: &OrchestratorState,
        run: &mut crate::latency::PipelineRun,
    ) -> (String, bool) {
        let failed: Vec<&ToolOutcome> = tool_outcomes.iter().filter(|o| !o.success).collect();
        if !failed.is_empty() {
            let mut lines = vec!["Üzgünüm efendim, bazı işlemler başarısız oldu:".to_owned()];
            for outcome in &failed {
                lines.push(format!(
                    "- {}: {}",
                    outcome.tool,
                    outcome.error.as_deref().unwrap_or("bilinmeyen hata")
                ));
            }
            return (lines.join("\n"), false);
        }

        let fallback = self.fallback_reply(output, tool_outcomes);

        // Latency degradation: not enough budget left for the finalizer.
        if self.latency.should_skip_finalizer(run.total_ms()) {
            debug!("skipping finalizer, end-to-end budget exhausted");
            return (fallback, false);
        }

        let Some(finalizer) = &self.finalizer else {
            return (fallback, false);
        };
        if !finalizer.is_available(self.config.availability_probe).await {
            warn!("finalizer unavailable, using planner reply");
            return (fallback, false);
        }

        let formatted_results: Vec<String> = tool_outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| self.formatter.format(&o.tool, &o.result))
            .collect();
        let results_json: Vec<String> = tool_outcomes
            .iter()
            .map(|o| o.result.to_string())
            .collect();

        let mut context_parts = Vec::new();
        let summary = state.rolling_summary();
        if !summary.is_empty() {
            context_parts.push(format!("Önceki konuşma özeti:\n{summary}"));
        }
        context_parts.push(format!("Kullanıcı: {user_text}"));
        context_parts.push(format!("Rota: {} / {}", output.route, output.intent));
        if !formatted_results.is_empty() {
            context_parts.push(format!("Araç sonuçları:\n{}", formatted_results.join("\n")));
        }
        let context = context_parts.join("\n\n");

        let finalizer_started = Instant::now();
        let user_prompt = format!(
            "{context}\n\nYukarıdaki bağlama göre kullanıcıya kısa ve öz cevap ver."
        );
        let first = self
            .chat_finalizer(finalizer.as_ref(), &user_prompt)
            .await;
        self.latency
            .record_phase(run, Phase::Finalizer, ms_f64(finalizer_started));

        let Some(first) = first else {
            return (fallback, false);
        };

        // No-new-facts guard: user input, raw results, and formatted results
        // are the only legitimate sources of numbers.
        let mut sources: Vec<&str> = vec![user_text];
        sources.extend(results_json.iter().map(String::as_str));
        sources.extend(formatted_results.iter().map(String::as_str));

        if passes_guard(&first, &sources) {
            return (first, true);
        }

        warn!("finalizer introduced new numeric facts, retrying with constraint");
        let retry_prompt = format!("{user_prompt}\n\n{RETRY_CONSTRAINT}");
        let retry = self.chat_finalizer(finalizer.as_ref(), &retry_prompt).await;

        match retry {
            Some(reply) if !reply.is_empty() && passes_guard(&reply, &sources) => (reply, true),
            _ => {
                warn!("finalizer retry still violates guard, falling back to planner reply");
                (fallback, false)
            }
        }
    }

    async fn chat_finalizer(&self, finalizer: &dyn FinalizerLlm, prompt: &str) -> Option<String> {
        let messages = [
            LlmMessage::system(FINALIZER_SYSTEM_PROMPT),
            LlmMessage::user(prompt),
        ];
        match finalizer
            .chat(
                &messages,
                self.config.finalizer_temperature,
                self.config.finalizer_max_tokens,
            )
            .await
        {
            Ok(reply) => Some(reply.trim().to_owned()),
            Err(e) => {
                warn!(error = %e, "finalizer call failed");
                None
            }
        }
    }

    /// Planner reply, or a generic Turkish completion notice when the
    /// planner left it empty after successful tools.
    fn fallback_reply(&self, output: &OrchestratorOutput, tool_outcomes: &[ToolOutcome]) -> String {
        if !output.assistant_reply.is_empty() {
            return output.assistant_reply.clone();
        }
        let successes = tool_outcomes.iter().filter(|o| o.success).count();
        match successes {
            0 => "Üzgünüm efendim, bir sonuç bulamadım.".to_owned(),
            1 => "Tamamlandı efendim.".to_owned(),
            n => format!("{n} işlem tamamlandı efendim."),
        }
    }

    /// Phase 4: fold the turn into the session state.
    fn update_state(
        &self,
        user_text: &str,
        reply: &str,
        output: &OrchestratorOutput,
        tool_outcomes: &[ToolOutcome],
        state: &mut OrchestratorState,
    ) {
        if !output.memory_update.is_empty() {
            let before_tokens = estimate_tokens(state.rolling_summary());
            let update = state.append_summary(&output.memory_update);
            if update.trimmed {
                let after_tokens = estimate_tokens(state.rolling_summary());
                state
                    .tracer_mut()
                    .record_trim(before_tokens, after_tokens, "summary_char_cap");
            }
        }

        state.add_conversation_turn(user_text, reply);
        for outcome in tool_outcomes {
            state.add_tool_result(outcome.clone());
        }

        state.set_trace(TurnTrace {
            route: output.route.clone(),
            intent: output.intent.clone(),
            confidence: output.confidence,
            tool_plan_len: output.tool_plan.len(),
            tools_executed: tool_outcomes.len(),
            tools_success: tool_outcomes.iter().map(|o| o.success).collect(),
            requires_confirmation: output.requires_confirmation,
            ask_user: output.ask_user,
            reasoning_summary: output.reasoning_summary.clone(),
        });

        let record = state.tracer_mut().end_turn();
        debug!(trace = %record.to_trace_line(), "memory trace");
    }

    fn publish_turn_end(
        &self,
        correlation_id: &str,
        output: &OrchestratorOutput,
        reply: &str,
        status: &str,
        finalizer_used: bool,
        run: &mut crate::latency::PipelineRun,
    ) {
        self.latency.finish_run(run);

        let model = if finalizer_used { "finalizer" } else { "router" };
        let mut completed = serde_json::Map::new();
        completed.insert("route".to_owned(), json!(output.route));
        completed.insert("intent".to_owned(), json!(output.intent));
        completed.insert("final_output".to_owned(), json!(reply));
        completed.insert("model".to_owned(), json!(model));
        completed.insert("status".to_owned(), json!(status));
        self.bus.publish(
            Event::new(EventType::RunCompleted, "orchestrator", completed)
                .with_correlation(correlation_id),
        );

        let mut end_data = serde_json::Map::new();
        end_data.insert("elapsed_ms".to_owned(), json!(run.total_ms()));
        end_data.insert("route".to_owned(), json!(output.route));
        end_data.insert("intent".to_owned(), json!(output.intent));
        end_data.insert("confidence".to_owned(), json!(output.confidence));
        end_data.insert("status".to_owned(), json!(status));
        self.bus.publish(
            Event::new(EventType::TurnEnd, "orchestrator", end_data)
                .with_correlation(correlation_id),
        );
    }
}

#[allow(clippy::arithmetic_side_effects)]
fn ms_f64(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
