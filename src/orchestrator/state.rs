//! Per-session orchestrator state.
//!
//! Owned by the session's turn loop; no other component mutates it. Holds
//! the rolling summary (bounded in characters, trimmed on mutation), the
//! recent-turn and tool-result rings, the pending-confirmation slot, and
//! trace metadata from the last turn.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::memory::{MemoryBudgetConfig, MemoryTracer};
use crate::tools::ToolOutcome;

/// Hard cap on the rolling summary, in characters. Trimmed on write.
pub const ROLLING_SUMMARY_MAX_CHARS: usize = 500;

/// Recent conversation turns kept per session.
const CONVERSATION_CAP: usize = 10;

/// Recent tool outcomes kept per session.
const TOOL_RESULTS_CAP: usize = 10;

/// A destructive tool waiting for explicit user approval.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    /// Tool awaiting approval.
    pub tool: String,
    /// Prompt shown to the user.
    pub prompt: String,
    /// Slot values captured when the confirmation was requested.
    pub slots: serde_json::Map<String, Value>,
}

/// One completed user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

/// Trace metadata for the most recent turn, for tests and debugging.
#[derive(Debug, Clone, Default)]
pub struct TurnTrace {
    pub route: String,
    pub intent: String,
    pub confidence: f64,
    pub tool_plan_len: usize,
    pub tools_executed: usize,
    pub tools_success: Vec<bool>,
    pub requires_confirmation: bool,
    pub ask_user: bool,
    pub reasoning_summary: String,
}

/// Outcome of a rolling-summary append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryUpdate {
    /// Characters before the cap was applied.
    pub original_chars: usize,
    /// Characters after.
    pub after_chars: usize,
    /// Whether the cap dropped the oldest prefix.
    pub trimmed: bool,
}

/// Handle for requesting cancellation of a session's in-flight turn from
/// another task. The turn aborts at its next suspension point.
#[derive(Debug, Clone)]
pub struct SessionCancel(Arc<AtomicBool>);

impl SessionCancel {
    /// Request cancellation of the current turn.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Per-session turn state. Created at session start, destroyed at close.
#[derive(Debug)]
pub struct OrchestratorState {
    session_id: String,
    turn_number: usize,
    rolling_summary: String,
    conversation: VecDeque<ConversationTurn>,
    tool_results: VecDeque<ToolOutcome>,
    pending_confirmation: Option<PendingConfirmation>,
    trace: TurnTrace,
    tracer: MemoryTracer,
    cancel_flag: Arc<AtomicBool>,
}

impl OrchestratorState {
    /// Fresh state for a session.
    pub fn new(session_id: &str) -> Self {
        Self::with_memory_config(session_id, MemoryBudgetConfig::default())
    }

    /// Fresh state with a custom memory budget.
    pub fn with_memory_config(session_id: &str, config: MemoryBudgetConfig) -> Self {
        Self {
            session_id: session_id.to_owned(),
            turn_number: 0,
            rolling_summary: String::new(),
            conversation: VecDeque::with_capacity(CONVERSATION_CAP),
            tool_results: VecDeque::with_capacity(TOOL_RESULTS_CAP),
            pending_confirmation: None,
            trace: TurnTrace::default(),
            tracer: MemoryTracer::new(config),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clonable handle other tasks can use to cancel the in-flight turn.
    pub fn cancel_handle(&self) -> SessionCancel {
        SessionCancel(Arc::clone(&self.cancel_flag))
    }

    /// Whether cancellation was requested for the current turn.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Clear the cancel flag; called when a new turn begins.
    pub fn reset_cancel(&mut self) {
        self.cancel_flag.store(false, Ordering::SeqCst);
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Turns completed or in progress.
    pub fn turn_number(&self) -> usize {
        self.turn_number
    }

    /// Advance to the next turn. Returns the new turn number.
    pub fn begin_turn(&mut self) -> usize {
        self.turn_number = self.turn_number.saturating_add(1);
        self.tracer.begin_turn(self.turn_number);
        self.turn_number
    }

    /// The memory tracer for the current turn.
    pub fn tracer_mut(&mut self) -> &mut MemoryTracer {
        &mut self.tracer
    }

    // ── rolling summary ────────────────────────────────────────

    /// Current rolling summary text.
    pub fn rolling_summary(&self) -> &str {
        &self.rolling_summary
    }

    /// Append a line to the rolling summary, enforcing the character cap on
    /// write. The oldest prefix is dropped; the newest suffix survives.
    pub fn append_summary(&mut self, update: &str) -> SummaryUpdate {
        if update.is_empty() {
            let chars = self.rolling_summary.chars().count();
            return SummaryUpdate {
                original_chars: chars,
                after_chars: chars,
                trimmed: false,
            };
        }

        let mut combined = if self.rolling_summary.is_empty() {
            update.to_owned()
        } else {
            format!("{}\n{}", self.rolling_summary, update)
        };

        let original_chars = combined.chars().count();
        let trimmed = original_chars > ROLLING_SUMMARY_MAX_CHARS;
        if trimmed {
            combined = combined
                .chars()
                .skip(original_chars.saturating_sub(ROLLING_SUMMARY_MAX_CHARS))
                .collect();
        }
        let after_chars = combined.chars().count();
        self.rolling_summary = combined;
        SummaryUpdate {
            original_chars,
            after_chars,
            trimmed,
        }
    }

    // ── conversation ring ──────────────────────────────────────

    /// Record one user/assistant exchange, evicting the oldest beyond cap.
    pub fn add_conversation_turn(&mut self, user: &str, assistant: &str) {
        if self.conversation.len() >= CONVERSATION_CAP {
            self.conversation.pop_front();
        }
        self.conversation.push_back(ConversationTurn {
            user: user.to_owned(),
            assistant: assistant.to_owned(),
        });
    }

    /// Recent exchanges, oldest first.
    pub fn conversation(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.conversation.iter()
    }

    /// Number of stored exchanges.
    pub fn conversation_len(&self) -> usize {
        self.conversation.len()
    }

    // ── tool result ring ───────────────────────────────────────

    /// Record a tool outcome, evicting the oldest beyond cap.
    pub fn add_tool_result(&mut self, outcome: ToolOutcome) {
        if self.tool_results.len() >= TOOL_RESULTS_CAP {
            self.tool_results.pop_front();
        }
        self.tool_results.push_back(outcome);
    }

    /// Recent tool outcomes, oldest first.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolOutcome> {
        self.tool_results.iter()
    }

    // ── pending confirmation ───────────────────────────────────

    /// Whether a confirmation is pending.
    pub fn has_pending_confirmation(&self) -> bool {
        self.pending_confirmation.is_some()
    }

    /// The pending confirmation, if any.
    pub fn pending_confirmation(&self) -> Option<&PendingConfirmation> {
        self.pending_confirmation.as_ref()
    }

    /// Store a pending confirmation, replacing any previous one.
    pub fn set_pending_confirmation(&mut self, pending: PendingConfirmation) {
        self.pending_confirmation = Some(pending);
    }

    /// Clear and return the pending confirmation.
    pub fn clear_pending_confirmation(&mut self) -> Option<PendingConfirmation> {
        self.pending_confirmation.take()
    }

    // ── trace ──────────────────────────────────────────────────

    /// Trace metadata from the most recent turn.
    pub fn trace(&self) -> &TurnTrace {
        &self.trace
    }

    /// Replace the turn trace.
    pub fn set_trace(&mut self, trace: TurnTrace) {
        self.trace = trace;
    }
}
