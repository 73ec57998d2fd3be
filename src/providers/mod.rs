//! LLM collaborator contracts.
//!
//! The runtime never talks to a model directly; it goes through these
//! capability-typed traits. The router plans a turn, the finalizer phrases
//! the reply. Implementations (vLLM, Gemini, local fallbacks) are injected
//! by the wiring layer and live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One chat message for the finalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl LlmMessage {
    /// System-role message.
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_owned(),
            content: content.to_owned(),
        }
    }

    /// User-role message.
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.to_owned(),
        }
    }
}

/// The planner decision for one turn.
///
/// Everything the orchestrator needs to drive the turn: routing, the ordered
/// tool plan, confirmation flags, and a tentative reply. The firewall treats
/// the confirmation flags as requests, never as authority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorOutput {
    /// Coarse route tag: `calendar`, `smalltalk`, `system`, `unknown`, …
    pub route: String,
    /// Fine intent tag within the route.
    pub intent: String,
    /// Slot values extracted from the user input.
    pub slots: serde_json::Map<String, Value>,
    /// Planner confidence in [0, 1].
    pub confidence: f64,
    /// Ordered tool names to execute.
    pub tool_plan: Vec<String>,
    /// Tentative assistant reply (used when the finalizer is skipped).
    pub assistant_reply: String,
    /// The planner wants to ask the user instead of acting.
    pub ask_user: bool,
    /// Question to ask when `ask_user` is set.
    pub question: String,
    /// The planner believes a confirmation is needed.
    pub requires_confirmation: bool,
    /// Prompt to show when asking for confirmation.
    pub confirmation_prompt: String,
    /// Text to fold into the rolling summary.
    pub memory_update: String,
    /// Short reasoning recap for tracing.
    pub reasoning_summary: String,
    /// Opaque raw planner payload.
    pub raw_output: Value,
}

impl OrchestratorOutput {
    /// Fallback output for a failed planning phase.
    pub fn unknown(reply: &str) -> Self {
        Self {
            route: "unknown".to_owned(),
            intent: "none".to_owned(),
            assistant_reply: reply.to_owned(),
            ..Self::default()
        }
    }
}

/// The router LLM: plans one turn. Synchronous from the orchestrator's view;
/// a failure is terminal for the planning phase.
#[async_trait]
pub trait RouterLlm: Send + Sync {
    /// Produce a planning decision for the user input.
    async fn plan(
        &self,
        user_text: &str,
        dialog_summary: Option<&str>,
    ) -> anyhow::Result<OrchestratorOutput>;
}

/// The finalizer LLM: phrases the final reply from tool results.
#[async_trait]
pub trait FinalizerLlm: Send + Sync {
    /// Availability probe; called with a short timeout before use.
    async fn is_available(&self, timeout: std::time::Duration) -> bool;

    /// Chat completion over the prepared messages.
    async fn chat(
        &self,
        messages: &[LlmMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> anyhow::Result<String>;
}
