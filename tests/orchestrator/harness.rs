//! Shared mocks for the orchestrator integration tests: a scripted router,
//! a scripted finalizer, and a canned calendar tool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use bantz::events::EventBus;
use bantz::latency::{LatencyBudgetConfig, LatencyTracker};
use bantz::orchestrator::r#loop::OrchestratorConfig;
use bantz::orchestrator::TurnOrchestrator;
use bantz::policy::{PolicyRegistry, ToolRisk};
use bantz::providers::{FinalizerLlm, LlmMessage, OrchestratorOutput, RouterLlm};
use bantz::tools::breaker::CircuitBreaker;
use bantz::tools::formatter::TurkishFormatter;
use bantz::tools::runner::ToolRunner;
use bantz::tools::{ParamSpec, Tool, ToolError, ToolRegistry, ToolSpec};

/// Router that replays a fixed list of outputs, one per turn.
pub struct ScriptedRouter {
    outputs: Mutex<Vec<OrchestratorOutput>>,
}

impl ScriptedRouter {
    pub fn new(outputs: Vec<OrchestratorOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs),
        }
    }
}

#[async_trait]
impl RouterLlm for ScriptedRouter {
    async fn plan(
        &self,
        _user_text: &str,
        _dialog_summary: Option<&str>,
    ) -> anyhow::Result<OrchestratorOutput> {
        let mut outputs = self.outputs.lock().expect("lock");
        if outputs.is_empty() {
            anyhow::bail!("router script exhausted");
        }
        Ok(outputs.remove(0))
    }
}

/// Finalizer that replays fixed replies and counts calls.
pub struct ScriptedFinalizer {
    replies: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub available: bool,
}

impl ScriptedFinalizer {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| (*s).to_owned()).collect()),
            calls: AtomicUsize::new(0),
            available: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FinalizerLlm for ScriptedFinalizer {
    async fn is_available(&self, _timeout: Duration) -> bool {
        self.available
    }

    async fn chat(
        &self,
        _messages: &[LlmMessage],
        _temperature: f64,
        _max_tokens: u32,
    ) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().expect("lock");
        if replies.is_empty() {
            anyhow::bail!("finalizer script exhausted");
        }
        Ok(replies.remove(0))
    }
}

/// Calendar list tool returning three canned events.
pub struct CalendarListTool;

#[async_trait]
impl Tool for CalendarListTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("calendar.list_events", ToolRisk::Safe)
            .with_param("date", ParamSpec::optional("string"))
    }

    async fn call(&self, _params: &serde_json::Map<String, Value>) -> Result<Value, ToolError> {
        Ok(json!({
            "ok": true,
            "events": [
                {"summary": "Sprint Planlama", "start": "2026-02-12T10:00:00"},
                {"summary": "Demo", "start": "2026-02-12T14:00:00"},
                {"summary": "Retro", "start": "2026-02-12T16:00:00"},
            ]
        }))
    }
}

/// Delete tool recording whether it ran.
pub struct CalendarDeleteTool {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CalendarDeleteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("calendar.delete_event", ToolRisk::Destructive)
    }

    async fn call(&self, _params: &serde_json::Map<String, Value>) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"ok": true, "deleted": true}))
    }
}

/// Assemble an orchestrator over the given collaborators.
pub fn make_orchestrator(
    router: Arc<dyn RouterLlm>,
    finalizer: Option<Arc<dyn FinalizerLlm>>,
    tools: Vec<Arc<dyn Tool>>,
    latency_config: LatencyBudgetConfig,
) -> (TurnOrchestrator, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let policy = Arc::new(PolicyRegistry::with_fallback());
    let latency = Arc::new(LatencyTracker::new(latency_config));
    let breaker = Arc::new(CircuitBreaker::default());
    let runner = Arc::new(ToolRunner::without_backoff(
        Arc::clone(&bus),
        Arc::clone(&policy),
        breaker,
    ));

    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }

    let orchestrator = TurnOrchestrator::new(
        router,
        finalizer,
        Arc::new(registry),
        runner,
        policy,
        latency,
        Arc::clone(&bus),
        Arc::new(TurkishFormatter),
        OrchestratorConfig::default(),
    );
    (orchestrator, bus)
}

/// Planner decision for a plain calendar read.
pub fn calendar_query_output() -> OrchestratorOutput {
    OrchestratorOutput {
        route: "calendar".to_owned(),
        intent: "query".to_owned(),
        confidence: 0.9,
        tool_plan: vec!["calendar.list_events".to_owned()],
        assistant_reply: "Takviminize bakıyorum efendim.".to_owned(),
        ..OrchestratorOutput::default()
    }
}

/// Planner decision for a delete, with the confirmation flag as given.
pub fn delete_output(requires_confirmation: bool) -> OrchestratorOutput {
    let mut output = OrchestratorOutput {
        route: "calendar".to_owned(),
        intent: "delete".to_owned(),
        confidence: 0.85,
        tool_plan: vec!["calendar.delete_event".to_owned()],
        assistant_reply: "Etkinliği siliyorum.".to_owned(),
        requires_confirmation,
        ..OrchestratorOutput::default()
    };
    if requires_confirmation {
        output.confirmation_prompt = "'Sprint' etkinliği silinsin mi?".to_owned();
        output.slots.insert("title".to_owned(), json!("Sprint"));
    }
    output
}

/// Event types captured by the bus, in publish order.
pub fn event_types(bus: &EventBus) -> Vec<String> {
    bus.recent_events()
        .iter()
        .map(|e| e.event_type.clone())
        .collect()
}
