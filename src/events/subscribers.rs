//! Standard bus subscribers: observability, ingest, and audit.
//!
//! Replaces imperative calls into the run tracker, ingest cache, and audit
//! sink with event-driven wiring. All subscribers are best-effort: their
//! failures are logged at DEBUG and never abort a turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

use super::bus::{Event, EventBus, EventType, SubscriptionToken};

// ---------------------------------------------------------------------------
// External contracts
// ---------------------------------------------------------------------------

/// Value-type handle to a tracked run. Carries no back-pointers; the
/// observability subscriber maps correlation ids to handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    /// Tracker-assigned run identifier.
    pub run_id: String,
}

/// One tool call as reported to the run tracker.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub run_id: String,
    pub tool: String,
    pub params: Value,
    pub result: Option<Value>,
    pub result_summary: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub confirmation: String,
    pub status: String,
}

/// External run tracker (observability backend).
pub trait RunTracker: Send + Sync {
    /// Open a run for a user input; returns a handle for later completion.
    fn start_run(&self, user_input: &str, session_id: Option<&str>) -> RunHandle;
    /// Record one tool call against an open run.
    fn record_tool_call(&self, record: ToolCallRecord);
    /// Close a run with its final routing and output.
    #[allow(clippy::too_many_arguments)]
    fn end_run(
        &self,
        handle: RunHandle,
        route: &str,
        intent: &str,
        final_output: &str,
        model: &str,
        status: &str,
    );
}

/// External result cache fed from successful tool calls.
pub trait IngestCache: Send + Sync {
    /// Store a successful tool result.
    fn store(&self, tool: &str, params: &Value, result: &Value, elapsed_ms: u64);
}

/// One entry for the append-only audit sink.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub tool: String,
    pub risk_level: String,
    pub success: bool,
    pub confirmed: bool,
    pub params: Option<Value>,
    pub error: Option<String>,
}

/// External append-only audit sink.
pub trait AuditSink: Send + Sync {
    /// Append one tool lifecycle entry.
    fn log_tool_event(&self, record: AuditRecord);
}

// ---------------------------------------------------------------------------
// Observability subscriber
// ---------------------------------------------------------------------------

/// Forwards tool and run lifecycle events to a [`RunTracker`], keyed by
/// correlation id.
pub struct ObservabilitySubscriber {
    tracker: Arc<dyn RunTracker>,
    active_runs: Mutex<HashMap<String, RunHandle>>,
}

impl ObservabilitySubscriber {
    fn new(tracker: Arc<dyn RunTracker>) -> Self {
        Self {
            tracker,
            active_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of runs currently tracked. Visible for tests.
    pub fn active_run_count(&self) -> usize {
        self.active_runs.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn handle(&self, event: &Event) {
        match event.event_type.as_str() {
            "run.started" => self.on_run_started(event),
            "run.completed" => self.on_run_completed(event),
            "tool.call" | "tool.executed" => self.on_tool_event(event, None),
            "tool.failed" => {
                let error = event.str_field("error").unwrap_or("unknown").to_owned();
                self.on_tool_event(event, Some(error));
            }
            _ => {}
        }
    }

    fn on_run_started(&self, event: &Event) {
        let user_input = event.str_field("user_input").unwrap_or("");
        let session_id = event.str_field("session_id");
        let handle = self.tracker.start_run(user_input, session_id);
        if let Some(corr) = &event.correlation_id {
            if let Ok(mut runs) = self.active_runs.lock() {
                runs.insert(corr.clone(), handle);
            }
        }
    }

    fn on_run_completed(&self, event: &Event) {
        let Some(corr) = &event.correlation_id else {
            return;
        };
        let handle = self
            .active_runs
            .lock()
            .ok()
            .and_then(|mut runs| runs.remove(corr));
        let Some(handle) = handle else { return };

        self.tracker.end_run(
            handle,
            event.str_field("route").unwrap_or(""),
            event.str_field("intent").unwrap_or(""),
            event.str_field("final_output").unwrap_or(""),
            event.str_field("model").unwrap_or(""),
            event.str_field("status").unwrap_or("success"),
        );
    }

    fn on_tool_event(&self, event: &Event, error: Option<String>) {
        let run_id = event
            .correlation_id
            .as_ref()
            .and_then(|corr| {
                self.active_runs
                    .lock()
                    .ok()
                    .and_then(|runs| runs.get(corr).map(|h| h.run_id.clone()))
            });
        let Some(run_id) = run_id else { return };

        let status = if error.is_some() { "error" } else { "success" };
        self.tracker.record_tool_call(ToolCallRecord {
            run_id,
            tool: event.str_field("tool").unwrap_or("").to_owned(),
            params: event.data.get("params").cloned().unwrap_or(Value::Null),
            result: event.data.get("result").cloned(),
            result_summary: event.str_field("result_summary").map(ToOwned::to_owned),
            error,
            elapsed_ms: event
                .data
                .get("elapsed_ms")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            confirmation: event.str_field("confirmation").unwrap_or("auto").to_owned(),
            status: status.to_owned(),
        });
    }
}

// ---------------------------------------------------------------------------
// Ingest subscriber
// ---------------------------------------------------------------------------

/// Caches successful tool results into an [`IngestCache`].
struct IngestSubscriber {
    cache: Arc<dyn IngestCache>,
}

impl IngestSubscriber {
    fn handle(&self, event: &Event) {
        let Some(tool) = event.str_field("tool") else {
            return;
        };
        // Only successful results are cached.
        let success = event
            .data
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !success {
            return;
        }
        let params = event.data.get("params").cloned().unwrap_or(Value::Null);
        let result = event.data.get("result").cloned().unwrap_or(Value::Null);
        let elapsed_ms = event
            .data
            .get("elapsed_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        self.cache.store(tool, &params, &result, elapsed_ms);
    }
}

// ---------------------------------------------------------------------------
// Audit subscriber
// ---------------------------------------------------------------------------

/// Logs every `tool.*` lifecycle event to an [`AuditSink`].
struct AuditSubscriber {
    sink: Arc<dyn AuditSink>,
}

impl AuditSubscriber {
    fn handle(&self, event: &Event) {
        let Some(tool) = event.str_field("tool") else {
            return;
        };
        let risk_level = event.str_field("risk_level").unwrap_or("safe").to_owned();
        let params = event.data.get("params").cloned();

        let record = match event.event_type.as_str() {
            "tool.call" | "tool.executed" => AuditRecord {
                tool: tool.to_owned(),
                risk_level,
                success: true,
                confirmed: event.str_field("confirmation") == Some("user"),
                params,
                error: None,
            },
            "tool.confirmed" => AuditRecord {
                tool: tool.to_owned(),
                risk_level,
                success: true,
                confirmed: true,
                params,
                error: None,
            },
            "tool.failed" => AuditRecord {
                tool: tool.to_owned(),
                risk_level,
                success: false,
                confirmed: false,
                params,
                error: Some(event.str_field("error").unwrap_or("unknown").to_owned()),
            },
            "tool.denied" => AuditRecord {
                tool: tool.to_owned(),
                risk_level,
                success: false,
                confirmed: false,
                params,
                error: Some(event.str_field("reason").unwrap_or("denied").to_owned()),
            },
            _ => return,
        };
        self.sink.log_tool_event(record);
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

fn logging_middleware() -> impl Fn(Event) -> Option<Event> {
    let counter = std::sync::atomic::AtomicU64::new(0);
    move |event: Event| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(
            n,
            event_type = %event.event_type,
            source = %event.source,
            correlation = ?event.correlation_id,
            keys = ?event.data.keys().collect::<Vec<_>>(),
            "bus event"
        );
        Some(event)
    }
}

fn rate_limit_middleware(window_ms: u64) -> impl Fn(Event) -> Option<Event> {
    let last_seen: Mutex<HashMap<String, Instant>> = Mutex::new(HashMap::new());
    move |event: Event| {
        let key = format!("{}:{}", event.event_type, event.source);
        let now = Instant::now();
        let Ok(mut seen) = last_seen.lock() else {
            return Some(event);
        };
        if let Some(last) = seen.get(&key) {
            if now.duration_since(*last).as_millis() < u128::from(window_ms) {
                debug!(event_type = %event.event_type, window_ms, "suppressed duplicate event");
                return None;
            }
        }
        seen.insert(key, now);
        Some(event)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Middleware options for [`wire_subscribers`].
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    /// Install the DEBUG event-dump middleware.
    pub logging_middleware: bool,
    /// Install the duplicate-suppression middleware.
    pub rate_limit: bool,
    /// Duplicate-suppression window in milliseconds.
    pub rate_limit_window_ms: u64,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            logging_middleware: false,
            rate_limit: false,
            rate_limit_window_ms: 100,
        }
    }
}

/// Subscriptions created by [`wire_subscribers`], kept for unwiring in tests.
pub struct WiredSubscribers {
    tokens: Vec<(String, SubscriptionToken)>,
    /// The observability subscriber, exposed for correlation-map inspection.
    pub observability: Option<Arc<ObservabilitySubscriber>>,
}

impl WiredSubscribers {
    /// Remove every wired subscription from the bus.
    pub fn unwire(&self, bus: &EventBus) {
        for (pattern, token) in &self.tokens {
            bus.unsubscribe(pattern, *token);
        }
    }
}

const OBSERVABILITY_TOPICS: [EventType; 5] = [
    EventType::ToolCall,
    EventType::ToolExecuted,
    EventType::ToolFailed,
    EventType::RunStarted,
    EventType::RunCompleted,
];

const INGEST_TOPICS: [EventType; 2] = [EventType::ToolCall, EventType::ToolExecuted];

/// Register the standard subscribers against the bus. Call once at boot.
pub fn wire_subscribers(
    bus: &EventBus,
    run_tracker: Option<Arc<dyn RunTracker>>,
    ingest_cache: Option<Arc<dyn IngestCache>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    options: &SubscriberOptions,
) -> WiredSubscribers {
    if options.logging_middleware {
        bus.add_middleware(logging_middleware());
        info!("event logging middleware enabled");
    }
    if options.rate_limit {
        bus.add_middleware(rate_limit_middleware(options.rate_limit_window_ms));
        info!(window_ms = options.rate_limit_window_ms, "rate-limit middleware enabled");
    }

    let mut tokens = Vec::new();
    let mut observability = None;

    if let Some(tracker) = run_tracker {
        let sub = Arc::new(ObservabilitySubscriber::new(tracker));
        for topic in OBSERVABILITY_TOPICS {
            let s = Arc::clone(&sub);
            tokens.push((
                topic.as_str().to_owned(),
                bus.subscribe(topic.as_str(), move |e| s.handle(e)),
            ));
        }
        info!("observability subscriber wired");
        observability = Some(sub);
    }

    if let Some(cache) = ingest_cache {
        let sub = Arc::new(IngestSubscriber { cache });
        for topic in INGEST_TOPICS {
            let s = Arc::clone(&sub);
            tokens.push((
                topic.as_str().to_owned(),
                bus.subscribe(topic.as_str(), move |e| s.handle(e)),
            ));
        }
        info!("ingest subscriber wired");
    }

    if let Some(sink) = audit_sink {
        let sub = Arc::new(AuditSubscriber { sink });
        tokens.push((
            "tool.*".to_owned(),
            bus.subscribe("tool.*", move |e| sub.handle(e)),
        ));
        info!("audit subscriber wired");
    }

    WiredSubscribers {
        tokens,
        observability,
    }
}
