//! Topic pub/sub with wildcard subscribers, ordered middleware, and a
//! bounded recent-event ring.
//!
//! Patterns are dotted-segment: `*` matches exactly one segment, a trailing
//! `*` matches any suffix (`tool.*` covers `tool.call` and `tool.call.retry`).
//! Publishing fans out synchronously on the caller's thread; a panicking
//! handler is logged and does not stop the remaining handlers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Capacity of the recent-event inspection ring. Evicts FIFO.
const RECENT_EVENTS_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Well-known event topics published by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A conversation turn began.
    TurnStart,
    /// A conversation turn finished.
    TurnEnd,
    /// The router LLM produced a planning decision.
    LlmDecision,
    /// A tool call completed (summary form).
    ToolCall,
    /// A tool call completed (full result).
    ToolExecuted,
    /// A tool call terminally failed.
    ToolFailed,
    /// The user confirmed a destructive tool.
    ToolConfirmed,
    /// A tool was denied by the firewall.
    ToolDenied,
    /// A tracked run started.
    RunStarted,
    /// A tracked run completed.
    RunCompleted,
    /// A reminder became due.
    ReminderFired,
    /// An entity was linked into the graph store.
    GraphEntityLinked,
    /// A proactive assistant message for UI subscribers.
    BantzMessage,
    /// An unhandled runtime error.
    Error,
}

impl EventType {
    /// Dotted topic string for this event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnStart => "turn.start",
            Self::TurnEnd => "turn.end",
            Self::LlmDecision => "llm.decision",
            Self::ToolCall => "tool.call",
            Self::ToolExecuted => "tool.executed",
            Self::ToolFailed => "tool.failed",
            Self::ToolConfirmed => "tool.confirmed",
            Self::ToolDenied => "tool.denied",
            Self::RunStarted => "run.started",
            Self::RunCompleted => "run.completed",
            Self::ReminderFired => "reminder.fired",
            Self::GraphEntityLinked => "graph.entity_linked",
            Self::BantzMessage => "bantz_message",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event. Immutable once handed to [`EventBus::publish`].
///
/// `correlation_id` ties all events of one turn or one run together; the bus
/// never generates it — the producer does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dotted topic string, e.g. `tool.executed`.
    pub event_type: String,
    /// Producer name, e.g. `orchestrator` or `scheduler`.
    pub source: String,
    /// Opaque identifier tying related events together.
    pub correlation_id: Option<String>,
    /// String-keyed payload.
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Build an event from a well-known topic.
    pub fn new(
        event_type: EventType,
        source: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            event_type: event_type.as_str().to_owned(),
            source: source.to_owned(),
            correlation_id: None,
            data,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_owned());
        self
    }

    /// Fetch a string field from the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

/// Dotted-segment pattern match.
///
/// `*` matches one segment; a trailing `*` matches any non-empty suffix.
fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == event_type {
        return true;
    }

    let pat: Vec<&str> = pattern.split('.').collect();
    let typ: Vec<&str> = event_type.split('.').collect();

    for (i, seg) in pat.iter().enumerate() {
        let is_last = i == pat.len().saturating_sub(1);
        if *seg == "*" && is_last {
            // Trailing wildcard consumes the remaining segments.
            return typ.len() >= pat.len();
        }
        match typ.get(i) {
            Some(t) if *seg == "*" || seg == t => {}
            _ => return false,
        }
    }

    pat.len() == typ.len()
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// Handler invoked for each matching event.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Middleware transforms an event before dispatch. Returning `None` drops
/// the event silently and halts propagation.
pub type Middleware = Arc<dyn Fn(Event) -> Option<Event> + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

struct PatternEntry {
    pattern: String,
    handlers: Vec<(SubscriptionToken, Handler)>,
}

/// In-process pub/sub bus.
///
/// Subscriptions and middleware are process-wide and read-mostly; the
/// subscriber table is swapped under a registry lock, and handler lists are
/// snapshotted before dispatch so a handler may re-enter the bus.
pub struct EventBus {
    subscribers: RwLock<Vec<PatternEntry>>,
    middleware: RwLock<Vec<Middleware>>,
    next_token: AtomicU64,
    recent: Mutex<VecDeque<Event>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns = self
            .subscribers
            .read()
            .map(|s| s.iter().map(|e| e.pattern.clone()).collect::<Vec<_>>())
            .unwrap_or_default();
        f.debug_struct("EventBus").field("patterns", &patterns).finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            middleware: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAPACITY)),
        }
    }

    /// Register a handler for an exact topic or wildcard pattern.
    ///
    /// Dispatch order within a pattern follows registration order.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(handler);

        if let Ok(mut subs) = self.subscribers.write() {
            if let Some(entry) = subs.iter_mut().find(|e| e.pattern == pattern) {
                entry.handlers.push((token, handler));
            } else {
                subs.push(PatternEntry {
                    pattern: pattern.to_owned(),
                    handlers: vec![(token, handler)],
                });
            }
        }
        token
    }

    /// Remove a previously registered handler. Returns `true` if removed.
    pub fn unsubscribe(&self, pattern: &str, token: SubscriptionToken) -> bool {
        let Ok(mut subs) = self.subscribers.write() else {
            return false;
        };
        let Some(entry) = subs.iter_mut().find(|e| e.pattern == pattern) else {
            return false;
        };
        let before = entry.handlers.len();
        entry.handlers.retain(|(t, _)| *t != token);
        let removed = entry.handlers.len() < before;
        if entry.handlers.is_empty() {
            subs.retain(|e| e.pattern != pattern);
        }
        removed
    }

    /// Append a middleware to the chain. Middleware run in insertion order.
    pub fn add_middleware<F>(&self, middleware: F)
    where
        F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
    {
        if let Ok(mut mw) = self.middleware.write() {
            mw.push(Arc::new(middleware));
        }
    }

    /// Number of middleware currently installed.
    pub fn middleware_count(&self) -> usize {
        self.middleware.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Publish an event: run the middleware chain, then fan out to every
    /// handler whose pattern matches. Synchronous; slow subscribers slow the
    /// producer (rate-limit middleware is the mitigation).
    pub fn publish(&self, event: Event) {
        // Middleware chain. A `None` return halts propagation silently.
        let chain: Vec<Middleware> = self
            .middleware
            .read()
            .map(|m| m.clone())
            .unwrap_or_default();

        let mut current = event;
        for mw in &chain {
            match mw(current) {
                Some(next) => current = next,
                None => return,
            }
        }

        // Record into the bounded inspection ring.
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() >= RECENT_EVENTS_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(current.clone());
        }

        // Snapshot matching handlers, then dispatch outside the lock so a
        // handler may subscribe or publish without deadlocking.
        let matching: Vec<Handler> = self
            .subscribers
            .read()
            .map(|subs| {
                subs.iter()
                    .filter(|e| pattern_matches(&e.pattern, &current.event_type))
                    .flat_map(|e| e.handlers.iter().map(|(_, h)| Arc::clone(h)))
                    .collect()
            })
            .unwrap_or_default();

        for handler in matching {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&current);
            }));
            if result.is_err() {
                debug!(event_type = %current.event_type, "event handler panicked");
            }
        }
    }

    /// Snapshot of the recent-event ring, oldest first.
    pub fn recent_events(&self) -> Vec<Event> {
        self.recent
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn data(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn exact_pattern_matches() {
        assert!(pattern_matches("tool.call", "tool.call"));
        assert!(!pattern_matches("tool.call", "tool.executed"));
    }

    #[test]
    fn single_segment_wildcard() {
        assert!(pattern_matches("tool.*", "tool.call"));
        assert!(pattern_matches("*.call", "tool.call"));
        assert!(!pattern_matches("*.call", "tool.executed"));
        assert!(!pattern_matches("tool.*", "reminder.fired"));
    }

    #[test]
    fn trailing_wildcard_matches_suffix() {
        assert!(pattern_matches("tool.*", "tool.call.retry"));
        assert!(!pattern_matches("tool.*", "tool"));
    }

    #[test]
    fn subscribe_and_publish() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe("tool.*", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventType::ToolCall, "test", data(&[])));
        bus.publish(Event::new(EventType::ToolExecuted, "test", data(&[])));
        bus.publish(Event::new(EventType::ReminderFired, "test", data(&[])));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let o = Arc::clone(&order);
            bus.subscribe("turn.start", move |_| {
                if let Ok(mut v) = o.lock() {
                    v.push(tag);
                }
            });
        }

        bus.publish(Event::new(EventType::TurnStart, "test", data(&[])));
        let seen = order.lock().expect("lock");
        assert_eq!(*seen, vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let token = bus.subscribe("turn.end", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventType::TurnEnd, "test", data(&[])));
        assert!(bus.unsubscribe("turn.end", token));
        bus.publish(Event::new(EventType::TurnEnd, "test", data(&[])));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe("turn.end", token), "double unsubscribe");
    }

    #[test]
    fn middleware_can_drop_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe("error", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.add_middleware(|event| {
            if event.event_type == "error" {
                None
            } else {
                Some(event)
            }
        });

        bus.publish(Event::new(EventType::Error, "test", data(&[])));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn middleware_can_transform_events() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        bus.subscribe("turn.start", move |e| {
            if let Ok(mut v) = s.lock() {
                *v = e.str_field("tag").map(ToOwned::to_owned);
            }
        });
        bus.add_middleware(|mut event| {
            event
                .data
                .insert("tag".to_owned(), serde_json::json!("stamped"));
            Some(event)
        });

        bus.publish(Event::new(EventType::TurnStart, "test", data(&[])));
        assert_eq!(seen.lock().expect("lock").as_deref(), Some("stamped"));
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("turn.start", |_| panic!("boom"));
        let c = Arc::clone(&count);
        bus.subscribe("turn.start", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventType::TurnStart, "test", data(&[])));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn correlation_id_visible_to_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        bus.subscribe("tool.call", move |e| {
            if let Ok(mut v) = s.lock() {
                *v = e.correlation_id.clone();
            }
        });

        bus.publish(Event::new(EventType::ToolCall, "test", data(&[])).with_correlation("corr-1"));
        assert_eq!(seen.lock().expect("lock").as_deref(), Some("corr-1"));
    }

    #[test]
    fn recent_ring_evicts_fifo() {
        let bus = EventBus::new();
        for i in 0..150 {
            let mut event = Event::new(EventType::TurnStart, "test", data(&[]));
            event
                .data
                .insert("n".to_owned(), serde_json::json!(i));
            bus.publish(event);
        }
        let recent = bus.recent_events();
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].data.get("n"), Some(&serde_json::json!(50)));
        assert_eq!(recent[99].data.get("n"), Some(&serde_json::json!(149)));
    }
}
