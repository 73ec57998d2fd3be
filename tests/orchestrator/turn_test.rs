//! Full-turn flows: safe reads, event ordering, planner failure, memory
//! updates.

use std::sync::Arc;

use async_trait::async_trait;

use bantz::latency::LatencyBudgetConfig;
use bantz::orchestrator::{OrchestratorState, TurnOutcome};
use bantz::providers::{OrchestratorOutput, RouterLlm};

use crate::harness::{
    calendar_query_output, event_types, make_orchestrator, CalendarListTool, ScriptedFinalizer,
    ScriptedRouter,
};

/// Safe read with no confirmation: finalizer called once, the event
/// sequence is exactly the expected lifecycle, reply is Turkish and
/// non-empty.
#[tokio::test]
async fn safe_read_without_confirmation() {
    let finalizer = Arc::new(ScriptedFinalizer::new(&["3 etkinlik bulundu efendim."]));
    let (orchestrator, bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        Some(Arc::clone(&finalizer) as Arc<dyn bantz::providers::FinalizerLlm>),
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün takvimde ne var", &mut state)
        .await;

    assert_eq!(output.outcome, TurnOutcome::Reply);
    assert_eq!(output.reply, "3 etkinlik bulundu efendim.");
    assert_eq!(output.route, "calendar");
    assert_eq!(finalizer.call_count(), 1);
    assert!(!state.has_pending_confirmation());

    // Core lifecycle events appear in order.
    let types = event_types(&bus);
    let core: Vec<&str> = types
        .iter()
        .map(String::as_str)
        .filter(|t| {
            matches!(
                *t,
                "turn.start" | "llm.decision" | "tool.call" | "tool.executed" | "turn.end"
            )
        })
        .collect();
    assert_eq!(
        core,
        vec!["turn.start", "llm.decision", "tool.call", "tool.executed", "turn.end"]
    );
}

/// Exactly one `turn.start` and one `turn.end` per turn, with every
/// `tool.*` event between them, and a single correlation id throughout.
#[tokio::test]
async fn event_ordering_invariant() {
    let (orchestrator, bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![
            calendar_query_output(),
            calendar_query_output(),
        ])),
        None,
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let first = orchestrator.process_turn("bugün ne var", &mut state).await;
    let second = orchestrator.process_turn("yarın ne var", &mut state).await;
    assert_ne!(first.correlation_id, second.correlation_id);

    for correlation in [&first.correlation_id, &second.correlation_id] {
        let events: Vec<_> = bus
            .recent_events()
            .into_iter()
            .filter(|e| e.correlation_id.as_deref() == Some(correlation.as_str()))
            .collect();

        let starts = events.iter().filter(|e| e.event_type == "turn.start").count();
        let ends = events.iter().filter(|e| e.event_type == "turn.end").count();
        assert_eq!(starts, 1);
        assert_eq!(ends, 1);

        let start_idx = events
            .iter()
            .position(|e| e.event_type == "turn.start")
            .expect("start");
        let end_idx = events
            .iter()
            .position(|e| e.event_type == "turn.end")
            .expect("end");
        for (i, event) in events.iter().enumerate() {
            if event.event_type.starts_with("tool.") {
                assert!(i > start_idx && i < end_idx, "tool event outside turn");
            }
        }
    }
}

/// Planner failure: Turkish apology, route `unknown`, `turn.end` carries
/// `status=error`.
#[tokio::test]
async fn planner_failure_yields_apology() {
    struct FailingRouter;

    #[async_trait]
    impl RouterLlm for FailingRouter {
        async fn plan(
            &self,
            _user_text: &str,
            _dialog_summary: Option<&str>,
        ) -> anyhow::Result<OrchestratorOutput> {
            anyhow::bail!("connection refused")
        }
    }

    let (orchestrator, bus) = make_orchestrator(
        Arc::new(FailingRouter),
        None,
        vec![],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator.process_turn("merhaba", &mut state).await;

    assert_eq!(output.outcome, TurnOutcome::Error);
    assert_eq!(output.route, "unknown");
    assert!(output.reply.contains("Efendim"));

    let events = bus.recent_events();
    let end = events
        .iter()
        .find(|e| e.event_type == "turn.end")
        .expect("turn.end");
    assert_eq!(end.str_field("status"), Some("error"));
    assert!(events.iter().any(|e| e.event_type == "error"));
}

/// Memory update flows into the rolling summary and the conversation ring;
/// applying the same turn twice from the same starting state is
/// deterministic.
#[tokio::test]
async fn memory_update_is_deterministic() {
    let run_once = || async {
        let mut output = calendar_query_output();
        output.memory_update = "Tur 1: kullanıcı takvimini sordu, 3 etkinlik bulundu".to_owned();
        let (orchestrator, _bus) = make_orchestrator(
            Arc::new(ScriptedRouter::new(vec![output])),
            None,
            vec![Arc::new(CalendarListTool)],
            LatencyBudgetConfig::default(),
        );
        let mut state = OrchestratorState::new("s1");
        orchestrator.process_turn("bugün ne var", &mut state).await;
        (
            state.rolling_summary().to_owned(),
            state.conversation_len(),
            state.trace().tools_executed,
        )
    };

    let first = run_once().await;
    let second = run_once().await;
    assert_eq!(first, second);
    assert!(first.0.contains("takvimini sordu"));
    assert_eq!(first.1, 1);
    assert_eq!(first.2, 1);
}

/// A session-level cancel lands between tools: the in-flight tool finishes,
/// the rest of the plan is abandoned, and `turn.end` carries
/// `status=cancelled`.
#[tokio::test]
async fn session_cancel_aborts_between_tools() {
    use bantz::policy::ToolRisk;
    use bantz::tools::{Tool, ToolError, ToolSpec};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct SlowCalendarTool;

    #[async_trait]
    impl Tool for SlowCalendarTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("calendar.list_events", ToolRisk::Safe)
        }

        async fn call(
            &self,
            _params: &serde_json::Map<String, Value>,
        ) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(json!({"ok": true, "events": []}))
        }
    }

    let mut planner_output = calendar_query_output();
    planner_output.tool_plan = vec![
        "calendar.list_events".to_owned(),
        "calendar.list_events".to_owned(),
    ];

    let (orchestrator, bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![planner_output])),
        None,
        vec![Arc::new(SlowCalendarTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let cancel = state.cancel_handle();

    let (output, ()) = tokio::join!(
        orchestrator.process_turn("bugün ne var", &mut state),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    );

    assert_eq!(output.outcome, TurnOutcome::Error);
    assert_eq!(output.tool_outcomes.len(), 1, "second tool never ran");

    let end = bus
        .recent_events()
        .into_iter()
        .find(|e| e.event_type == "turn.end")
        .expect("turn.end");
    assert_eq!(end.str_field("status"), Some("cancelled"));
}

/// Without a finalizer the planner reply is used directly.
#[tokio::test]
async fn missing_finalizer_degrades_to_planner_reply() {
    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        None,
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün takvimde ne var", &mut state)
        .await;

    assert_eq!(output.reply, "Takviminize bakıyorum efendim.");
}

/// ask_user short-circuits tools and the finalizer.
#[tokio::test]
async fn ask_user_returns_question() {
    let mut planner_output = OrchestratorOutput {
        route: "calendar".to_owned(),
        intent: "create".to_owned(),
        ask_user: true,
        question: "Hangi gün için efendim?".to_owned(),
        ..OrchestratorOutput::default()
    };
    planner_output.confidence = 0.6;

    let finalizer = Arc::new(ScriptedFinalizer::new(&["kullanılmamalı"]));
    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![planner_output])),
        Some(Arc::clone(&finalizer) as Arc<dyn bantz::providers::FinalizerLlm>),
        vec![],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator.process_turn("toplantı ekle", &mut state).await;

    assert_eq!(output.outcome, TurnOutcome::Ask);
    assert_eq!(output.reply, "Hangi gün için efendim?");
    assert_eq!(finalizer.call_count(), 0);
}
