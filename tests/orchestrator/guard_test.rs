//! No-new-facts guard at the turn level: hallucinated numbers trigger one
//! constrained retry, then fall back to the planner reply.

use std::sync::Arc;

use bantz::latency::LatencyBudgetConfig;
use bantz::orchestrator::OrchestratorState;
use bantz::providers::FinalizerLlm;

use crate::harness::{
    calendar_query_output, make_orchestrator, CalendarListTool, ScriptedFinalizer, ScriptedRouter,
};

/// The finalizer hallucinates "27"; the retry answer has no numbers and is
/// accepted. Finalizer called exactly twice.
#[tokio::test]
async fn hallucinated_count_retries_once_then_accepts() {
    let finalizer = Arc::new(ScriptedFinalizer::new(&[
        "27 toplantınız var efendim.",
        "Birkaç toplantınız var efendim.",
    ]));
    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        Some(Arc::clone(&finalizer) as Arc<dyn FinalizerLlm>),
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün toplantılarım", &mut state)
        .await;

    assert_eq!(output.reply, "Birkaç toplantınız var efendim.");
    assert_eq!(finalizer.call_count(), 2);
}

/// Both attempts violate the guard: fall back to the planner reply.
#[tokio::test]
async fn persistent_violation_falls_back_to_planner_reply() {
    let finalizer = Arc::new(ScriptedFinalizer::new(&[
        "27 toplantınız var efendim.",
        "Aslında 42 toplantınız var.",
    ]));
    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        Some(Arc::clone(&finalizer) as Arc<dyn FinalizerLlm>),
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün toplantılarım", &mut state)
        .await;

    assert_eq!(output.reply, "Takviminize bakıyorum efendim.");
    assert_eq!(finalizer.call_count(), 2);
}

/// Numbers actually present in the tool results pass on the first try.
#[tokio::test]
async fn grounded_numbers_pass_first_try() {
    let finalizer = Arc::new(ScriptedFinalizer::new(&[
        "3 toplantınız var efendim, ilki 10:00'da.",
    ]));
    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        Some(Arc::clone(&finalizer) as Arc<dyn FinalizerLlm>),
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün toplantılarım", &mut state)
        .await;

    assert_eq!(output.reply, "3 toplantınız var efendim, ilki 10:00'da.");
    assert_eq!(finalizer.call_count(), 1);
}

/// An empty retry also falls back.
#[tokio::test]
async fn empty_retry_falls_back() {
    let finalizer = Arc::new(ScriptedFinalizer::new(&["99 etkinlik buldum.", ""]));
    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        Some(Arc::clone(&finalizer) as Arc<dyn FinalizerLlm>),
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün toplantılarım", &mut state)
        .await;

    assert_eq!(output.reply, "Takviminize bakıyorum efendim.");
}
