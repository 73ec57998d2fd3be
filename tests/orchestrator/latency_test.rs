//! Latency degradation at the turn level: when the end-to-end budget cannot
//! fit the finalizer, the orchestrator answers with the planner reply.

use std::sync::Arc;

use bantz::latency::{DegradationAction, LatencyBudgetConfig, LatencyTracker, Phase};
use bantz::orchestrator::OrchestratorState;
use bantz::providers::FinalizerLlm;

use crate::harness::{
    calendar_query_output, make_orchestrator, CalendarListTool, ScriptedFinalizer, ScriptedRouter,
};

/// A slow tool phase produces the async-with-feedback recommendation and the
/// Turkish feedback phrase, and exhausts the finalizer budget.
#[test]
fn tool_overrun_recommends_feedback_and_finalizer_skip() {
    let config = LatencyBudgetConfig::default();
    let tracker = LatencyTracker::new(config.clone());
    let mut run = tracker.start_run();

    tracker.record_phase(&mut run, Phase::Asr, 120.0);
    tracker.record_phase(&mut run, Phase::Router, 40.0);
    let record = tracker.record_phase(&mut run, Phase::Tool, 1400.0);

    assert!(record.exceeded);
    assert_eq!(record.degradation, DegradationAction::AsyncToolWithFeedback);
    assert_eq!(record.feedback_phrase, "Bir bakayım efendim...");

    // 120 + 40 + 1400 = 1560 elapsed; 2000 − 1560 = 440 < 500.
    assert!(config.should_skip_finalizer(run.total_ms()));
}

/// With a zero end-to-end budget the orchestrator never calls the
/// finalizer and emits the planner reply.
#[tokio::test]
async fn exhausted_budget_skips_finalizer() {
    let finalizer = Arc::new(ScriptedFinalizer::new(&["kullanılmamalı"]));
    let config = LatencyBudgetConfig {
        end_to_end_max_ms: 0.0,
        ..LatencyBudgetConfig::default()
    };
    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        Some(Arc::clone(&finalizer) as Arc<dyn FinalizerLlm>),
        vec![Arc::new(CalendarListTool)],
        config,
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün takvimde ne var", &mut state)
        .await;

    assert_eq!(output.reply, "Takviminize bakıyorum efendim.");
    assert_eq!(finalizer.call_count(), 0);
}

/// An unavailable finalizer degrades the same way.
#[tokio::test]
async fn unavailable_finalizer_uses_planner_reply() {
    let mut finalizer = ScriptedFinalizer::new(&["kullanılmamalı"]);
    finalizer.available = false;
    let finalizer = Arc::new(finalizer);

    let (orchestrator, _bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![calendar_query_output()])),
        Some(Arc::clone(&finalizer) as Arc<dyn FinalizerLlm>),
        vec![Arc::new(CalendarListTool)],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("bugün takvimde ne var", &mut state)
        .await;

    assert_eq!(output.reply, "Takviminize bakıyorum efendim.");
    assert_eq!(finalizer.call_count(), 0);
}
