//! Confirmation firewall flows: missing planner confirmation, the two-turn
//! round trip, and the destructive-execution invariant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bantz::latency::LatencyBudgetConfig;
use bantz::orchestrator::{OrchestratorState, TurnOutcome};
use bantz::tools::ErrorKind;

use crate::harness::{
    delete_output, event_types, make_orchestrator, CalendarDeleteTool, ScriptedRouter,
};

/// Destructive tool without the planner confirmation flag: the firewall
/// blocks it, `tool.denied` fires, no pending slot is written, and the tool
/// never runs.
#[tokio::test]
async fn destructive_without_planner_confirmation_is_denied() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (orchestrator, bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![delete_output(false)])),
        None,
        vec![Arc::new(CalendarDeleteTool {
            calls: Arc::clone(&calls),
        })],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    let output = orchestrator
        .process_turn("ilk toplantıyı iptal et", &mut state)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0, "tool must not execute");
    assert!(!state.has_pending_confirmation());
    assert!(output.reply.starts_with("Üzgünüm efendim"));

    let types = event_types(&bus);
    assert!(types.contains(&"tool.denied".to_owned()));
    assert!(!types.contains(&"tool.call".to_owned()));
    assert!(!types.contains(&"tool.executed".to_owned()));

    let denied = bus
        .recent_events()
        .into_iter()
        .find(|e| e.event_type == "tool.denied")
        .expect("denied event");
    assert_eq!(denied.str_field("reason"), Some("confirmation missing"));
    assert_eq!(denied.str_field("risk_level"), Some("destructive"));

    // The denial surfaces as a policy_denied outcome, not an exception.
    assert_eq!(output.tool_outcomes.len(), 1);
    assert_eq!(
        output.tool_outcomes[0].error_kind,
        Some(ErrorKind::PolicyDenied)
    );
}

/// Two-turn confirmation round trip: turn A stores the pending slot and
/// replies with the prompt; turn B executes with confirmation and emits
/// `tool.confirmed` + `tool.executed`.
#[tokio::test]
async fn confirmation_round_trip() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (orchestrator, bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![
            delete_output(true),
            delete_output(true),
        ])),
        None,
        vec![Arc::new(CalendarDeleteTool {
            calls: Arc::clone(&calls),
        })],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");

    // Turn A: ask, do not execute.
    let first = orchestrator
        .process_turn("sprint toplantısını sil", &mut state)
        .await;
    assert_eq!(first.outcome, TurnOutcome::PendingConfirmation);
    assert_eq!(first.reply, "'Sprint' etkinliği silinsin mi?");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let pending = state.pending_confirmation().expect("pending stored");
    assert_eq!(pending.tool, "calendar.delete_event");

    // Turn B: the user agreed; pending clears and the tool runs.
    let second = orchestrator.process_turn("evet", &mut state).await;
    assert_eq!(second.outcome, TurnOutcome::Reply);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!state.has_pending_confirmation());
    assert!(!second.reply.is_empty());

    let types = event_types(&bus);
    assert!(types.contains(&"tool.confirmed".to_owned()));
    assert!(types.contains(&"tool.executed".to_owned()));

    let executed = bus
        .recent_events()
        .into_iter()
        .find(|e| e.event_type == "tool.executed")
        .expect("executed event");
    assert_eq!(executed.str_field("confirmation"), Some("user"));
}

/// Destructive-confirmation invariant: across a mixed sequence of turns,
/// every executed destructive call happened with a matching pending slot.
#[tokio::test]
async fn destructive_execution_always_followed_pending_confirmation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (orchestrator, bus) = make_orchestrator(
        Arc::new(ScriptedRouter::new(vec![
            delete_output(false), // denied
            delete_output(true),  // stores pending
            delete_output(true),  // executes
        ])),
        None,
        vec![Arc::new(CalendarDeleteTool {
            calls: Arc::clone(&calls),
        })],
        LatencyBudgetConfig::default(),
    );

    let mut state = OrchestratorState::new("s1");
    orchestrator.process_turn("toplantıyı sil", &mut state).await;
    orchestrator.process_turn("toplantıyı sil", &mut state).await;
    orchestrator.process_turn("evet", &mut state).await;

    // The single execution happened on the confirmed turn only.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let executed: Vec<_> = bus
        .recent_events()
        .into_iter()
        .filter(|e| e.event_type == "tool.executed")
        .collect();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].str_field("confirmation"), Some("user"));
}
