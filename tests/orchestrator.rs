//! Integration tests for `src/orchestrator/`.

#[path = "orchestrator/harness.rs"]
mod harness;

#[path = "orchestrator/confirmation_test.rs"]
mod confirmation_test;
#[path = "orchestrator/guard_test.rs"]
mod guard_test;
#[path = "orchestrator/latency_test.rs"]
mod latency_test;
#[path = "orchestrator/turn_test.rs"]
mod turn_test;
