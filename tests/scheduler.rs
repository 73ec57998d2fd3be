//! Integration tests for `src/scheduler/`.

#[path = "scheduler/recurring_test.rs"]
mod recurring_test;
