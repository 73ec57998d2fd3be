#![allow(missing_docs)] // TODO: enforce once the turn-core API settles

//! Bantz — Turkish-first personal voice assistant runtime.
//!
//! This crate is the agentic turn core: the per-turn orchestrator driving a
//! Planner→Executor→Verifier loop, the confirmation firewall for destructive
//! tools, the per-phase latency budget tracker, the in-process event bus with
//! its observability/ingest/audit subscribers, rolling conversation memory,
//! the retry/timeout/circuit-breaker tool runner, and the reminder scheduler.
//!
//! LLM clients, speech engines, and service integrations live outside this
//! crate and are injected through the contracts in [`providers`], [`tools`],
//! and [`planning`].

pub mod config;
pub mod events;
pub mod graph;
pub mod latency;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod planning;
pub mod policy;
pub mod providers;
pub mod runtime;
pub mod scheduler;
pub mod tools;
