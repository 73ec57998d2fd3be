//! The turn orchestrator: session state, confirmation firewall, the
//! no-new-facts guard, and the Plan → Execute → Finalize → Update loop.

pub mod firewall;
pub mod guard;
pub mod r#loop;
pub mod state;

pub use firewall::{ConfirmationFirewall, FirewallDecision};
pub use r#loop::{OrchestratorConfig, TurnOrchestrator, TurnOutcome, TurnOutput};
pub use state::{OrchestratorState, PendingConfirmation, SessionCancel};
