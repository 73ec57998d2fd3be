//! Confirmation firewall: the policy gate between planner output and tool
//! execution.
//!
//! The planner's confirmation flags are requests, never authority. A
//! destructive or always-confirm tool goes through here on every turn, and
//! the decision is an explicit value — the firewall never raises.

use std::sync::Arc;

use crate::policy::{confirmation_prompt, PolicyRegistry};
use crate::providers::OrchestratorOutput;
use crate::tools::runner::Confirmation;

use super::state::{OrchestratorState, PendingConfirmation};

/// What to do with one planned tool.
#[derive(Debug, Clone, PartialEq)]
pub enum FirewallDecision {
    /// Run the tool now.
    Execute {
        /// How the call was authorized; stamped on events.
        confirmation: Confirmation,
    },
    /// Hold the tool and ask the user; the prompt becomes the turn's reply.
    AwaitConfirmation {
        prompt: String,
    },
    /// Skip the tool entirely.
    Deny {
        reason: String,
    },
}

/// The policy gate. Stateless apart from the shared policy registry;
/// confirmation state lives in the session, not here.
#[derive(Debug)]
pub struct ConfirmationFirewall {
    policy: Arc<PolicyRegistry>,
}

impl ConfirmationFirewall {
    /// Firewall over the given policy registry.
    pub fn new(policy: Arc<PolicyRegistry>) -> Self {
        Self { policy }
    }

    /// Decide one planned tool against the session state.
    ///
    /// For gated tools: a planner that did not request confirmation gets a
    /// denial; a first pass stores the pending slot and asks; a matching
    /// pending slot is consumed and the call proceeds as user-confirmed.
    pub fn check(
        &self,
        tool: &str,
        output: &OrchestratorOutput,
        state: &mut OrchestratorState,
    ) -> FirewallDecision {
        let snapshot = self.policy.snapshot();
        let gated = snapshot.requires_confirmation(tool, false);

        if !gated {
            let confirmation = if output.requires_confirmation {
                // Planner asked for confirmation on an ungated tool; honor it.
                match state.pending_confirmation() {
                    Some(pending) if pending.tool == tool => {
                        state.clear_pending_confirmation();
                        return FirewallDecision::Execute {
                            confirmation: Confirmation::User,
                        };
                    }
                    _ => {
                        let prompt = self.prompt_for(tool, output);
                        state.set_pending_confirmation(PendingConfirmation {
                            tool: tool.to_owned(),
                            prompt: prompt.clone(),
                            slots: output.slots.clone(),
                        });
                        return FirewallDecision::AwaitConfirmation { prompt };
                    }
                }
            } else {
                Confirmation::Auto
            };
            return FirewallDecision::Execute { confirmation };
        }

        // Gated tool: the planner must have requested confirmation.
        if !output.requires_confirmation {
            return FirewallDecision::Deny {
                reason: "confirmation missing".to_owned(),
            };
        }

        match state.pending_confirmation() {
            Some(pending) if pending.tool == tool => {
                state.clear_pending_confirmation();
                FirewallDecision::Execute {
                    confirmation: Confirmation::User,
                }
            }
            _ => {
                // No pending slot (or a stale one for another tool): store
                // the request and ask the user first.
                let prompt = self.prompt_for(tool, output);
                state.set_pending_confirmation(PendingConfirmation {
                    tool: tool.to_owned(),
                    prompt: prompt.clone(),
                    slots: output.slots.clone(),
                });
                FirewallDecision::AwaitConfirmation { prompt }
            }
        }
    }

    /// Planner prompt when provided, else the policy template.
    fn prompt_for(&self, tool: &str, output: &OrchestratorOutput) -> String {
        if output.confirmation_prompt.is_empty() {
            confirmation_prompt(tool, &output.slots)
        } else {
            output.confirmation_prompt.clone()
        }
    }
}
