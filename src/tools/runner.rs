//! Tool runner: validation, timeout, bounded retries, circuit breaker, and
//! lifecycle events.
//!
//! Retry policy: `network`, `timeout`, and `rate_limit` failures retry with
//! the fixed backoff schedule; `validation`, `permission`, and `internal`
//! failures stop immediately. An open circuit short-circuits before the tool
//! is invoked at all. A tool's declared timeout is the hard bound for its
//! calls; tools that declare none get the 20 s default.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::events::{Event, EventBus, EventType};
use crate::policy::PolicyRegistry;

use super::breaker::{derive_domain, CircuitBreaker};
use super::{ErrorKind, Tool, ToolError, ToolOutcome, ToolSpec};

/// Timeout used when the tool spec declares none.
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Default retry cap when the spec does not set one.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Fixed backoff schedule in seconds; the last value repeats.
const RETRY_DELAYS_SECS: [u64; 3] = [1, 3, 7];

/// Characters of the result kept in the `tool.call` summary payload.
const RESULT_SUMMARY_MAX_CHARS: usize = 200;

/// How the firewall authorized a call; stamped on emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Safe/moderate tool, no confirmation involved.
    Auto,
    /// The user explicitly confirmed.
    User,
    /// Background execution with no user in the loop.
    None,
}

impl Confirmation {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::User => "user",
            Self::None => "none",
        }
    }
}

/// Executes tools with the full reliability envelope.
pub struct ToolRunner {
    bus: Arc<EventBus>,
    policy: Arc<PolicyRegistry>,
    breaker: Arc<CircuitBreaker>,
    /// Sleeps disabled under test; delays still computed and observable.
    skip_backoff: bool,
}

impl std::fmt::Debug for ToolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRunner").finish_non_exhaustive()
    }
}

impl ToolRunner {
    /// Runner publishing to the given bus.
    pub fn new(bus: Arc<EventBus>, policy: Arc<PolicyRegistry>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            bus,
            policy,
            breaker,
            skip_backoff: false,
        }
    }

    /// Runner that skips backoff sleeps (tests).
    pub fn without_backoff(
        bus: Arc<EventBus>,
        policy: Arc<PolicyRegistry>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            bus,
            policy,
            breaker,
            skip_backoff: true,
        }
    }

    /// Backoff delay before retry number `retry` (0-based). The schedule's
    /// last value repeats.
    pub fn retry_delay(retry: u32) -> Duration {
        let idx = usize::try_from(retry)
            .unwrap_or(usize::MAX)
            .min(RETRY_DELAYS_SECS.len().saturating_sub(1));
        Duration::from_secs(RETRY_DELAYS_SECS[idx])
    }

    /// Effective timeout: the spec's own value when declared, else the
    /// 20 s default.
    fn effective_timeout(spec: &ToolSpec) -> Duration {
        Duration::from_secs(spec.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Execute one tool call end to end.
    ///
    /// Emits `tool.call` + `tool.executed` on success and `tool.failed` on
    /// terminal failure. Never returns an error: failures surface as a
    /// `ToolOutcome` with `success=false`.
    pub async fn run(
        &self,
        tool: &Arc<dyn Tool>,
        params: &serde_json::Map<String, Value>,
        confirmation: Confirmation,
        correlation_id: &str,
    ) -> ToolOutcome {
        let spec = tool.spec();
        let started = Instant::now();

        // Parameter validation: missing required is terminal, no retry.
        if let Err(error) = validate_params(&spec, params) {
            let outcome = ToolOutcome::failure(&spec.name, &error, elapsed_ms(started), 0);
            self.publish_failure(&spec, params, &outcome, correlation_id);
            return outcome;
        }

        // Circuit check before invoking anything.
        let domain = derive_domain(&spec.name, params);
        if self.breaker.is_open(&domain) {
            let error = ToolError::new(
                ErrorKind::CircuitOpen,
                format!("circuit open for {domain}"),
            );
            let outcome = ToolOutcome::failure(&spec.name, &error, elapsed_ms(started), 0);
            self.publish_failure(&spec, params, &outcome, correlation_id);
            return outcome;
        }

        let max_retries = spec.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        let timeout = Self::effective_timeout(&spec);
        let mut retries_used: u32 = 0;

        loop {
            let attempt = tokio::time::timeout(timeout, tool.call(params)).await;
            let result = match attempt {
                Ok(inner) => inner,
                Err(_) => Err(ToolError::new(
                    ErrorKind::Timeout,
                    format!("timed out after {}s", timeout.as_secs()),
                )),
            };

            match result {
                Ok(value) => {
                    self.breaker.record_success(&domain);
                    let outcome =
                        ToolOutcome::success(&spec.name, value, elapsed_ms(started), retries_used);
                    self.publish_success(&spec, params, &outcome, confirmation, correlation_id);
                    return outcome;
                }
                Err(error) => {
                    self.breaker.record_failure(&domain);
                    let can_retry = error.kind.is_retryable() && retries_used < max_retries;
                    if !can_retry {
                        let outcome = ToolOutcome::failure(
                            &spec.name,
                            &error,
                            elapsed_ms(started),
                            retries_used,
                        );
                        self.publish_failure(&spec, params, &outcome, correlation_id);
                        return outcome;
                    }

                    let delay = Self::retry_delay(retries_used);
                    debug!(
                        tool = %spec.name,
                        retry = retries_used,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "retrying tool call"
                    );
                    retries_used = retries_used.saturating_add(1);
                    if !self.skip_backoff {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    fn publish_success(
        &self,
        spec: &ToolSpec,
        params: &serde_json::Map<String, Value>,
        outcome: &ToolOutcome,
        confirmation: Confirmation,
        correlation_id: &str,
    ) {
        let risk = self.policy.risk_of(&spec.name);
        let result_summary: String = outcome
            .result
            .to_string()
            .chars()
            .take(RESULT_SUMMARY_MAX_CHARS)
            .collect();

        let mut data = serde_json::Map::new();
        data.insert("tool".to_owned(), json!(spec.name));
        data.insert("params".to_owned(), Value::Object(params.clone()));
        data.insert("result".to_owned(), outcome.result.clone());
        data.insert("result_summary".to_owned(), json!(result_summary));
        data.insert("elapsed_ms".to_owned(), json!(outcome.elapsed_ms));
        data.insert("confirmation".to_owned(), json!(confirmation.as_str()));
        data.insert("risk_level".to_owned(), json!(risk.as_str()));
        data.insert("success".to_owned(), json!(true));

        self.bus.publish(
            Event::new(EventType::ToolCall, "tool_runner", data.clone())
                .with_correlation(correlation_id),
        );
        self.bus.publish(
            Event::new(EventType::ToolExecuted, "tool_runner", data)
                .with_correlation(correlation_id),
        );
    }

    fn publish_failure(
        &self,
        spec: &ToolSpec,
        params: &serde_json::Map<String, Value>,
        outcome: &ToolOutcome,
        correlation_id: &str,
    ) {
        let risk = self.policy.risk_of(&spec.name);
        warn!(
            tool = %spec.name,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            kind = ?outcome.error_kind,
            retries = outcome.retries_used,
            "tool call failed"
        );

        let mut data = serde_json::Map::new();
        data.insert("tool".to_owned(), json!(spec.name));
        data.insert("params".to_owned(), Value::Object(params.clone()));
        data.insert(
            "error".to_owned(),
            json!(outcome.error.as_deref().unwrap_or("unknown")),
        );
        data.insert(
            "error_kind".to_owned(),
            json!(outcome.error_kind.map(ErrorKind::as_str).unwrap_or("internal")),
        );
        data.insert("elapsed_ms".to_owned(), json!(outcome.elapsed_ms));
        data.insert("risk_level".to_owned(), json!(risk.as_str()));
        data.insert("success".to_owned(), json!(false));

        self.bus.publish(
            Event::new(EventType::ToolFailed, "tool_runner", data)
                .with_correlation(correlation_id),
        );
    }
}

/// Validate params against the spec: every required parameter must be
/// present. Type names are advisory; only presence is enforced here.
fn validate_params(
    spec: &ToolSpec,
    params: &serde_json::Map<String, Value>,
) -> Result<(), ToolError> {
    for (name, param) in &spec.params {
        if param.required && !params.contains_key(name) {
            return Err(ToolError::new(
                ErrorKind::Validation,
                format!("missing required parameter: {name}"),
            ));
        }
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
