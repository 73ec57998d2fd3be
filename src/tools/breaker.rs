//! Per-domain circuit breaker.
//!
//! Repeated failures against one domain open its circuit; further calls
//! short-circuit with a `circuit_open` error until a success (recorded after
//! a half-open probe) resets the counter. The domain is derived from a URL
//! parameter when present, otherwise the tool name — one flaky host must not
//! take unrelated tools down with it.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::{info, warn};
use url::Url;

/// Failures before the circuit opens.
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Per-domain failure statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainStats {
    /// Consecutive failures recorded.
    pub consecutive_failures: u32,
    /// Lifetime successes.
    pub successes: u64,
    /// Lifetime failures.
    pub failures: u64,
}

/// Circuit breaker keyed by derived domain.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    stats: Mutex<HashMap<String, DomainStats>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl CircuitBreaker {
    /// Breaker with a custom threshold.
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Whether calls to this domain are currently suppressed.
    pub fn is_open(&self, domain: &str) -> bool {
        self.stats
            .lock()
            .map(|s| {
                s.get(domain)
                    .is_some_and(|d| d.consecutive_failures >= self.failure_threshold)
            })
            .unwrap_or(false)
    }

    /// Record a success; closes the circuit for the domain.
    pub fn record_success(&self, domain: &str) {
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.entry(domain.to_owned()).or_default();
            if entry.consecutive_failures >= self.failure_threshold {
                info!(domain, "circuit closed after success");
            }
            entry.consecutive_failures = 0;
            entry.successes = entry.successes.saturating_add(1);
        }
    }

    /// Record a failure; may open the circuit.
    pub fn record_failure(&self, domain: &str) {
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.entry(domain.to_owned()).or_default();
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            entry.failures = entry.failures.saturating_add(1);
            if entry.consecutive_failures == self.failure_threshold {
                warn!(
                    domain,
                    failures = entry.consecutive_failures,
                    "circuit opened"
                );
            }
        }
    }

    /// Snapshot of one domain's stats.
    pub fn stats(&self, domain: &str) -> DomainStats {
        self.stats
            .lock()
            .map(|s| s.get(domain).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Derive the breaker key for a call: the hostname of any URL-valued
/// parameter, else the tool name.
pub fn derive_domain(tool: &str, params: &serde_json::Map<String, Value>) -> String {
    for value in params.values() {
        if let Value::String(s) = value {
            if s.starts_with("http://") || s.starts_with("https://") {
                if let Ok(url) = Url::parse(s) {
                    if let Some(host) = url.host_str() {
                        return host.to_owned();
                    }
                }
            }
        }
    }
    tool.to_owned()
}
