//! Tool contract and registry.
//!
//! A tool is a named async callable with a static spec: parameter schema,
//! declared risk level, and optional timeout / retry caps. Tools are
//! executed only through the [`runner::ToolRunner`], which adds validation,
//! timeouts, bounded retries, and the circuit breaker.

pub mod breaker;
pub mod formatter;
pub mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::ToolRisk;

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Classified tool failure. Never a bare string: the kind drives retry and
/// surfacing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Network,
    Timeout,
    Permission,
    RateLimit,
    Internal,
    PolicyDenied,
    ConfirmationRequired,
    CircuitOpen,
}

impl ErrorKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Permission => "permission",
            Self::RateLimit => "rate_limit",
            Self::Internal => "internal",
            Self::PolicyDenied => "policy_denied",
            Self::ConfirmationRequired => "confirmation_required",
            Self::CircuitOpen => "circuit_open",
        }
    }

    /// Whether the runner may retry after this failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::RateLimit)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified tool error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ToolError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool spec and result
// ---------------------------------------------------------------------------

/// One declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// JSON type name: `string`, `integer`, `number`, `boolean`, `object`,
    /// `array`.
    pub param_type: String,
    /// Whether the parameter must be present.
    pub required: bool,
}

impl ParamSpec {
    /// Required parameter of the given type.
    pub fn required(param_type: &str) -> Self {
        Self {
            param_type: param_type.to_owned(),
            required: true,
        }
    }

    /// Optional parameter of the given type.
    pub fn optional(param_type: &str) -> Self {
        Self {
            param_type: param_type.to_owned(),
            required: false,
        }
    }
}

/// Static description of a tool. Immutable after registration.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Dotted tool name, e.g. `calendar.list_events`.
    pub name: String,
    /// Parameter schema keyed by name.
    pub params: HashMap<String, ParamSpec>,
    /// Declared risk level.
    pub risk: ToolRisk,
    /// Per-call timeout in seconds; the runner floors and caps this.
    pub timeout_secs: Option<u64>,
    /// Retry cap for retryable error kinds.
    pub max_retries: Option<u32>,
}

impl ToolSpec {
    /// Minimal spec with no parameters.
    pub fn new(name: &str, risk: ToolRisk) -> Self {
        Self {
            name: name.to_owned(),
            params: HashMap::new(),
            risk,
            timeout_secs: None,
            max_retries: None,
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, name: &str, spec: ParamSpec) -> Self {
        self.params.insert(name.to_owned(), spec);
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set the retry cap.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Outcome of one tool invocation. Safe to serialize: it is logged and
/// cached by bus subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Tool name.
    pub tool: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result payload on success.
    pub result: Value,
    /// Error message on failure.
    pub error: Option<String>,
    /// Failure class on failure.
    pub error_kind: Option<ErrorKind>,
    /// Wall-clock duration of the call, retries included.
    pub elapsed_ms: u64,
    /// Retries spent before the final outcome.
    pub retries_used: u32,
}

impl ToolOutcome {
    /// Successful outcome.
    pub fn success(tool: &str, result: Value, elapsed_ms: u64, retries_used: u32) -> Self {
        Self {
            tool: tool.to_owned(),
            success: true,
            result,
            error: None,
            error_kind: None,
            elapsed_ms,
            retries_used,
        }
    }

    /// Failed outcome.
    pub fn failure(tool: &str, error: &ToolError, elapsed_ms: u64, retries_used: u32) -> Self {
        Self {
            tool: tool.to_owned(),
            success: false,
            result: Value::Null,
            error: Some(error.message.clone()),
            error_kind: Some(error.kind),
            elapsed_ms,
            retries_used,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait and registry
// ---------------------------------------------------------------------------

/// The tool contract. Implementations must be idempotent for retryable
/// error classes, since the runner re-invokes them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static spec: name, schema, risk, timeout, retry cap.
    fn spec(&self) -> ToolSpec;

    /// Execute with validated parameters.
    async fn call(&self, params: &serde_json::Map<String, Value>) -> Result<Value, ToolError>;
}

/// Registry of available tools, keyed by name. Built once at wiring time.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .finish()
    }
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its spec name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.spec().name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("test.echo", ToolRisk::Safe)
                .with_param("text", ParamSpec::required("string"))
        }

        async fn call(&self, params: &serde_json::Map<String, Value>) -> Result<Value, ToolError> {
            Ok(params.get("text").cloned().unwrap_or(Value::Null))
        }
    }

    #[test]
    fn registry_lookup_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("test.echo").is_some());
        assert!(registry.get("test.missing").is_none());
        assert_eq!(registry.names(), vec!["test.echo"]);
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Permission.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
        assert!(!ErrorKind::CircuitOpen.is_retryable());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).expect("serialize");
        assert_eq!(json, "\"rate_limit\"");
    }

    #[test]
    fn outcome_roundtrips_through_json() {
        let error = ToolError::new(ErrorKind::Timeout, "deadline exceeded");
        let outcome = ToolOutcome::failure("test.echo", &error, 1200, 2);
        let json = serde_json::to_string(&outcome).expect("serialize");
        let back: ToolOutcome = serde_json::from_str(&json).expect("deserialize");
        assert!(!back.success);
        assert_eq!(back.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(back.retries_used, 2);
    }
}
