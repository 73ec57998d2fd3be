//! Rolling conversation memory: token budgets, per-turn trace records, and
//! the enhanced summary block injected into the planner prompt.

pub mod tracer;

pub use tracer::{
    estimate_tokens, EnhancedSummary, MemoryBudgetConfig, MemoryTraceRecord, MemoryTracer,
};
