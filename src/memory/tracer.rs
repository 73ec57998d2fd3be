//! Memory injection tracing with token-budget trimming.
//!
//! Each turn the orchestrator may inject a block of prior-turn memory into
//! the planner prompt. The tracer records what was injected, trims blocks
//! that exceed the token budget (line-wise from the head, keeping the newest
//! content), and yields one [`MemoryTraceRecord`] per turn for debugging and
//! golden tests.

use tracing::debug;

/// Rough token estimate: one token per four characters, minimum one for
/// non-empty text. Good enough for budget enforcement; no tokenizer here.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

// ---------------------------------------------------------------------------
// Budget configuration
// ---------------------------------------------------------------------------

/// Budget knobs for the injected memory block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBudgetConfig {
    /// Token budget for the injected block.
    pub max_tokens: usize,
    /// Turns of history the block may represent.
    pub max_turns: usize,
    /// Whether PII filtering applies before injection.
    pub pii_filter: bool,
}

impl Default for MemoryBudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            max_turns: 10,
            pii_filter: true,
        }
    }
}

impl MemoryBudgetConfig {
    /// Build from `BANTZ_MEMORY_MAX_TOKENS`, `BANTZ_MEMORY_MAX_TURNS`,
    /// `BANTZ_MEMORY_PII_FILTER`. Unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Env-based construction with an injectable resolver (for tests).
    pub fn from_env_with(env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_tokens = env("BANTZ_MEMORY_MAX_TOKENS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_tokens);
        let max_turns = env("BANTZ_MEMORY_MAX_TURNS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_turns);
        let pii_filter = env("BANTZ_MEMORY_PII_FILTER")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(defaults.pii_filter);
        Self {
            max_tokens,
            max_turns,
            pii_filter,
        }
    }
}

// ---------------------------------------------------------------------------
// Trace record
// ---------------------------------------------------------------------------

/// What happened to memory during one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTraceRecord {
    /// 1-based turn counter.
    pub turn_number: usize,
    /// Whether a memory block was injected into the planner prompt.
    pub memory_injected: bool,
    /// Token count of the injected block (post-trim).
    pub memory_tokens: usize,
    /// How many prior turns the block represents.
    pub memory_turns_count: usize,
    /// Whether the block was trimmed to fit the budget.
    pub was_trimmed: bool,
    /// Token count before trimming.
    pub original_tokens: usize,
    /// Token count after trimming.
    pub after_trim_tokens: usize,
    /// Why the trim happened, e.g. `token_budget`.
    pub trim_reason: String,
}

impl MemoryTraceRecord {
    /// Single-line rendering for trace logs.
    pub fn to_trace_line(&self) -> String {
        let mut line = format!(
            "[memory] turn={} injected={} tokens={} turns={}",
            self.turn_number, self.memory_injected, self.memory_tokens, self.memory_turns_count
        );
        if self.was_trimmed {
            line.push_str(&format!(
                " TRIMMED {}→{} reason={}",
                self.original_tokens, self.after_trim_tokens, self.trim_reason
            ));
        }
        line
    }
}

// ---------------------------------------------------------------------------
// Tracer
// ---------------------------------------------------------------------------

/// Per-session memory tracer. Mutated only by the owning turn loop.
#[derive(Debug)]
pub struct MemoryTracer {
    config: MemoryBudgetConfig,
    current: MemoryTraceRecord,
    history: Vec<MemoryTraceRecord>,
}

impl Default for MemoryTracer {
    fn default() -> Self {
        Self::new(MemoryBudgetConfig::default())
    }
}

impl MemoryTracer {
    /// Create a tracer with the given budget.
    pub fn new(config: MemoryBudgetConfig) -> Self {
        Self {
            config,
            current: MemoryTraceRecord::default(),
            history: Vec::new(),
        }
    }

    /// Budget in effect.
    pub fn config(&self) -> &MemoryBudgetConfig {
        &self.config
    }

    /// Start tracing a turn.
    pub fn begin_turn(&mut self, turn_number: usize) {
        self.current = MemoryTraceRecord {
            turn_number,
            ..MemoryTraceRecord::default()
        };
    }

    /// Record an injected memory block, trimming it to the token budget.
    ///
    /// Returns the (possibly trimmed) text to inject. Trimming drops whole
    /// lines from the head so the newest content survives; the trim is noted
    /// on the current record.
    pub fn record_injection(&mut self, summary_text: &str, turns_count: usize) -> String {
        let original_tokens = estimate_tokens(summary_text);
        let (text, trimmed) = if original_tokens > self.config.max_tokens {
            let kept = trim_head_lines(summary_text, self.config.max_tokens);
            (kept, true)
        } else {
            (summary_text.to_owned(), false)
        };

        let final_tokens = estimate_tokens(&text);
        self.current.memory_injected = !text.is_empty();
        self.current.memory_tokens = final_tokens;
        self.current.memory_turns_count = turns_count;
        if trimmed {
            self.current.was_trimmed = true;
            self.current.original_tokens = original_tokens;
            self.current.after_trim_tokens = final_tokens;
            self.current.trim_reason = "token_budget".to_owned();
            debug!(
                original_tokens,
                after = final_tokens,
                "memory block trimmed to token budget"
            );
        }
        text
    }

    /// Record a trim performed elsewhere (e.g. the rolling summary cap).
    pub fn record_trim(&mut self, original_tokens: usize, after_tokens: usize, reason: &str) {
        self.current.was_trimmed = true;
        self.current.original_tokens = original_tokens;
        self.current.after_trim_tokens = after_tokens;
        self.current.trim_reason = reason.to_owned();
    }

    /// Finish the turn and return its record.
    pub fn end_turn(&mut self) -> MemoryTraceRecord {
        let record = std::mem::take(&mut self.current);
        debug!("{}", record.to_trace_line());
        self.history.push(record.clone());
        record
    }

    /// All completed turn records.
    pub fn history(&self) -> &[MemoryTraceRecord] {
        &self.history
    }
}

/// Drop whole lines from the head until the text fits the token budget.
fn trim_head_lines(text: &str, max_tokens: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    for start in 0..lines.len() {
        let candidate = lines[start..].join("\n");
        if estimate_tokens(&candidate) <= max_tokens {
            return candidate;
        }
    }
    // Even the last line alone is over budget; hard-cut it by characters.
    let last = lines.last().copied().unwrap_or("");
    let keep_chars = max_tokens.saturating_mul(4);
    let total = last.chars().count();
    last.chars().skip(total.saturating_sub(keep_chars)).collect()
}

// ---------------------------------------------------------------------------
// Enhanced summary
// ---------------------------------------------------------------------------

/// Structured one-turn recap used to extend the rolling summary.
///
/// Purely textual — there is no parsing contract with the LLM.
#[derive(Debug, Clone, Default)]
pub struct EnhancedSummary {
    pub turn_number: usize,
    /// Short verb phrase for the user's intent, e.g. "toplantıları sordu".
    pub user_intent: String,
    /// What the assistant did, e.g. "3 etkinlik listelendi".
    pub action_taken: String,
    /// Key entities worth preserving across turns.
    pub key_entities: Vec<String>,
    /// Result count, when the action produced a list.
    pub result_count: Option<usize>,
    /// Tool used, if any.
    pub tool_used: Option<String>,
}

impl EnhancedSummary {
    /// Render the prompt block line.
    pub fn to_block(&self) -> String {
        let mut parts = vec![format!(
            "Tur {}: {} — {}",
            self.turn_number, self.user_intent, self.action_taken
        )];
        if !self.key_entities.is_empty() {
            parts.push(format!("önemli: {}", self.key_entities.join(", ")));
        }
        if let Some(count) = self.result_count {
            parts.push(format!("sonuç: {count}"));
        }
        if let Some(tool) = &self.tool_used {
            parts.push(format!("araç: {tool}"));
        }
        parts.join(" | ")
    }
}
