#![allow(clippy::arithmetic_side_effects)] // f64 budget math throughout

//! Voice pipeline latency budget: per-phase deadlines, rolling percentile
//! windows, and degradation recommendations.
//!
//! The pipeline phases run in a fixed order (ASR → Router → Tool → Finalizer
//! → TTS). Each phase has a budget in milliseconds; exceeding it yields a
//! fixed degradation action and, where applicable, a Turkish feedback phrase
//! spoken while the slow phase is still working.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Deserialize;
use tracing::warn;

/// Samples retained per phase for percentile calculation.
const MAX_SAMPLES: usize = 500;

/// Feedback phrase spoken when the tool phase blocks.
const TOOL_FEEDBACK_PHRASE: &str = "Bir bakayım efendim...";

/// Feedback phrase spoken when finalization blocks.
const FINALIZER_FEEDBACK_PHRASE: &str = "Hemen söylüyorum...";

// ---------------------------------------------------------------------------
// Phases and degradation actions
// ---------------------------------------------------------------------------

/// Pipeline phases in execution order. A phase may be skipped but never
/// re-ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Asr,
    Router,
    Tool,
    Finalizer,
    Tts,
}

impl Phase {
    /// All phases, in pipeline order.
    pub const ALL: [Phase; 5] = [
        Phase::Asr,
        Phase::Router,
        Phase::Tool,
        Phase::Finalizer,
        Phase::Tts,
    ];

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asr => "asr",
            Self::Router => "router",
            Self::Tool => "tool",
            Self::Finalizer => "finalizer",
            Self::Tts => "tts",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Asr => 0,
            Self::Router => 1,
            Self::Tool => 2,
            Self::Finalizer => 3,
            Self::Tts => 4,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommended fallback when a phase exceeds its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationAction {
    None,
    /// Commit the partial ASR transcript instead of waiting.
    UsePartialAsr,
    /// Serve the route from the pre-route cache.
    UsePrerouteCache,
    /// Run the tool asynchronously and speak a feedback phrase.
    AsyncToolWithFeedback,
    /// Skip the finalizer and answer with the small-model reply.
    SkipFinalizerUseFallback,
    /// Play pre-cached audio for common phrases.
    UseCachedTts,
}

impl DegradationAction {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::UsePartialAsr => "use_partial_asr",
            Self::UsePrerouteCache => "use_preroute_cache",
            Self::AsyncToolWithFeedback => "async_tool_with_feedback",
            Self::SkipFinalizerUseFallback => "skip_finalizer_use_fallback",
            Self::UseCachedTts => "use_cached_tts",
        }
    }
}

fn degradation_for(phase: Phase) -> DegradationAction {
    match phase {
        Phase::Asr => DegradationAction::UsePartialAsr,
        Phase::Router => DegradationAction::UsePrerouteCache,
        Phase::Tool => DegradationAction::AsyncToolWithFeedback,
        Phase::Finalizer => DegradationAction::SkipFinalizerUseFallback,
        Phase::Tts => DegradationAction::UseCachedTts,
    }
}

fn feedback_phrase_for(phase: Phase) -> &'static str {
    match phase {
        Phase::Tool => TOOL_FEEDBACK_PHRASE,
        Phase::Finalizer => FINALIZER_FEEDBACK_PHRASE,
        Phase::Asr | Phase::Router | Phase::Tts => "",
    }
}

// ---------------------------------------------------------------------------
// Budget configuration
// ---------------------------------------------------------------------------

/// Per-phase budgets plus the end-to-end cap, in milliseconds.
///
/// Loadable from the `voice_pipeline.latency_budget` section of
/// `model-settings.yaml`; a missing file or section falls back to defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LatencyBudgetConfig {
    pub asr_max_ms: f64,
    pub router_max_ms: f64,
    pub tool_max_ms: f64,
    pub finalizer_max_ms: f64,
    pub tts_max_ms: f64,
    pub end_to_end_max_ms: f64,
}

impl Default for LatencyBudgetConfig {
    fn default() -> Self {
        Self {
            asr_max_ms: 500.0,
            router_max_ms: 100.0,
            tool_max_ms: 1000.0,
            finalizer_max_ms: 500.0,
            tts_max_ms: 300.0,
            end_to_end_max_ms: 2000.0,
        }
    }
}

impl LatencyBudgetConfig {
    /// Load from `model-settings.yaml`. Falls back to defaults when the file
    /// or the `voice_pipeline.latency_budget` section is missing or invalid.
    pub fn from_yaml(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "latency config not readable, using defaults");
                return Self::default();
            }
        };
        Self::from_yaml_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "latency config invalid, using defaults");
            Self::default()
        })
    }

    /// Parse the `voice_pipeline.latency_budget` section out of a YAML
    /// document.
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let section = doc
            .get("voice_pipeline")
            .and_then(|v| v.get("latency_budget"));
        match section {
            Some(value) => Ok(serde_yaml::from_value(value.clone())?),
            None => Ok(Self::default()),
        }
    }

    /// Budget for one phase.
    pub fn phase_budget(&self, phase: Phase) -> PhaseBudget {
        let max_ms = match phase {
            Phase::Asr => self.asr_max_ms,
            Phase::Router => self.router_max_ms,
            Phase::Tool => self.tool_max_ms,
            Phase::Finalizer => self.finalizer_max_ms,
            Phase::Tts => self.tts_max_ms,
        };
        PhaseBudget {
            phase,
            max_ms,
            degradation: degradation_for(phase),
            feedback_phrase: feedback_phrase_for(phase),
        }
    }

    /// True when the remaining end-to-end budget cannot fit the finalizer.
    pub fn should_skip_finalizer(&self, elapsed_so_far_ms: f64) -> bool {
        self.end_to_end_max_ms - elapsed_so_far_ms < self.finalizer_max_ms
    }
}

/// Budget for a single phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseBudget {
    pub phase: Phase,
    pub max_ms: f64,
    pub degradation: DegradationAction,
    pub feedback_phrase: &'static str,
}

impl PhaseBudget {
    /// Whether an elapsed time exceeds this budget.
    pub fn is_exceeded(&self, elapsed_ms: f64) -> bool {
        elapsed_ms > self.max_ms
    }
}

// ---------------------------------------------------------------------------
// Phase records and pipeline runs
// ---------------------------------------------------------------------------

/// Timing record for one executed phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub elapsed_ms: f64,
    pub budget_ms: f64,
    pub exceeded: bool,
    pub degradation: DegradationAction,
    pub feedback_phrase: &'static str,
}

impl PhaseRecord {
    /// Positive = under budget, negative = over.
    pub fn headroom_ms(&self) -> f64 {
        self.budget_ms - self.elapsed_ms
    }
}

/// Full end-to-end timing for one utterance.
///
/// Opened by [`LatencyTracker::start_run`], receives one record per phase
/// that actually executes, closed by [`LatencyTracker::finish_run`].
#[derive(Debug)]
pub struct PipelineRun {
    records: Vec<PhaseRecord>,
    started: Instant,
    closed_ms: Option<f64>,
}

impl PipelineRun {
    /// Phase records appended so far, in execution order.
    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    /// Total elapsed for the run. Uses the wall-clock span once closed,
    /// floored at the sum of recorded phase times so accounting holds even
    /// when phases were timed externally.
    pub fn total_ms(&self) -> f64 {
        let recorded: f64 = self.records.iter().map(|r| r.elapsed_ms).sum();
        match self.closed_ms {
            Some(span) => span.max(recorded),
            None => recorded,
        }
    }

    /// Records whose phases blew their budget.
    pub fn exceeded_phases(&self) -> Vec<&PhaseRecord> {
        self.records.iter().filter(|r| r.exceeded).collect()
    }

    /// Feedback phrases to inject for slow phases.
    pub fn feedback_phrases(&self) -> Vec<&'static str> {
        self.records
            .iter()
            .filter(|r| r.exceeded && !r.feedback_phrase.is_empty())
            .map(|r| r.feedback_phrase)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Per-phase p50/p95 statistics over the rolling window.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStats {
    pub p50: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl PhaseStats {
    fn empty() -> Self {
        Self {
            p50: 0.0,
            p95: 0.0,
            min: 0.0,
            max: 0.0,
            count: 0,
        }
    }
}

/// Linear-interpolated percentile over an unsorted sample list.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(samples: &[f64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let k = (sorted.len().saturating_sub(1)) as f64 * (pct / 100.0);
    let f = k.floor();
    let idx = f as usize;
    match sorted.get(idx.saturating_add(1)) {
        Some(next) => sorted[idx] + (next - sorted[idx]) * (k - f),
        None => sorted[sorted.len().saturating_sub(1)],
    }
}

fn stats_of(samples: &[f64]) -> PhaseStats {
    if samples.is_empty() {
        return PhaseStats::empty();
    }
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    PhaseStats {
        p50: percentile(samples, 50.0),
        p95: percentile(samples, 95.0),
        min,
        max,
        count: samples.len(),
    }
}

/// Per-phase latency tracker with bounded rolling windows.
///
/// Concurrent `record_phase` calls on different runs never interfere: the
/// run is exclusive to its caller and samples are appended under a per-phase
/// lock.
pub struct LatencyTracker {
    config: LatencyBudgetConfig,
    max_samples: usize,
    samples: [Mutex<VecDeque<f64>>; 5],
    e2e_samples: Mutex<VecDeque<f64>>,
    total_runs: AtomicU64,
    exceeded_runs: AtomicU64,
}

impl std::fmt::Debug for LatencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyTracker")
            .field("config", &self.config)
            .field("total_runs", &self.total_runs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LatencyTracker {
    /// Create a tracker with the given budget configuration.
    pub fn new(config: LatencyBudgetConfig) -> Self {
        Self::with_max_samples(config, MAX_SAMPLES)
    }

    /// Create a tracker with a custom window size (for tests).
    pub fn with_max_samples(config: LatencyBudgetConfig, max_samples: usize) -> Self {
        Self {
            config,
            max_samples,
            samples: std::array::from_fn(|_| Mutex::new(VecDeque::with_capacity(max_samples))),
            e2e_samples: Mutex::new(VecDeque::with_capacity(max_samples)),
            total_runs: AtomicU64::new(0),
            exceeded_runs: AtomicU64::new(0),
        }
    }

    /// Budget configuration in effect.
    pub fn config(&self) -> &LatencyBudgetConfig {
        &self.config
    }

    /// Open a new pipeline run.
    pub fn start_run(&self) -> PipelineRun {
        PipelineRun {
            records: Vec::new(),
            started: Instant::now(),
            closed_ms: None,
        }
    }

    /// Record one phase's latency into the run and the rolling window.
    ///
    /// Logs a warning and fills the degradation action and feedback phrase
    /// when the budget is exceeded.
    pub fn record_phase(&self, run: &mut PipelineRun, phase: Phase, elapsed_ms: f64) -> PhaseRecord {
        let budget = self.config.phase_budget(phase);
        let exceeded = budget.is_exceeded(elapsed_ms);
        let record = PhaseRecord {
            phase,
            elapsed_ms,
            budget_ms: budget.max_ms,
            exceeded,
            degradation: if exceeded {
                budget.degradation
            } else {
                DegradationAction::None
            },
            feedback_phrase: if exceeded { budget.feedback_phrase } else { "" },
        };
        run.records.push(record.clone());

        if let Ok(mut window) = self.samples[phase.index()].lock() {
            if window.len() >= self.max_samples {
                window.pop_front();
            }
            window.push_back(elapsed_ms);
        }

        if exceeded {
            warn!(
                phase = %phase,
                elapsed_ms,
                budget_ms = budget.max_ms,
                degradation = record.degradation.as_str(),
                "phase exceeded latency budget"
            );
        }
        record
    }

    /// Close a run and fold its total into the end-to-end window.
    #[allow(clippy::cast_precision_loss)]
    pub fn finish_run(&self, run: &mut PipelineRun) {
        let span_ms = run.started.elapsed().as_secs_f64() * 1000.0;
        run.closed_ms = Some(span_ms);

        if let Ok(mut window) = self.e2e_samples.lock() {
            if window.len() >= self.max_samples {
                window.pop_front();
            }
            window.push_back(run.total_ms());
        }

        self.total_runs.fetch_add(1, Ordering::Relaxed);
        if !run.exceeded_phases().is_empty() {
            self.exceeded_runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// p50 / p95 / min / max for one phase's rolling window.
    pub fn phase_stats(&self, phase: Phase) -> PhaseStats {
        self.samples[phase.index()]
            .lock()
            .map(|w| stats_of(&w.iter().copied().collect::<Vec<_>>()))
            .unwrap_or_else(|_| PhaseStats::empty())
    }

    /// End-to-end percentiles.
    pub fn e2e_stats(&self) -> PhaseStats {
        self.e2e_samples
            .lock()
            .map(|w| stats_of(&w.iter().copied().collect::<Vec<_>>()))
            .unwrap_or_else(|_| PhaseStats::empty())
    }

    /// True when the remaining end-to-end budget cannot fit the finalizer.
    pub fn should_skip_finalizer(&self, elapsed_so_far_ms: f64) -> bool {
        self.config.should_skip_finalizer(elapsed_so_far_ms)
    }

    /// Full metric export suitable for logging or a dashboard.
    #[allow(clippy::cast_precision_loss)]
    pub fn dashboard(&self) -> serde_json::Value {
        let total = self.total_runs.load(Ordering::Relaxed);
        let exceeded = self.exceeded_runs.load(Ordering::Relaxed);
        let violation_rate = if total > 0 {
            exceeded as f64 / total as f64
        } else {
            0.0
        };

        let mut phases = serde_json::Map::new();
        for phase in Phase::ALL {
            let stats = self.phase_stats(phase);
            phases.insert(
                phase.as_str().to_owned(),
                serde_json::json!({
                    "p50": stats.p50,
                    "p95": stats.p95,
                    "min": stats.min,
                    "max": stats.max,
                    "count": stats.count,
                }),
            );
        }

        let e2e = self.e2e_stats();
        serde_json::json!({
            "total_runs": total,
            "exceeded_runs": exceeded,
            "budget_violation_rate": violation_rate,
            "end_to_end": {
                "p50": e2e.p50,
                "p95": e2e.p95,
                "min": e2e.min,
                "max": e2e.max,
                "count": e2e.count,
            },
            "phases": phases,
            "budget_config": {
                "asr_max_ms": self.config.asr_max_ms,
                "router_max_ms": self.config.router_max_ms,
                "tool_max_ms": self.config.tool_max_ms,
                "finalizer_max_ms": self.config.finalizer_max_ms,
                "tts_max_ms": self.config.tts_max_ms,
                "end_to_end_max_ms": self.config.end_to_end_max_ms,
            },
        })
    }

    /// Clear all samples and counters.
    pub fn reset(&self) {
        for window in &self.samples {
            if let Ok(mut w) = window.lock() {
                w.clear();
            }
        }
        if let Ok(mut w) = self.e2e_samples.lock() {
            w.clear();
        }
        self.total_runs.store(0, Ordering::Relaxed);
        self.exceeded_runs.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_budget_table() {
        let config = LatencyBudgetConfig::default();
        assert_eq!(config.asr_max_ms, 500.0);
        assert_eq!(config.router_max_ms, 100.0);
        assert_eq!(config.tool_max_ms, 1000.0);
        assert_eq!(config.finalizer_max_ms, 500.0);
        assert_eq!(config.tts_max_ms, 300.0);
        assert_eq!(config.end_to_end_max_ms, 2000.0);
    }

    #[test]
    fn yaml_section_overrides_defaults() {
        let yaml = r"
voice_pipeline:
  latency_budget:
    asr_max_ms: 400
    router_max_ms: 80
    tool_max_ms: 900
    finalizer_max_ms: 450
    tts_max_ms: 250
    end_to_end_max_ms: 1800
";
        let config = LatencyBudgetConfig::from_yaml_str(yaml).expect("parse");
        assert_eq!(config.router_max_ms, 80.0);
        assert_eq!(config.end_to_end_max_ms, 1800.0);
    }

    #[test]
    fn missing_yaml_section_falls_back() {
        let config = LatencyBudgetConfig::from_yaml_str("other: {}").expect("parse");
        assert_eq!(config, LatencyBudgetConfig::default());
    }

    #[test]
    fn record_within_budget_has_no_degradation() {
        let tracker = LatencyTracker::new(LatencyBudgetConfig::default());
        let mut run = tracker.start_run();
        let record = tracker.record_phase(&mut run, Phase::Asr, 320.0);
        assert!(!record.exceeded);
        assert_eq!(record.degradation, DegradationAction::None);
        assert_eq!(record.feedback_phrase, "");
        assert_eq!(record.headroom_ms(), 180.0);
    }

    #[test]
    fn tool_overrun_recommends_async_with_feedback() {
        let tracker = LatencyTracker::new(LatencyBudgetConfig::default());
        let mut run = tracker.start_run();
        let record = tracker.record_phase(&mut run, Phase::Tool, 1400.0);
        assert!(record.exceeded);
        assert_eq!(record.degradation, DegradationAction::AsyncToolWithFeedback);
        assert_eq!(record.feedback_phrase, "Bir bakayım efendim...");
    }

    #[test]
    fn exceeded_iff_elapsed_over_budget() {
        let tracker = LatencyTracker::new(LatencyBudgetConfig::default());
        let mut run = tracker.start_run();
        // Exactly at budget is not exceeded.
        assert!(!tracker.record_phase(&mut run, Phase::Router, 100.0).exceeded);
        assert!(tracker.record_phase(&mut run, Phase::Router, 100.1).exceeded);
    }

    #[test]
    fn run_total_covers_recorded_phases() {
        let tracker = LatencyTracker::new(LatencyBudgetConfig::default());
        let mut run = tracker.start_run();
        tracker.record_phase(&mut run, Phase::Asr, 120.0);
        tracker.record_phase(&mut run, Phase::Router, 40.0);
        tracker.record_phase(&mut run, Phase::Tool, 1400.0);
        tracker.finish_run(&mut run);

        let recorded: f64 = run.records().iter().map(|r| r.elapsed_ms).sum();
        assert!(recorded <= run.total_ms());
        assert_eq!(run.exceeded_phases().len(), 1);
        assert_eq!(run.feedback_phrases(), vec!["Bir bakayım efendim..."]);
    }

    #[test]
    fn should_skip_finalizer_when_budget_gone() {
        let config = LatencyBudgetConfig::default();
        // 2000 - 1600 = 400 < 500 → skip.
        assert!(config.should_skip_finalizer(1600.0));
        // 2000 - 1400 = 600 ≥ 500 → keep.
        assert!(!config.should_skip_finalizer(1400.0));
    }

    #[test]
    fn percentile_interpolates() {
        let samples = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&samples, 50.0), 25.0);
        assert_eq!(percentile(&samples, 100.0), 40.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn phase_window_is_bounded() {
        let tracker = LatencyTracker::with_max_samples(LatencyBudgetConfig::default(), 10);
        for i in 0..25 {
            let mut run = tracker.start_run();
            tracker.record_phase(&mut run, Phase::Router, f64::from(i));
        }
        let stats = tracker.phase_stats(Phase::Router);
        assert_eq!(stats.count, 10);
        // Oldest samples evicted: window holds 15..=24.
        assert_eq!(stats.min, 15.0);
        assert_eq!(stats.max, 24.0);
    }

    #[test]
    fn dashboard_reports_violation_rate() {
        let tracker = LatencyTracker::new(LatencyBudgetConfig::default());

        let mut ok_run = tracker.start_run();
        tracker.record_phase(&mut ok_run, Phase::Router, 50.0);
        tracker.finish_run(&mut ok_run);

        let mut slow_run = tracker.start_run();
        tracker.record_phase(&mut slow_run, Phase::Tool, 1500.0);
        tracker.finish_run(&mut slow_run);

        let dashboard = tracker.dashboard();
        assert_eq!(dashboard["total_runs"], 2);
        assert_eq!(dashboard["exceeded_runs"], 1);
        assert_eq!(dashboard["budget_violation_rate"], 0.5);
        assert_eq!(dashboard["phases"]["tool"]["count"], 1);
    }

    #[test]
    fn reset_clears_everything() {
        let tracker = LatencyTracker::new(LatencyBudgetConfig::default());
        let mut run = tracker.start_run();
        tracker.record_phase(&mut run, Phase::Asr, 100.0);
        tracker.finish_run(&mut run);

        tracker.reset();
        assert_eq!(tracker.phase_stats(Phase::Asr).count, 0);
        assert_eq!(tracker.e2e_stats().count, 0);
        assert_eq!(tracker.dashboard()["total_runs"], 0);
    }
}
