//! Runtime configuration.
//!
//! Precedence: env vars > files > defaults. The latency budget comes from
//! `model-settings.yaml` (section `voice_pipeline.latency_budget`), the tool
//! policy from `policy.json`, the memory budget from `BANTZ_MEMORY_*` env
//! vars. Missing files always degrade to defaults, never to a startup error.

use std::path::{Path, PathBuf};

use crate::latency::LatencyBudgetConfig;
use crate::memory::MemoryBudgetConfig;

/// Filesystem locations for persistent state.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Directory for SQLite stores.
    pub data_dir: PathBuf,
    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
    /// Tool risk policy document.
    pub policy_path: PathBuf,
    /// Model settings document carrying the latency budget.
    pub model_settings_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").map_or_else(|_| PathBuf::from("."), PathBuf::from);
        let base = home.join(".local").join("share").join("bantz");
        Self {
            data_dir: base.clone(),
            logs_dir: base.join("logs"),
            policy_path: PathBuf::from("config/policy.json"),
            model_settings_path: PathBuf::from("config/model-settings.yaml"),
        }
    }
}

impl PathsConfig {
    /// Reminder database path.
    pub fn reminders_db(&self) -> PathBuf {
        self.data_dir.join("reminders.db")
    }

    /// Entity graph database path.
    pub fn graph_db(&self) -> PathBuf {
        self.data_dir.join("graph.db")
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct BantzConfig {
    /// Filesystem paths.
    pub paths: PathsConfig,
    /// Per-phase latency budget.
    pub latency: LatencyBudgetConfig,
    /// Injected-memory budget.
    pub memory: MemoryBudgetConfig,
}

impl BantzConfig {
    /// Load configuration with env overrides applied.
    pub fn load() -> Self {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using an injectable env resolver (tests).
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Self {
        let mut paths = PathsConfig::default();
        if let Some(dir) = env("BANTZ_DATA_DIR") {
            paths.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env("BANTZ_LOGS_DIR") {
            paths.logs_dir = PathBuf::from(dir);
        }
        if let Some(p) = env("BANTZ_POLICY_PATH") {
            paths.policy_path = PathBuf::from(p);
        }
        if let Some(p) = env("BANTZ_MODEL_SETTINGS") {
            paths.model_settings_path = PathBuf::from(p);
        }

        let latency = LatencyBudgetConfig::from_yaml(&paths.model_settings_path);
        let memory = MemoryBudgetConfig::from_env_with(env);

        Self {
            paths,
            latency,
            memory,
        }
    }

    /// Load with paths rooted at an explicit directory (tests, one-shot CLI).
    pub fn with_data_dir(dir: &Path) -> Self {
        let mut config = Self::default();
        config.paths.data_dir = dir.to_owned();
        config.paths.logs_dir = dir.join("logs");
        config
    }
}
