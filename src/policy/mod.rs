//! Tool risk policy: risk levels, always-confirm set, and Turkish
//! confirmation prompts.
//!
//! The policy is loaded once from `policy.json` and kept as an immutable
//! snapshot behind a lock; reload swaps the whole snapshot at a single
//! assignment point so readers never observe a partial table. A missing or
//! unreadable file falls back to the built-in table.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Risk levels
// ---------------------------------------------------------------------------

/// Declared risk of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolRisk {
    /// Read-only, no side effects.
    Safe,
    /// Side effects, reversible.
    Moderate,
    /// Dangerous operations requiring confirmation.
    Destructive,
}

impl ToolRisk {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Moderate => "moderate",
            Self::Destructive => "destructive",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "safe" => Some(Self::Safe),
            "moderate" => Some(Self::Moderate),
            "destructive" => Some(Self::Destructive),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to classify a tool absent from the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedToolPolicy {
    /// Treat unknown tools as destructive.
    Deny,
    /// Treat unknown tools as moderate.
    Moderate,
}

// ---------------------------------------------------------------------------
// Policy file and snapshot
// ---------------------------------------------------------------------------

/// On-disk shape of `policy.json`.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    tool_levels: HashMap<String, String>,
    #[serde(default)]
    always_confirm_tools: Vec<String>,
    #[serde(default)]
    undefined_tool_policy: Option<String>,
}

/// Immutable, fully-resolved policy table.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    levels: HashMap<String, ToolRisk>,
    always_confirm: HashSet<String>,
    undefined: UndefinedToolPolicy,
}

impl PolicySnapshot {
    /// Risk level for a tool; unknown tools resolve via the undefined-tool
    /// policy (default deny → destructive).
    pub fn risk_of(&self, tool: &str) -> ToolRisk {
        match self.levels.get(tool) {
            Some(risk) => *risk,
            None => match self.undefined {
                UndefinedToolPolicy::Deny => ToolRisk::Destructive,
                UndefinedToolPolicy::Moderate => ToolRisk::Moderate,
            },
        }
    }

    /// The firewall rule: destructive tools and always-confirm tools require
    /// confirmation regardless of the planner's flag; everything else
    /// respects the planner.
    pub fn requires_confirmation(&self, tool: &str, planner_requested: bool) -> bool {
        if self.risk_of(tool) == ToolRisk::Destructive {
            return true;
        }
        if self.always_confirm.contains(tool) {
            return true;
        }
        planner_requested
    }

    /// Whether the tool is in the always-confirm set.
    pub fn always_confirms(&self, tool: &str) -> bool {
        self.always_confirm.contains(tool)
    }

    /// Number of tools with an explicit risk level.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

fn fallback_snapshot() -> PolicySnapshot {
    let levels: HashMap<String, ToolRisk> = [
        // SAFE
        ("calendar.list_events", ToolRisk::Safe),
        ("calendar.find_free_slots", ToolRisk::Safe),
        ("gmail.list_messages", ToolRisk::Safe),
        ("gmail.get_message", ToolRisk::Safe),
        ("gmail.unread_count", ToolRisk::Safe),
        ("gmail.smart_search", ToolRisk::Safe),
        ("contacts.list", ToolRisk::Safe),
        ("contacts.resolve", ToolRisk::Safe),
        ("time.now", ToolRisk::Safe),
        ("time.date", ToolRisk::Safe),
        ("weather.current", ToolRisk::Safe),
        ("weather.forecast", ToolRisk::Safe),
        ("web.search", ToolRisk::Safe),
        ("system.status", ToolRisk::Safe),
        ("file.read", ToolRisk::Safe),
        ("file.list", ToolRisk::Safe),
        // MODERATE
        ("gmail.send", ToolRisk::Moderate),
        ("gmail.send_draft", ToolRisk::Moderate),
        ("gmail.archive", ToolRisk::Moderate),
        ("calendar.create_event", ToolRisk::Moderate),
        ("calendar.update_event", ToolRisk::Moderate),
        ("notification.send", ToolRisk::Moderate),
        ("file.write", ToolRisk::Moderate),
        ("browser.open", ToolRisk::Moderate),
        ("app.open", ToolRisk::Moderate),
        // DESTRUCTIVE
        ("calendar.delete_event", ToolRisk::Destructive),
        ("file.delete", ToolRisk::Destructive),
        ("file.move", ToolRisk::Destructive),
        ("email.delete", ToolRisk::Destructive),
        ("payment.submit", ToolRisk::Destructive),
        ("system.shutdown", ToolRisk::Destructive),
        ("system.execute_command", ToolRisk::Destructive),
        ("app.kill", ToolRisk::Destructive),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect();

    let always_confirm: HashSet<String> = [
        "calendar.create_event",
        "calendar.update_event",
        "gmail.send",
        "gmail.send_draft",
    ]
    .into_iter()
    .map(ToOwned::to_owned)
    .collect();

    PolicySnapshot {
        levels,
        always_confirm,
        undefined: UndefinedToolPolicy::Deny,
    }
}

fn snapshot_from_file(file: PolicyFile) -> PolicySnapshot {
    let mut levels = HashMap::new();
    for (tool, risk_str) in file.tool_levels {
        match ToolRisk::parse(&risk_str) {
            Some(risk) => {
                levels.insert(tool, risk);
            }
            None => warn!(tool = %tool, risk = %risk_str, "unknown risk level in policy, skipping"),
        }
    }

    let undefined = match file.undefined_tool_policy.as_deref() {
        Some("moderate") => UndefinedToolPolicy::Moderate,
        Some("deny") | None => UndefinedToolPolicy::Deny,
        Some(other) => {
            warn!(value = %other, "unknown undefined_tool_policy, defaulting to deny");
            UndefinedToolPolicy::Deny
        }
    };

    PolicySnapshot {
        levels,
        always_confirm: file.always_confirm_tools.into_iter().collect(),
        undefined,
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide, read-mostly policy registry.
pub struct PolicyRegistry {
    snapshot: RwLock<Arc<PolicySnapshot>>,
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.snapshot.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("PolicyRegistry")
            .field("tool_count", &count)
            .finish()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_fallback()
    }
}

impl PolicyRegistry {
    /// Registry with the built-in fallback table.
    pub fn with_fallback() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(fallback_snapshot())),
        }
    }

    /// Load `policy.json`; a missing or invalid file yields the fallback.
    pub fn load(path: &Path) -> Self {
        let registry = Self::with_fallback();
        if let Err(e) = registry.reload(path) {
            warn!(path = %path.display(), error = %e, "policy.json not loaded, using fallback table");
        }
        registry
    }

    /// Reload the policy file. The new table replaces the old one at a
    /// single assignment point.
    pub fn reload(&self, path: &Path) -> anyhow::Result<()> {
        let contents = std::fs::read_to_string(path)?;
        let file: PolicyFile = serde_json::from_str(&contents)?;
        let snapshot = Arc::new(snapshot_from_file(file));
        info!(
            path = %path.display(),
            tool_levels = snapshot.len(),
            "policy reloaded"
        );
        if let Ok(mut current) = self.snapshot.write() {
            *current = snapshot;
        }
        Ok(())
    }

    /// Cheap clone of the current snapshot. Readers keep a consistent view
    /// across a turn even if a reload lands mid-way.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot
            .read()
            .map(|s| Arc::clone(&s))
            .unwrap_or_else(|_| Arc::new(fallback_snapshot()))
    }

    /// See [`PolicySnapshot::risk_of`].
    pub fn risk_of(&self, tool: &str) -> ToolRisk {
        self.snapshot().risk_of(tool)
    }

    /// See [`PolicySnapshot::requires_confirmation`].
    pub fn requires_confirmation(&self, tool: &str, planner_requested: bool) -> bool {
        self.snapshot().requires_confirmation(tool, planner_requested)
    }
}

// ---------------------------------------------------------------------------
// Confirmation prompts
// ---------------------------------------------------------------------------

/// Turkish confirmation prompt for a destructive tool.
///
/// Tool-specific templates are filled from `params`; if a placeholder is
/// missing the generic "çalıştırılsın mı?" form with a parameter dump is
/// used instead.
pub fn confirmation_prompt(tool: &str, params: &serde_json::Map<String, Value>) -> String {
    let template = match tool {
        "calendar.create_event" => "'{title}' etkinliği {time} için eklensin mi?",
        "calendar.update_event" => "'{title}' etkinliği güncellensin mi?",
        "calendar.delete_event" => "'{title}' etkinliği silinsin mi? Bu işlem geri alınamaz.",
        "file.delete" => "'{path}' dosyası silinsin mi? Bu işlem geri alınamaz.",
        "file.move" => "Dosya '{source}' → '{destination}' taşınsın mı?",
        "payment.submit" => {
            "{amount} tutarında {recipient} alıcısına ödeme yapılsın mı? Bu işlem geri alınamaz."
        }
        "system.shutdown" => "Sistem kapatılsın mı? Kaydedilmemiş işler kaybolacak.",
        "system.execute_command" => "'{command}' komutu çalıştırılsın mı?",
        "app.kill" => "'{app_name}' uygulaması kapatılsın mı?",
        "email.delete" => "'{subject}' konulu e-posta silinsin mi?",
        "gmail.send" => "'{to}' adresine '{subject}' konulu e-posta gönderilsin mi?",
        "gmail.send_draft" => "'{draft_id}' numaralı taslak gönderilsin mi?",
        _ => return generic_prompt(tool, params),
    };
    substitute(template, params).unwrap_or_else(|| generic_prompt(tool, params))
}

/// Fill `{name}` placeholders from params. `None` when any placeholder is
/// missing.
fn substitute(template: &str, params: &serde_json::Map<String, Value>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        let end = tail.find('}')?;
        let key = &tail[1..end];
        let value = params.get(key)?;
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &tail[end.saturating_add(1)..];
    }
    out.push_str(rest);
    Some(out)
}

fn generic_prompt(tool: &str, params: &serde_json::Map<String, Value>) -> String {
    if params.is_empty() {
        return format!("{tool} çalıştırılsın mı? (evet/hayır)");
    }
    let params_str = params
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{tool} ({params_str}) çalıştırılsın mı? (evet/hayır)")
}
