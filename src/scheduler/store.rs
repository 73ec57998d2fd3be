//! SQLite-backed reminder store.
//!
//! Timestamps are stored as ISO-8601 text in local wall-clock time. Every
//! mutation is a single statement, so concurrent adds/deletes/snoozes are
//! safe against the scheduler tick.

use std::path::Path;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{error, info};

/// Reminder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStatus {
    Pending,
    Done,
}

impl ReminderStatus {
    /// Stable lowercase name, as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "done" {
            Self::Done
        } else {
            Self::Pending
        }
    }
}

/// One reminder row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub id: i64,
    pub message: String,
    pub remind_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub status: ReminderStatus,
    pub repeat_interval: Option<String>,
    pub snoozed_until: Option<NaiveDateTime>,
}

/// A pending row whose `remind_at` no longer parses; poisoned rows are
/// marked done instead of blocking the tick forever.
#[derive(Debug)]
pub struct CorruptReminder {
    pub id: i64,
    pub raw_remind_at: String,
}

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn encode_ts(ts: NaiveDateTime) -> String {
    ts.format(ISO_FORMAT).to_string()
}

fn decode_ts(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, ISO_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// SQLite store for reminders.
#[derive(Debug, Clone)]
pub struct ReminderStore {
    pool: SqlitePool,
}

impl ReminderStore {
    /// Open (and create) the store at the given path.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.display(), "reminder store opened");
        Ok(store)
    }

    /// Open an in-memory store (tests).
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                remind_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT DEFAULT 'pending',
                repeat_interval TEXT DEFAULT NULL,
                snoozed_until TEXT DEFAULT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_remind_at ON reminders(remind_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_status ON reminders(status)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a new pending reminder. Returns its id.
    pub async fn add(
        &self,
        message: &str,
        remind_at: NaiveDateTime,
        created_at: NaiveDateTime,
        repeat_interval: Option<&str>,
    ) -> anyhow::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO reminders (message, remind_at, created_at, status, repeat_interval) \
             VALUES (?1, ?2, ?3, 'pending', ?4)",
        )
        .bind(message)
        .bind(encode_ts(remind_at))
        .bind(encode_ts(created_at))
        .bind(repeat_interval)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Fetch one reminder.
    pub async fn get(&self, id: i64) -> anyhow::Result<Option<Reminder>> {
        let row = sqlx::query("SELECT * FROM reminders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| row_to_reminder(&r).ok()))
    }

    /// List reminders ordered by fire time. `include_done` widens the filter.
    pub async fn list(&self, include_done: bool) -> anyhow::Result<Vec<Reminder>> {
        let rows = if include_done {
            sqlx::query("SELECT * FROM reminders ORDER BY remind_at")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM reminders WHERE status = 'pending' ORDER BY remind_at")
                .fetch_all(&self.pool)
                .await?
        };
        Ok(rows.iter().filter_map(|r| row_to_reminder(r).ok()).collect())
    }

    /// Delete by id. Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM reminders WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Push a reminder `minutes` into the future from `now` and re-arm it.
    /// Returns the new fire time, or `None` for an unknown id.
    pub async fn snooze(
        &self,
        id: i64,
        minutes: i64,
        now: NaiveDateTime,
    ) -> anyhow::Result<Option<NaiveDateTime>> {
        let Some(new_time) = now.checked_add_signed(Duration::minutes(minutes)) else {
            return Ok(None);
        };
        let result = sqlx::query(
            "UPDATE reminders SET remind_at = ?1, snoozed_until = ?1, status = 'pending' \
             WHERE id = ?2",
        )
        .bind(encode_ts(new_time))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok((result.rows_affected() > 0).then_some(new_time))
    }

    /// Pending reminders due at or before `now`, plus any rows whose
    /// timestamp no longer parses.
    ///
    /// The due comparison happens after decoding; a lexicographic SQL
    /// comparison would let a corrupt timestamp hide from the tick forever.
    pub async fn due(
        &self,
        now: NaiveDateTime,
    ) -> anyhow::Result<(Vec<Reminder>, Vec<CorruptReminder>)> {
        let rows = sqlx::query("SELECT * FROM reminders WHERE status = 'pending'")
            .fetch_all(&self.pool)
            .await?;

        let mut due = Vec::new();
        let mut corrupt = Vec::new();
        for row in &rows {
            match row_to_reminder(row) {
                Ok(reminder) if reminder.remind_at <= now => due.push(reminder),
                Ok(_) => {}
                Err(raw) => corrupt.push(CorruptReminder {
                    id: row.get("id"),
                    raw_remind_at: raw,
                }),
            }
        }
        Ok((due, corrupt))
    }

    /// Mark a reminder done.
    pub async fn mark_done(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE reminders SET status = 'done' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a poisoned row done so the tick never sees it again.
    pub async fn quarantine(&self, corrupt: &CorruptReminder) -> anyhow::Result<()> {
        error!(
            id = corrupt.id,
            remind_at = %corrupt.raw_remind_at,
            "unparseable remind_at, marking reminder done"
        );
        self.mark_done(corrupt.id).await?;
        Ok(())
    }

    /// Re-arm a recurring reminder: keep it pending at the next fire time.
    pub async fn rearm(&self, id: i64, next: NaiveDateTime) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE reminders SET remind_at = ?1, status = 'pending' WHERE id = ?2",
        )
        .bind(encode_ts(next))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Decode one row; on a bad `remind_at` the raw text is returned as the
/// error so the caller can quarantine the row.
fn row_to_reminder(row: &sqlx::sqlite::SqliteRow) -> Result<Reminder, String> {
    let raw_remind_at: String = row.get("remind_at");
    let remind_at = decode_ts(&raw_remind_at).ok_or_else(|| raw_remind_at.clone())?;
    let raw_created_at: String = row.get("created_at");
    let created_at = decode_ts(&raw_created_at).unwrap_or(remind_at);
    let status: String = row.get("status");
    let snoozed_until: Option<String> = row.get("snoozed_until");

    Ok(Reminder {
        id: row.get("id"),
        message: row.get("message"),
        remind_at,
        created_at,
        status: ReminderStatus::parse(&status),
        repeat_interval: row.get("repeat_interval"),
        snoozed_until: snoozed_until.as_deref().and_then(decode_ts),
    })
}
