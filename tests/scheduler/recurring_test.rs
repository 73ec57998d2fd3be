//! Recurring reminders against an on-disk store: persistence round trip and
//! the daily re-arm sequence.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;

use bantz::events::EventBus;
use bantz::scheduler::{ReminderScheduler, ReminderStatus, ReminderStore};

fn dt(d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 2, d)
        .expect("date")
        .and_hms_opt(h, min, 0)
        .expect("time")
}

/// Encode → persist → decode yields a structurally equal record, across a
/// real file (not just one connection).
#[tokio::test]
async fn persisted_reminder_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("reminders.db");

    let id = {
        let store = ReminderStore::open(&path).await.expect("store");
        store
            .add("ilaç al", dt(12, 9, 0), dt(11, 20, 0), Some("daily"))
            .await
            .expect("add")
    };

    // Fresh connection over the same file.
    let store = ReminderStore::open(&path).await.expect("reopen");
    let reminder = store.get(id).await.expect("get").expect("exists");
    assert_eq!(reminder.message, "ilaç al");
    assert_eq!(reminder.remind_at, dt(12, 9, 0));
    assert_eq!(reminder.created_at, dt(11, 20, 0));
    assert_eq!(reminder.status, ReminderStatus::Pending);
    assert_eq!(reminder.repeat_interval.as_deref(), Some("daily"));
}

/// The daily recurrence sequence: fire at t0 with the original time,
/// re-arm to t0+24h, fire again there.
#[tokio::test]
async fn daily_reminder_fires_and_rearms_across_days() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("reminders.db");
    let store = Arc::new(ReminderStore::open(&path).await.expect("store"));
    let bus = Arc::new(EventBus::new());
    let scheduler = ReminderScheduler::new(Arc::clone(&store), Arc::clone(&bus));

    let t0 = dt(12, 9, 0);
    let id = store
        .add("günaydın", t0, dt(11, 9, 0), Some("daily"))
        .await
        .expect("add");

    // Day one.
    scheduler.tick(t0).await.expect("tick");
    let row = store.get(id).await.expect("get").expect("exists");
    assert_eq!(row.status, ReminderStatus::Pending);
    assert_eq!(row.remind_at, dt(13, 9, 0));

    // A tick between occurrences does nothing.
    scheduler.tick(dt(12, 15, 0)).await.expect("tick");

    // Day two.
    scheduler.tick(dt(13, 9, 0)).await.expect("tick");

    let fired: Vec<_> = bus
        .recent_events()
        .into_iter()
        .filter(|e| e.event_type == "reminder.fired")
        .collect();
    assert_eq!(fired.len(), 2);
    assert_eq!(fired[0].data.get("id"), Some(&json!(id)));
    assert_eq!(fired[0].data.get("message"), Some(&json!("günaydın")));
    assert_eq!(fired[0].data.get("time"), Some(&json!("2026-02-12T09:00:00")));
    assert_eq!(fired[1].data.get("time"), Some(&json!("2026-02-13T09:00:00")));

    let row = store.get(id).await.expect("get").expect("exists");
    assert_eq!(row.remind_at, dt(14, 9, 0));
    assert_eq!(row.status, ReminderStatus::Pending);
}
