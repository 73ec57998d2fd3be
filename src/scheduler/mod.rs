//! Reminder scheduling: the SQLite store, recurrence computation, and the
//! background tick loop that fires due reminders over the event bus.

pub mod interval;
pub mod store;

pub use interval::{compute_next_occurrence, parse_time_phrase};
pub use store::{Reminder, ReminderStatus, ReminderStore};

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::{Event, EventBus, EventType};

/// Tick cadence of the background loop.
const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Background reminder scheduler.
///
/// Every tick: select due pending rows, publish `reminder.fired` and a
/// proactive `bantz_message` for each, then re-arm recurring rows or mark
/// one-shot rows done. Tick failures are logged at ERROR and the loop
/// continues; a stop request lets the in-flight tick finish first.
pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for ReminderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderScheduler").finish_non_exhaustive()
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to stop and wait for the in-flight tick to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "scheduler task did not shut down cleanly");
        }
    }
}

impl ReminderScheduler {
    /// Scheduler over the given store and bus.
    pub fn new(store: Arc<ReminderStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Spawn the background loop as a Tokio task.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            info!("reminder scheduler started");
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                if let Err(e) = self.tick(Local::now().naive_local()).await {
                    error!(error = %e, "reminder tick failed");
                }
                tokio::select! {
                    () = tokio::time::sleep(TICK_INTERVAL) => {}
                    _ = stop_rx.changed() => {}
                }
            }
            info!("reminder scheduler stopped");
        });
        SchedulerHandle { stop_tx, join }
    }

    /// One scheduler pass at the given wall-clock time.
    pub async fn tick(&self, now: NaiveDateTime) -> anyhow::Result<()> {
        let (due, corrupt) = self.store.due(now).await?;

        for row in &corrupt {
            if let Err(e) = self.store.quarantine(row).await {
                error!(id = row.id, error = %e, "failed to quarantine corrupt reminder");
            }
        }

        for reminder in due {
            self.fire(&reminder);

            match reminder.repeat_interval.as_deref() {
                Some(interval) => {
                    match compute_next_occurrence(reminder.remind_at, interval) {
                        Some(next) => {
                            self.store.rearm(reminder.id, next).await?;
                            info!(
                                id = reminder.id,
                                interval,
                                next = %next,
                                "recurring reminder re-armed"
                            );
                        }
                        None => {
                            warn!(
                                id = reminder.id,
                                interval,
                                "unrecognized repeat interval, marking done"
                            );
                            self.store.mark_done(reminder.id).await?;
                        }
                    }
                }
                None => {
                    self.store.mark_done(reminder.id).await?;
                }
            }
        }

        Ok(())
    }

    /// Publish the fired events for one due reminder.
    fn fire(&self, reminder: &Reminder) {
        info!(id = reminder.id, message = %reminder.message, "reminder fired");

        let mut fired = serde_json::Map::new();
        fired.insert("id".to_owned(), json!(reminder.id));
        fired.insert("message".to_owned(), json!(reminder.message));
        fired.insert(
            "time".to_owned(),
            json!(reminder.remind_at.format("%Y-%m-%dT%H:%M:%S").to_string()),
        );
        self.bus
            .publish(Event::new(EventType::ReminderFired, "scheduler", fired));

        let mut message = serde_json::Map::new();
        message.insert(
            "text".to_owned(),
            json!(format!("🔔 Hatırlatma: {}", reminder.message)),
        );
        message.insert("intent".to_owned(), json!("reminder_fired"));
        message.insert("proactive".to_owned(), json!(true));
        message.insert("reminder_id".to_owned(), json!(reminder.id));
        self.bus
            .publish(Event::new(EventType::BantzMessage, "scheduler", message));
    }
}
