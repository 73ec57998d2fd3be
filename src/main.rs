#![allow(missing_docs)]

//! Bantz CLI.
//!
//! `bantz start` runs the background services (reminder scheduler, bus
//! message printer); `bantz reminders` and `bantz graph` are one-shot ops
//! commands. Exit codes: 0 ok, 1 usage error, 2 runtime error.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use tracing::info;

use bantz::config::BantzConfig;
use bantz::events::{Event, EventBus};
use bantz::graph::GraphStore;
use bantz::logging::LogMode;
use bantz::scheduler::{parse_time_phrase, ReminderScheduler, ReminderStore};

#[derive(Parser)]
#[command(name = "bantz", version, about = "Turkish-first personal voice assistant runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background services (reminder scheduler).
    Start,
    /// Manage reminders.
    Reminders {
        #[command(subcommand)]
        action: RemindersAction,
    },
    /// Inspect the entity graph.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },
}

#[derive(Subcommand)]
enum RemindersAction {
    /// Add a reminder: `bantz reminders add "yarın 9:00" "ilaç al"`.
    Add {
        /// When: `20:00`, `yarın 9:00`, `5 dakika sonra`, …
        time: String,
        /// Reminder text.
        message: String,
        /// Recurrence: `hourly|daily|weekly|monthly` or `NNm|NNh|NNd|NNw`.
        #[arg(long)]
        repeat: Option<String>,
    },
    /// List reminders.
    List {
        /// Include completed reminders.
        #[arg(long)]
        all: bool,
    },
    /// Delete a reminder by id.
    Delete { id: i64 },
    /// Snooze a reminder by N minutes.
    Snooze {
        id: i64,
        #[arg(long, default_value_t = 10)]
        minutes: i64,
    },
}

#[derive(Subcommand)]
enum GraphAction {
    /// Entity and edge counts.
    Stats,
    /// Find entities by name.
    Search { query: String },
    /// Entities connected to the named one.
    Neighbors { name: String },
    /// Decay importance scores and drop faded entities.
    Decay {
        #[arg(long, default_value_t = 0.9)]
        factor: f64,
    },
}

/// CLI failure, split by exit code.
enum CliError {
    /// Bad user input → exit 1.
    Usage(String),
    /// Everything else → exit 2.
    Runtime(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        Self::Runtime(e)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not usage errors.
            if e.use_stderr() {
                eprintln!("{e}");
                return ExitCode::from(1);
            }
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
        Err(CliError::Runtime(e)) => {
            eprintln!("hata: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = BantzConfig::load();

    match cli.command {
        Command::Start => {
            let _guard = bantz::logging::init(LogMode::Runtime {
                logs_dir: config.paths.logs_dir.clone(),
            })
            .map_err(CliError::Runtime)?;
            start_services(&config).await?;
            Ok(())
        }
        Command::Reminders { action } => {
            let _guard = bantz::logging::init(LogMode::Cli).map_err(CliError::Runtime)?;
            std::fs::create_dir_all(&config.paths.data_dir)
                .map_err(|e| CliError::Runtime(e.into()))?;
            let store = ReminderStore::open(&config.paths.reminders_db()).await?;
            reminders_command(&store, action).await
        }
        Command::Graph { action } => {
            let _guard = bantz::logging::init(LogMode::Cli).map_err(CliError::Runtime)?;
            std::fs::create_dir_all(&config.paths.data_dir)
                .map_err(|e| CliError::Runtime(e.into()))?;
            let graph = GraphStore::open(&config.paths.graph_db()).await?;
            graph_command(&graph, action).await
        }
    }
}

/// Run the scheduler until Ctrl-C, printing proactive messages to stdout.
async fn start_services(config: &BantzConfig) -> Result<(), CliError> {
    std::fs::create_dir_all(&config.paths.data_dir).map_err(|e| CliError::Runtime(e.into()))?;

    let store = Arc::new(ReminderStore::open(&config.paths.reminders_db()).await?);
    let bus = Arc::new(EventBus::new());
    bus.subscribe("bantz_message", |event: &Event| {
        if let Some(text) = event.str_field("text") {
            println!("{text}");
        }
    });

    let handle = ReminderScheduler::new(store, Arc::clone(&bus)).spawn();
    info!("bantz services running, Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::Runtime(e.into()))?;
    handle.stop().await;
    Ok(())
}

async fn reminders_command(store: &ReminderStore, action: RemindersAction) -> Result<(), CliError> {
    let now = Local::now().naive_local();
    match action {
        RemindersAction::Add {
            time,
            message,
            repeat,
        } => {
            let Some(remind_at) = parse_time_phrase(&time, now) else {
                return Err(CliError::Usage(format!(
                    "Zamanı anlayamadım: '{time}'. Örnek: '20:00', 'yarın 9:00', '5 dakika sonra'"
                )));
            };
            let id = store
                .add(&message, remind_at, now, repeat.as_deref())
                .await?;
            println!(
                "✅ Hatırlatma #{id} eklendi: {} - \"{message}\"",
                format_time_display(remind_at, now)
            );
            Ok(())
        }
        RemindersAction::List { all } => {
            let reminders = store.list(all).await?;
            if reminders.is_empty() {
                println!("📭 Bekleyen hatırlatma yok.");
                return Ok(());
            }
            println!("📋 Hatırlatmalar:");
            for r in reminders {
                let icon = if r.status == bantz::scheduler::ReminderStatus::Pending {
                    "⏰"
                } else {
                    "✅"
                };
                println!(
                    "  {icon} [{}] {} - {}",
                    r.id,
                    format_time_display(r.remind_at, now),
                    r.message
                );
            }
            Ok(())
        }
        RemindersAction::Delete { id } => {
            if store.delete(id).await? {
                println!("🗑️ Hatırlatma #{id} silindi.");
                Ok(())
            } else {
                Err(CliError::Usage(format!("❌ Hatırlatma #{id} bulunamadı.")))
            }
        }
        RemindersAction::Snooze { id, minutes } => match store.snooze(id, minutes, now).await? {
            Some(new_time) => {
                println!(
                    "⏰ Hatırlatma #{id} {minutes} dakika ertelendi ({})",
                    new_time.format("%H:%M")
                );
                Ok(())
            }
            None => Err(CliError::Usage(format!("❌ Hatırlatma #{id} bulunamadı."))),
        },
    }
}

async fn graph_command(graph: &GraphStore, action: GraphAction) -> Result<(), CliError> {
    match action {
        GraphAction::Stats => {
            let stats = graph.stats().await?;
            println!(
                "Varlık: {}  Bağlantı: {}  Ortalama önem: {:.2}",
                stats.entity_count, stats.edge_count, stats.avg_importance
            );
            Ok(())
        }
        GraphAction::Search { query } => {
            let entities = graph.search(&query).await?;
            if entities.is_empty() {
                println!("Sonuç yok: '{query}'");
                return Ok(());
            }
            for e in entities {
                println!("[{}] {} ({}) önem={:.2}", e.id, e.name, e.kind, e.importance);
            }
            Ok(())
        }
        GraphAction::Neighbors { name } => {
            let neighbors = graph.neighbors(&name).await?;
            if neighbors.is_empty() {
                println!("'{name}' için bağlantı yok.");
                return Ok(());
            }
            for e in neighbors {
                println!("[{}] {} ({})", e.id, e.name, e.kind);
            }
            Ok(())
        }
        GraphAction::Decay { factor } => {
            if !(0.0..=1.0).contains(&factor) {
                return Err(CliError::Usage(format!(
                    "decay faktörü 0 ile 1 arasında olmalı: {factor}"
                )));
            }
            let outcome = graph.decay(factor).await?;
            println!(
                "{} varlık zayıflatıldı, {} varlık silindi.",
                outcome.decayed, outcome.removed
            );
            Ok(())
        }
    }
}

/// Render a fire time relative to today: `bugün 20:00`, `yarın 09:00`, or
/// `dd/mm HH:MM`.
fn format_time_display(remind_at: NaiveDateTime, now: NaiveDateTime) -> String {
    let today = now.date();
    if remind_at.date() == today {
        format!("bugün {}", remind_at.format("%H:%M"))
    } else if remind_at.date() == today.succ_opt().unwrap_or(today) {
        format!("yarın {}", remind_at.format("%H:%M"))
    } else {
        remind_at.format("%d/%m %H:%M").to_string()
    }
}
