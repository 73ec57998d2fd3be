//! Tool result formatting for the finalizer prompt.
//!
//! Renders raw tool results as human-readable Turkish text. The output is
//! only ever used to build the finalizer context; it is never shown to the
//! user directly without finalizer approval.

use chrono::{DateTime, NaiveDateTime, Timelike};
use serde_json::Value;

/// Formats a tool's raw result into Turkish prose.
pub trait ResultFormatter: Send + Sync {
    /// Render `raw_result` for the given tool.
    fn format(&self, tool_name: &str, raw_result: &Value) -> String;
}

/// Default formatter covering the calendar / gmail / time tool families,
/// with a compact JSON fallback for everything else.
#[derive(Debug, Default, Clone)]
pub struct TurkishFormatter;

impl ResultFormatter for TurkishFormatter {
    fn format(&self, tool_name: &str, raw_result: &Value) -> String {
        match tool_name {
            "calendar.list_events" => format_calendar_list(raw_result),
            "calendar.create_event" => format_calendar_create(raw_result),
            "calendar.delete_event" => format_calendar_delete(raw_result),
            "gmail.list_messages" => format_gmail_list(raw_result),
            "gmail.unread_count" => format_gmail_unread(raw_result),
            "gmail.send" => format_gmail_send(raw_result),
            "time.now" => format_time_now(raw_result),
            _ => compact_json(raw_result),
        }
    }
}

fn events_of(result: &Value) -> Option<&Vec<Value>> {
    result
        .get("events")
        .or_else(|| result.get("items"))
        .and_then(Value::as_array)
}

fn format_calendar_list(result: &Value) -> String {
    let Some(events) = events_of(result) else {
        return "Takvim sonucu okunamadı.".to_owned();
    };
    if events.is_empty() {
        return "Takvimde etkinlik yok.".to_owned();
    }

    let mut lines = vec![format!("{} etkinlik bulundu:", events.len())];
    for event in events {
        let title = event
            .get("summary")
            .or_else(|| event.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("(başlıksız)");
        match event.get("start").and_then(Value::as_str).and_then(parse_time) {
            Some(time) => lines.push(format!("- {time} {title}")),
            None => lines.push(format!("- {title}")),
        }
    }
    lines.join("\n")
}

fn format_calendar_create(result: &Value) -> String {
    let title = result
        .get("summary")
        .or_else(|| result.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("etkinlik");
    format!("'{title}' etkinliği oluşturuldu.")
}

fn format_calendar_delete(result: &Value) -> String {
    match result.get("deleted").and_then(Value::as_bool) {
        Some(true) | None => "Etkinlik silindi.".to_owned(),
        Some(false) => "Etkinlik silinemedi.".to_owned(),
    }
}

fn format_gmail_list(result: &Value) -> String {
    let Some(messages) = result.get("messages").and_then(Value::as_array) else {
        return "E-posta sonucu okunamadı.".to_owned();
    };
    if messages.is_empty() {
        return "Yeni e-posta yok.".to_owned();
    }
    let mut lines = vec![format!("{} e-posta:", messages.len())];
    for message in messages {
        let from = message.get("from").and_then(Value::as_str).unwrap_or("?");
        let subject = message
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("(konusuz)");
        lines.push(format!("- {from}: {subject}"));
    }
    lines.join("\n")
}

fn format_gmail_unread(result: &Value) -> String {
    match result.get("count").and_then(Value::as_u64) {
        Some(0) => "Okunmamış e-posta yok.".to_owned(),
        Some(n) => format!("{n} okunmamış e-posta var."),
        None => "Okunmamış e-posta sayısı alınamadı.".to_owned(),
    }
}

fn format_gmail_send(result: &Value) -> String {
    let to = result.get("to").and_then(Value::as_str).unwrap_or("alıcı");
    format!("E-posta {to} adresine gönderildi.")
}

fn format_time_now(result: &Value) -> String {
    match result.get("time").and_then(Value::as_str).and_then(parse_time) {
        Some(time) => format!("Saat şu an {time}."),
        None => "Saat bilgisi alınamadı.".to_owned(),
    }
}

/// Parse an ISO-8601 timestamp (with or without offset) to `HH:MM`.
fn parse_time(raw: &str) -> Option<String> {
    let time = DateTime::parse_from_rfc3339(raw)
        .map(|dt| (dt.hour(), dt.minute()))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .map(|dt| (dt.hour(), dt.minute()))
        })
        .ok()?;
    Some(format!("{:02}:{:02}", time.0, time.1))
}

fn compact_json(result: &Value) -> String {
    result.to_string()
}
