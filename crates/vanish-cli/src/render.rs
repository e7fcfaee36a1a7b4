//! Terminal formatting for messages and room metadata.

use chrono::{DateTime, Local};

use vanish_common::models::{MessageType, PlaintextMessage};

/// `HH:MM:SS` in local time, or `--:--:--` for an out-of-range timestamp.
pub fn clock(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_owned())
}

/// Full local date and time, for expiry display.
pub fn datetime(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

/// Trust marker: `[ab12 ✓]` verified, `[ab12 ✗]` bad signature, `[unsigned]`.
pub fn badge(message: &PlaintextMessage) -> String {
    match (&message.fingerprint, message.verified) {
        (Some(fp), true) => format!("[{fp} ✓]"),
        (Some(fp), false) => format!("[{fp} ✗]"),
        (None, _) => "[unsigned]".to_owned(),
    }
}

pub fn line(message: &PlaintextMessage) -> String {
    let time = clock(message.timestamp);
    match message.kind {
        MessageType::System => format!("{time} * {} {}", message.content, badge(message)),
        MessageType::Text => {
            format!("{time} {} {}: {}", message.sender, badge(message), message.content)
        }
    }
}

/// Rough "in 3h 12m" style countdown until `expires_at`.
pub fn remaining(now_ms: i64, expires_at_ms: i64) -> String {
    let secs = expires_at_ms.saturating_sub(now_ms) / 1000;
    if secs <= 0 {
        return "expired".to_owned();
    }
    let (h, m) = (secs / 3600, (secs % 3600) / 60);
    if h > 0 { format!("in {h}h {m}m") } else { format!("in {m}m") }
}
