//! Document records kept in the note store

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum title length in characters
pub const TITLE_MAX_CHARS: usize = 20;

/// Title used when the first line of a document is empty
pub const UNTITLED: &str = "Untitled";

/// A stored note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Unique identifier
    pub id: String,
    /// Title derived from the first line of content
    pub title: String,
    /// Document content
    pub content: String,
    /// Creation time in milliseconds since the Unix epoch
    pub created_at: u64,
    /// Last modification time in milliseconds since the Unix epoch
    pub updated_at: u64,
}

impl Document {
    /// Create a new document from content, stamped at `now`
    pub fn new(content: &str, now: u64) -> Self {
        Self {
            id: generate_id(now),
            title: extract_title(content),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the content, re-deriving the title
    pub fn set_content(&mut self, content: &str, now: u64) {
        self.title = extract_title(content);
        self.content = content.to_string();
        self.updated_at = now.max(self.created_at);
    }
}

/// Derive a title from the first line of content
pub fn extract_title(content: &str) -> String {
    let first_line = content.split('\n').next().unwrap_or_default();
    let title: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

/// Generate an identifier: base-36 timestamp followed by a base-36 random suffix
pub fn generate_id(now: u64) -> String {
    let random = Uuid::new_v4().as_u128() as u64;
    format!("{}{}", to_base36(now), to_base36(random))
}

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Format an epoch-millisecond timestamp as local `YYYY-MM-DD HH:MM`
pub fn format_date_time(millis: u64) -> String {
    format_date_time_in(millis, &Local)
}

fn format_date_time_in<Tz>(millis: u64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    i64::try_from(millis)
        .ok()
        .and_then(|millis| tz.timestamp_millis_opt(millis).single())
        .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}
