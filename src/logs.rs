//! Sync daemon log lines.
//!
//! The daemon writes `2025/09/20 01:07:30 [INFO] Starting service...`.
//! Lines that do not have that shape (continuations, panics) are kept as
//! plain messages.

use chrono::NaiveDateTime;
use serde::Serialize;

const STAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
const STAMP_LEN:    usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "DEBUG" | "TRACE"            => Some(LogLevel::Debug),
            "INFO"                       => Some(LogLevel::Info),
            "WARN" | "WARNING"           => Some(LogLevel::Warn),
            "ERROR" | "FATAL" | "PANIC"  => Some(LogLevel::Error),
            _                            => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// ISO-8601 local time, `None` for unstructured lines.
    pub timestamp: Option<String>,
    pub level:     Option<LogLevel>,
    pub message:   String,
}

pub fn parse_line(line: &str) -> LogEntry {
    parse_structured(line).unwrap_or_else(|| LogEntry {
        timestamp: None,
        level:     None,
        message:   line.to_string(),
    })
}

fn parse_structured(line: &str) -> Option<LogEntry> {
    let stamp = NaiveDateTime::parse_from_str(line.get(..STAMP_LEN)?, STAMP_FORMAT).ok()?;
    let rest = line[STAMP_LEN..].strip_prefix(" [")?;
    let (tag, message) = rest.split_once(']')?;
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    Some(LogEntry {
        timestamp: Some(stamp.format("%Y-%m-%dT%H:%M:%S").to_string()),
        level:     LogLevel::from_tag(tag),
        message:   message.strip_prefix(' ').unwrap_or(message).to_string(),
    })
}

/// Parse `text` line by line.  With `min_level`, only entries at or above
/// it are kept; entries without a recognised level are dropped.
pub fn parse_log(text: &str, min_level: Option<LogLevel>) -> Vec<LogEntry> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_line)
        .filter(|e| match min_level {
            Some(min) => e.level.is_some_and(|lvl| lvl >= min),
            None => true,
        })
        .collect()
}
