//! Field extraction: one raw log line in, one typed record out.
//!
//! Extraction is total. Any field that cannot be derived falls back to a
//! sentinel value instead of failing, so a malformed line can never abort a
//! detection pass.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Apache/nginx combined access log prefix:
/// `IP - - [DD/Mon/YYYY:HH:MM:SS +ZZZZ] "METHOD /path HTTP/x.x" status ...`
static RE_COMBINED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) (\S+)[^"]*" (\d{3})"#).expect("regex")
});

/// `from 192.0.2.1` marker used by sshd and friends.
static RE_FROM_ADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfrom[ =](\d{1,3}(?:\.\d{1,3}){3}|[0-9A-Fa-f:]*:[0-9A-Fa-f:]+)").expect("regex")
});

/// Quoted request section, for lines that carry one outside the combined shape.
static RE_REQUEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([A-Z]{3,10}) (\S+)"#).expect("regex"));

/// Standalone 3-digit HTTP status token.
static RE_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:" |\s)([1-5]\d{2})(?:\s|$)"#).expect("regex"));

/// Bracketed timestamp section.
static RE_BRACKET_TS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("regex"));

const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

pub const UNKNOWN_ADDR: &str = "unknown";
pub const UNKNOWN_RESOURCE: &str = "unknown";
pub const UNKNOWN_STATUS: &str = "000";

/// One parsed log line. Fields are derived once at parse time; `raw_text`
/// keeps the original line untouched for alert context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source_addr: String,
    pub resource: String,
    pub method: String,
    pub status_code: String,
    pub timestamp: DateTime<Utc>,
    /// True when the line carried no parseable timestamp and ingestion time
    /// was substituted. The substitution loses precision; downstream code
    /// that cares can see it happened.
    pub timestamp_imputed: bool,
    pub raw_text: String,
}

/// Parse a raw line into a [`LogRecord`]. Never fails.
pub fn extract(raw_line: &str) -> LogRecord {
    let line = raw_line.trim_end_matches(['\r', '\n']);

    if let Some(caps) = RE_COMBINED.captures(line) {
        let (timestamp, timestamp_imputed) = parse_timestamp(&caps[2]);
        return LogRecord {
            source_addr: caps[1].to_string(),
            resource: caps[4].to_string(),
            method: caps[3].to_string(),
            status_code: caps[5].to_string(),
            timestamp,
            timestamp_imputed,
            raw_text: line.to_string(),
        };
    }

    // Not a combined-format line: scavenge what we can, piece by piece.
    let source_addr = RE_FROM_ADDR
        .captures(line)
        .map(|c| c[1].to_string())
        .or_else(|| leading_addr(line))
        .unwrap_or_else(|| UNKNOWN_ADDR.to_string());

    let (method, resource) = match RE_REQUEST.captures(line) {
        Some(c) => (c[1].to_string(), c[2].to_string()),
        None => (String::new(), UNKNOWN_RESOURCE.to_string()),
    };

    let status_code = RE_STATUS
        .captures(line)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| UNKNOWN_STATUS.to_string());

    let (timestamp, timestamp_imputed) = RE_BRACKET_TS
        .captures(line)
        .map(|c| parse_timestamp(&c[1]))
        .unwrap_or_else(|| (Utc::now(), true));

    LogRecord {
        source_addr,
        resource,
        method,
        status_code,
        timestamp,
        timestamp_imputed,
        raw_text: line.to_string(),
    }
}

fn parse_timestamp(text: &str) -> (DateTime<Utc>, bool) {
    match DateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        Ok(dt) => (dt.with_timezone(&Utc), false),
        Err(_) => (Utc::now(), true),
    }
}

/// First whitespace token, if it looks like an IP address.
fn leading_addr(line: &str) -> Option<String> {
    let token = line.split_whitespace().next()?;
    token.parse::<std::net::IpAddr>().ok().map(|_| token.to_string())
}
