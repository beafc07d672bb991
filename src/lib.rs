pub mod anomaly;
pub mod cursor;
pub mod engine;
pub mod parser;
pub mod rules;
pub mod sink;
pub mod window;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grouping key for flood tracking and alert dedupe: who is talking to what.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub source_addr: String,
    pub resource: String,
}

impl AlertKey {
    pub fn new(source_addr: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            source_addr: source_addr.into(),
            resource: resource.into(),
        }
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source_addr, self.resource)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One emitted finding. Constructed by the orchestrator, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub category: String,
    pub key: AlertKey,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub struct WardenConfig {
    /// Events per key within the window before a flood is declared.
    pub flood_threshold: usize,
    /// Flood window duration in seconds.
    pub time_window_secs: u64,
    /// Seconds between detection passes.
    pub detect_interval_secs: u64,
    /// Anomaly scores below this are flagged; lower values mean more sensitive.
    pub score_threshold: f64,
    /// Hard cap on retained timestamps per key.
    pub per_key_capacity: usize,
    /// Optional directory of YAML rule files appended after the built-ins.
    pub rules_directory: Option<String>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            flood_threshold: 10,
            time_window_secs: 60,
            detect_interval_secs: 10,
            score_threshold: -0.05,
            per_key_capacity: 256,
            rules_directory: None,
        }
    }
}
