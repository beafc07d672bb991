//! Per-key sliding-window flood tracking.
//!
//! Each (source, resource) key owns a bounded, time-sorted history of recent
//! event timestamps. A flood is declared when the count of events inside the
//! window starting at the earliest unconsumed event reaches the threshold.
//! A flagged window start is never re-flagged, so one burst produces one hit.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::AlertKey;

#[derive(Debug, Clone, PartialEq)]
pub struct FloodHit {
    pub key: AlertKey,
    pub window_start: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Default)]
struct KeyHistory {
    /// Ascending timestamps of recent events for this key.
    timestamps: VecDeque<DateTime<Utc>>,
    /// End of the last flagged window; events before this were already
    /// counted into a flood and must not seed another one.
    window_floor: Option<DateTime<Utc>>,
}

/// Owned, injectable tracker state. Entry locking in the map serializes
/// updates per key while distinct keys proceed concurrently.
pub struct FloodTracker {
    histories: DashMap<AlertKey, KeyHistory>,
    window: Duration,
    threshold: usize,
    capacity: usize,
}

impl FloodTracker {
    pub fn new(window_secs: u64, threshold: usize, capacity: usize) -> Self {
        Self {
            histories: DashMap::new(),
            window: Duration::seconds(window_secs as i64),
            threshold: threshold.max(1),
            capacity: capacity.max(1),
        }
    }

    /// Record one event and report whether it completes a flood window.
    ///
    /// Timestamps may arrive out of order; they are inserted in sorted
    /// position so counting stays correct under clock skew.
    pub fn observe(&self, key: &AlertKey, timestamp: DateTime<Utc>) -> Option<FloodHit> {
        let mut entry = self.histories.entry(key.clone()).or_default();
        let history = entry.value_mut();

        let pos = history.timestamps.partition_point(|t| *t <= timestamp);
        history.timestamps.insert(pos, timestamp);

        while history.timestamps.len() > self.capacity {
            history.timestamps.pop_front();
        }

        // Lazy expiry: nothing older than one window behind the newest event
        // can ever be counted again.
        if let Some(&newest) = history.timestamps.back() {
            let cutoff = newest - self.window;
            while let Some(&front) = history.timestamps.front() {
                if front < cutoff {
                    history.timestamps.pop_front();
                } else {
                    break;
                }
            }
        }

        let floor = history.window_floor;
        let window_start = history
            .timestamps
            .iter()
            .copied()
            .find(|t| floor.map_or(true, |f| *t >= f))?;
        let window_end = window_start + self.window;

        let count = history
            .timestamps
            .iter()
            .filter(|t| **t >= window_start && **t < window_end)
            .count();

        if count >= self.threshold {
            history.window_floor = Some(window_end);
            Some(FloodHit {
                key: key.clone(),
                window_start,
                count,
            })
        } else {
            None
        }
    }

    /// Number of keys currently holding history.
    pub fn tracked_keys(&self) -> usize {
        self.histories.len()
    }
}
