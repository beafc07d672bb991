//! Alert delivery. The engine only knows [`AlertSink`]; failures here are the
//! sink's problem and never abort detection.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::Alert;

pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &Alert) -> Result<()>;
}

impl<T: AlertSink + ?Sized> AlertSink for std::sync::Arc<T> {
    fn notify(&self, alert: &Alert) -> Result<()> {
        (**self).notify(alert)
    }
}

/// Appends one formatted line per alert to a local file.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl AlertSink for FileSink {
    fn notify(&self, alert: &Alert) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open alert file {}", self.path.display()))?;
        writeln!(
            file,
            "[{}] ALERT: {} [{:?}] {} | {}",
            alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
            alert.category,
            alert.severity,
            alert.key,
            alert.detail,
        )
        .context("append alert line")?;
        Ok(())
    }
}

/// Hands alerts to a bounded channel without ever blocking the detection
/// pass. A full or closed channel is an error the caller logs and moves past;
/// the alert is dropped rather than stalling ingestion.
pub struct ChannelSink {
    tx: mpsc::Sender<Alert>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Alert>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelSink {
    fn notify(&self, alert: &Alert) -> Result<()> {
        self.tx
            .try_send(alert.clone())
            .map_err(|e| anyhow::anyhow!("alert channel unavailable: {e}"))
    }
}

/// In-memory sink for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Alert> {
        std::mem::take(&mut self.alerts.lock().expect("sink lock"))
    }

    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.lock().expect("sink lock").clone()
    }
}

impl AlertSink for MemorySink {
    fn notify(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().expect("sink lock").push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertKey, Severity};
    use chrono::Utc;

    fn alert() -> Alert {
        Alert {
            category: "Admin panel scanning".to_string(),
            key: AlertKey::new("192.0.2.1", "/wp-admin"),
            detail: "resource contains `/wp-admin`".to_string(),
            timestamp: Utc::now(),
            severity: Severity::Warning,
        }
    }

    #[test]
    fn file_sink_appends_formatted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");
        let sink = FileSink::new(&path);

        sink.notify(&alert()).unwrap();
        sink.notify(&alert()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("ALERT: Admin panel scanning"));
        assert!(content.contains("192.0.2.1 -> /wp-admin"));
    }

    #[tokio::test]
    async fn channel_sink_delivers_without_blocking() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.notify(&alert()).unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.category, "Admin panel scanning");
    }

    #[tokio::test]
    async fn channel_sink_errors_when_full_instead_of_stalling() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.notify(&alert()).unwrap();
        assert!(sink.notify(&alert()).is_err());
    }

    #[test]
    fn memory_sink_collects() {
        let sink = MemorySink::new();
        sink.notify(&alert()).unwrap();
        assert_eq!(sink.drain().len(), 1);
        assert!(sink.snapshot().is_empty());
    }
}
