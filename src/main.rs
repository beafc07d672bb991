use anyhow::Result;
use clap::Parser;
use logwarden::{
    anomaly::LinearModel,
    cursor::LogCursor,
    engine::DetectionEngine,
    sink::{AlertSink, ChannelSink, FileSink},
    Alert, WardenConfig,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Append-only log file to watch.
    #[arg(short, long, default_value = "data/logs.log")]
    log_file: PathBuf,

    /// Where ingestion progress is persisted across restarts.
    #[arg(long, default_value = "data/cursor.json")]
    state_file: PathBuf,

    /// Alert output file.
    #[arg(long, default_value = "logs/alerts.log")]
    alerts_file: PathBuf,

    /// Directory of extra YAML signature rules.
    #[arg(short, long)]
    rules_directory: Option<String>,

    /// Trained anomaly model (JSON weights); omit for signature-only mode.
    #[arg(short, long)]
    model_file: Option<PathBuf>,

    #[arg(long, default_value = "10")]
    detect_interval: u64,

    #[arg(long, default_value = "10")]
    flood_threshold: usize,

    #[arg(long, default_value = "60")]
    time_window: u64,

    #[arg(long, default_value = "-0.05", allow_hyphen_values = true)]
    score_threshold: f64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("logwarden={}", args.log_level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting logwarden - streaming log threat detection");

    if let Some(parent) = args.alerts_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = args.state_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = WardenConfig {
        flood_threshold: args.flood_threshold,
        time_window_secs: args.time_window,
        detect_interval_secs: args.detect_interval,
        score_threshold: args.score_threshold,
        rules_directory: args.rules_directory.clone(),
        ..Default::default()
    };

    // Alerts flow through a bounded channel so a slow sink can never stall a
    // detection pass; the drain task owns the file writes.
    let (alert_tx, mut alert_rx) = mpsc::channel::<Alert>(1024);
    let file_sink = FileSink::new(&args.alerts_file);
    let drain_handle = tokio::spawn(async move {
        while let Some(alert) = alert_rx.recv().await {
            if let Err(e) = file_sink.notify(&alert) {
                warn!("Failed to write alert: {e:#}");
            }
        }
    });

    let cursor = LogCursor::open(&args.log_file, &args.state_file);
    let mut engine = DetectionEngine::new(&config, cursor, Box::new(ChannelSink::new(alert_tx)));

    match &args.model_file {
        Some(path) => match LinearModel::load(path) {
            Ok(model) => {
                info!("Anomaly model loaded from {}", path.display());
                engine.set_model(Box::new(model), config.score_threshold);
            }
            Err(e) => {
                warn!("Anomaly model unusable, running signature-only: {e:#}");
            }
        },
        None => info!("No model configured, running signature-only"),
    }

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        config.detect_interval_secs.max(1),
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        "Watching {} every {}s",
        args.log_file.display(),
        config.detect_interval_secs
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.run_pass() {
                    Ok(summary) if summary.lines_read > 0 => {
                        info!(
                            "{} new lines, {} alerts, {} skipped records",
                            summary.lines_read, summary.alerts, summary.skipped_records,
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Detection pass failed: {e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    // Dropping the engine closes the alert channel; let the drain task flush.
    drop(engine);
    let _ = drain_handle.await;
    info!("logwarden shutdown complete");
    Ok(())
}
