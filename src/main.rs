use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use camera_monitor::{
    Broadcaster, MonitorRegistry, SubscriberHub, config::MonitorConfig, logging::init_logging,
};
use clap::Parser;
use tracing::{error, info};

/// Multi-camera presence monitor:
/// - ws:// / wss:// push cameras (one JPEG per message)
/// - udpserver://bindIP:bindPort/sourceIP chunked-JPEG cameras (shared ports)
/// - anything else: HTTP MJPEG/snapshot pull sources
#[derive(Parser, Debug)]
#[command(name = "monitor")]
#[command(about = "Watch cameras and report debounced person, cup and motion presence")]
struct Args {
    /// Camera address (repeatable)
    #[arg(short, long = "camera", value_name = "ADDR")]
    cameras: Vec<String>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print status snapshots of the camera matching QUERY as JSON lines
    #[arg(short, long, value_name = "QUERY")]
    watch: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref(), false)?;

    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    config.cameras.extend(args.cameras);
    config.validate().map_err(anyhow::Error::msg)?;

    let period = Duration::from_millis(config.broadcast_interval_ms);
    let cameras = config.cameras.clone();
    let registry = Arc::new(MonitorRegistry::new(config));

    for address in &cameras {
        // A bad camera must not take the others down.
        if let Err(e) = registry.register(address) {
            error!(address = %address, error = %e, "failed to register camera");
        }
    }
    info!(cameras = registry.len(), "monitor running; Ctrl-C to stop");

    let hub = Arc::new(SubscriberHub::new(Arc::clone(&registry)));
    let broadcaster = Broadcaster::spawn(Arc::clone(&hub), period);

    let printer = match &args.watch {
        Some(query) => {
            let (_, mut rx) = hub.subscribe_channel(query).await?;
            Some(tokio::spawn(async move {
                while let Some(snapshot) = rx.recv().await {
                    match serde_json::to_string(&snapshot) {
                        Ok(line) => println!("{line}"),
                        Err(e) => error!(error = %e, "failed to encode snapshot"),
                    }
                }
            }))
        }
        None => None,
    };

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");

    broadcaster.shutdown().await;
    if let Some(printer) = printer {
        printer.abort();
    }
    // Worker joins block; keep them off the async executor.
    let stopping = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || stopping.stop_all()).await?;
    Ok(())
}
