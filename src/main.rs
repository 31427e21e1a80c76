//! Entrypoint for `cashier-sentryd`: loads a fleet of per-camera configs,
//! starts one worker per camera under a `Supervisor`, and runs until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cashier_sentry::config::CameraConfig;
use cashier_sentry::event::{EventSink, NullSink};
use cashier_sentry::sink::PostgresSink;
use cashier_sentry::supervisor::Supervisor;
use tracing::{error, info, warn};

const REAP_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("cashier_sentry=info".parse()?),
        )
        .init();

    info!("cashier-sentryd starting");

    gstreamer::init().context("failed to initialize GStreamer")?;

    let config_dir = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./cameras"));
    info!(dir = %config_dir.display(), "loading camera fleet");
    let fleet = CameraConfig::load_fleet(&config_dir).context("failed to load camera fleet")?;
    if fleet.is_empty() {
        warn!(dir = %config_dir.display(), "no camera configs found, nothing to supervise");
    }

    let sink: Arc<dyn EventSink> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let sink = PostgresSink::connect(&url).await.context("failed to connect to event store")?;
            sink.run_migrations().await.context("failed to run event store migrations")?;
            Arc::new(sink)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, events will be detected but not durably recorded");
            Arc::new(NullSink)
        }
    };

    let mut supervisor = Supervisor::new(sink);
    let camera_count = fleet.len();
    supervisor.start_all(fleet);
    info!(camera_count, "camera workers started");

    let mut reap_tick = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = reap_tick.tick() => {
                for camera_id in supervisor.reap() {
                    error!(camera_id, "camera worker ended unexpectedly");
                }
            }
        }
    }

    info!("stopping all camera workers");
    supervisor.stop_all().await;
    info!("cashier-sentryd stopped");

    Ok(())
}
