mod checkpoint;
mod client;
mod config;
mod regimen;
mod schedule;
mod scheduler;

use anyhow::{Context, Result};
use std::{env, path::PathBuf};
use time::{OffsetDateTime, UtcOffset};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use checkpoint::CheckpointStore;
use client::ControlClient;
use regimen::SlotTime;
use scheduler::Scheduler;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Must be queried while the process is still single-threaded.
    let host_offset = UtcOffset::current_local_offset();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config file + env overrides ─────────────────────────────────
    let config_path =
        PathBuf::from(env::var("CONFIG_PATH").unwrap_or_else(|_| "scheduler.toml".to_string()));
    let cfg = config::load(&config_path, |key| env::var(key).ok())?;

    let offset = match cfg.utc_offset_minutes {
        Some(minutes) => UtcOffset::from_whole_seconds(minutes * 60)
            .context("invalid utc_offset_minutes")?,
        None => host_offset.unwrap_or_else(|e| {
            warn!("local UTC offset unavailable ({e}), scheduling in UTC");
            UtcOffset::UTC
        }),
    };
    info!(
        config = %config_path.display(),
        control = %format!("{}:{}", cfg.control.host, cfg.control.port),
        utc_offset = %offset,
        "scheduler starting"
    );

    // ── Scheduler ───────────────────────────────────────────────────
    let client = ControlClient::new(
        &cfg.control.host,
        cfg.control.port,
        cfg.control.connect_timeout(),
        cfg.control.response_timeout(),
    );
    let scheduler = Scheduler::new(
        cfg.schedule_path.clone(),
        CheckpointStore::new(cfg.checkpoint_path.clone()),
        client,
        cfg.control.watering_duration_sec,
    );

    let clock = move || SlotTime::from(OffsetDateTime::now_utc().to_offset(offset).time());

    // Only returns on a configuration error; exit non-zero.
    scheduler.run(cfg.poll_interval(), clock).await
}
