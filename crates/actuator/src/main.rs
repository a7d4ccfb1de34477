mod actions;
mod config;
mod hardware;
mod protocol;
mod server;
mod watering;

use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use actions::ActionTable;
use config::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(
        port = cfg.port,
        pins = ?cfg.pins,
        relay_active_low = cfg.relay_active_low,
        buffer_ms = cfg.timing.buffer.as_millis() as u64,
        poll_ms = cfg.timing.poll.as_millis() as u64,
        "actuator starting"
    );

    // ── Hardware ────────────────────────────────────────────────────
    #[cfg(feature = "gpio")]
    let mut hw = hardware::GpioBoard::new(&cfg.pins, cfg.relay_active_low)?;
    #[cfg(not(feature = "gpio"))]
    let mut hw = hardware::SimBoard::new(cfg.sim_float_low_prob);

    // ── Control service ─────────────────────────────────────────────
    let actions = ActionTable::standard();
    info!(actions = ?actions.names(), "action table ready");

    let listener = server::bind(SocketAddr::from(([0, 0, 0, 0], cfg.port)))?;

    // Only returns on an unrecoverable fault; exit non-zero so a supervisor
    // restarts the service.
    server::serve(listener, &actions, &mut hw, &cfg.timing).await
}
