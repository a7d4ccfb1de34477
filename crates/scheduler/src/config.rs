//! TOML config file loading, environment overrides, and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Slack on top of the actuator's own cycle time before it is declared
/// unresponsive.
const RESPONSE_MARGIN_SEC: u64 = 30;

/// The actuator pressurises and drains for this long around each pulse.
const ACTUATOR_BUFFER_SEC: u64 = 10;

/// Largest UTC offset accepted, in minutes (±18h).
const MAX_UTC_OFFSET_MIN: i32 = 18 * 60;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub schedule_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub poll_interval_ms: u64,
    /// Local time = UTC + this. Unset: use the host's offset.
    pub utc_offset_minutes: Option<i32>,
    pub control: ControlConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    pub host: String,
    pub port: u16,
    pub watering_duration_sec: u64,
    pub connect_timeout_sec: u64,
    /// Unset: derived from the watering duration.
    pub response_timeout_sec: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schedule_path: PathBuf::from("schedule.json"),
            checkpoint_path: PathBuf::from("last_watering"),
            poll_interval_ms: 1000,
            utc_offset_minutes: None,
            control: ControlConfig::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            watering_duration_sec: 60,
            connect_timeout_sec: 10,
            response_timeout_sec: None,
        }
    }
}

impl ControlConfig {
    /// How long to wait for the actuator's reply: a full cycle (two buffers
    /// plus the pulse) and a margin, unless configured explicitly.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_sec.unwrap_or_else(|| {
            self.watering_duration_sec
                .saturating_add(2 * ACTUATOR_BUFFER_SEC + RESPONSE_MARGIN_SEC)
        }))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate all entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.schedule_path.as_os_str().is_empty() {
            errors.push("schedule_path is empty".to_string());
        }
        if self.checkpoint_path.as_os_str().is_empty() {
            errors.push("checkpoint_path is empty".to_string());
        }
        if !self.schedule_path.as_os_str().is_empty()
            && self.schedule_path == self.checkpoint_path
        {
            errors.push(format!(
                "schedule_path and checkpoint_path are both {}",
                self.schedule_path.display()
            ));
        }
        if self.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be positive".to_string());
        }
        if let Some(m) = self.utc_offset_minutes {
            if m.abs() > MAX_UTC_OFFSET_MIN {
                errors.push(format!(
                    "utc_offset_minutes {m} out of range [-{MAX_UTC_OFFSET_MIN}, {MAX_UTC_OFFSET_MIN}]"
                ));
            }
        }

        // ── Control channel ─────────────────────────────────────────
        if self.control.host.trim().is_empty() {
            errors.push("control.host is empty".to_string());
        }
        if self.control.port == 0 {
            errors.push("control.port must be positive".to_string());
        }
        if self.control.watering_duration_sec == 0 {
            errors.push("control.watering_duration_sec must be positive".to_string());
        }
        if self.control.connect_timeout_sec == 0 {
            errors.push("control.connect_timeout_sec must be positive".to_string());
        }
        if self.control.response_timeout_sec == Some(0) {
            errors.push("control.response_timeout_sec must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    /// Apply the deployment's environment variables on top of the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("CONTROL_MODULE_IP") {
            self.control.host = host;
        }
        if let Some(port) = lookup("CONTROL_MODULE_PORT") {
            self.control.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid CONTROL_MODULE_PORT: {port:?}"))?;
        }
        if let Some(path) = lookup("WATERING_SCHEDULE_PATH") {
            self.schedule_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("LAST_WATERING_PATH") {
            self.checkpoint_path = PathBuf::from(path);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read the TOML file (defaults if it does not exist), apply environment
/// overrides, and validate.
pub fn load(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config: {}", path.display()))
        }
    };
    config
        .apply_overrides(lookup)
        .context("invalid environment override")?;
    config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
