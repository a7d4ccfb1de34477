//! Environment-driven configuration for the actuator service.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::watering::Timing;

/// BCM pin numbers for the three hardware signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pins {
    pub(crate) valve: u8,
    pub(crate) pump: u8,
    pub(crate) float_switch: u8,
}

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) port: u16,
    pub(crate) pins: Pins,
    pub(crate) relay_active_low: bool,
    pub(crate) timing: Timing,
    /// Chance per float switch poll that the simulated switch reads low.
    pub(crate) sim_float_low_prob: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            pins: Pins {
                valve: 5,
                pump: 4,
                float_switch: 14,
            },
            relay_active_low: true,
            timing: Timing::default(),
            sim_float_low_prob: 0.0,
        }
    }
}

impl Config {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = parsed(&lookup, "CONTROL_PORT")? {
            cfg.port = v;
        }
        if let Some(v) = parsed(&lookup, "VALVE_GPIO")? {
            cfg.pins.valve = v;
        }
        if let Some(v) = parsed(&lookup, "PUMP_GPIO")? {
            cfg.pins.pump = v;
        }
        if let Some(v) = parsed(&lookup, "FLOAT_GPIO")? {
            cfg.pins.float_switch = v;
        }
        if let Some(v) = lookup("RELAY_ACTIVE_LOW") {
            cfg.relay_active_low = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(ms) = parsed::<u64>(&lookup, "BUFFER_MS")? {
            cfg.timing.buffer = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>(&lookup, "FLOAT_POLL_MS")? {
            cfg.timing.poll = Duration::from_millis(ms);
        }
        if let Some(p) = parsed(&lookup, "SIM_FLOAT_LOW_PROB")? {
            cfg.sim_float_low_prob = p;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Returns an error describing every violation found.
    pub(crate) fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.timing.poll.is_zero() {
            errors.push("FLOAT_POLL_MS must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.sim_float_low_prob) {
            errors.push(format!(
                "SIM_FLOAT_LOW_PROB {} out of range [0.0, 1.0]",
                self.sim_float_low_prob
            ));
        }

        let mut seen = HashSet::new();
        for (name, pin) in [
            ("VALVE_GPIO", self.pins.valve),
            ("PUMP_GPIO", self.pins.pump),
            ("FLOAT_GPIO", self.pins.float_switch),
        ] {
            if !seen.insert(pin) {
                errors.push(format!("{name} {pin} is already used by another signal"));
            }
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
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid {key}: {raw:?}"))
        })
        .transpose()
}

// ===========================================================================
// Tests
// ===========================================================================
