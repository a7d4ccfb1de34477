//! Valve, pump, and float-switch access. The `gpio` feature gates the real
//! rppal driver; without it, a simulated board logs state changes.

use anyhow::Result;

/// The three physical signals the watering cycle needs. Every call can fail
/// so a broken relay or sensor read surfaces as a fault instead of a panic.
pub(crate) trait Hardware {
    fn set_valve(&mut self, open: bool) -> Result<()>;
    fn set_pump(&mut self, on: bool) -> Result<()>;
    /// `true` when the reservoir level is below the float switch.
    fn float_switch_low(&mut self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Real GPIO board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) use gpio_board::GpioBoard;

#[cfg(feature = "gpio")]
mod gpio_board {
    use super::Hardware;
    use anyhow::{Context, Result};
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use tracing::info;

    use crate::config::Pins;

    pub(crate) struct GpioBoard {
        valve: OutputPin,
        pump: OutputPin,
        float_switch: InputPin,
        active_low: bool, // many relay boards are active-low
    }

    impl GpioBoard {
        pub(crate) fn new(pins: &Pins, active_low: bool) -> Result<Self> {
            let gpio = Gpio::new().context("failed to open gpio")?;
            let valve = gpio
                .get(pins.valve)
                .with_context(|| format!("valve gpio {}", pins.valve))?
                .into_output();
            let pump = gpio
                .get(pins.pump)
                .with_context(|| format!("pump gpio {}", pins.pump))?
                .into_output();
            // The float switch closes to ground while water is present, so
            // the pulled-up input reads high when the level is low.
            let float_switch = gpio
                .get(pins.float_switch)
                .with_context(|| format!("float switch gpio {}", pins.float_switch))?
                .into_input_pullup();

            let mut board = Self {
                valve,
                pump,
                float_switch,
                active_low,
            };

            // Fail-safe: pump first, then valve.
            board.set_pump(false)?;
            board.set_valve(false)?;
            info!(
                valve = pins.valve,
                pump = pins.pump,
                float_switch = pins.float_switch,
                active_low,
                "gpio board initialised"
            );
            Ok(board)
        }

        fn drive(pin: &mut OutputPin, on: bool, active_low: bool) {
            // active-low relay: LOW = ON, HIGH = OFF
            if on != active_low {
                pin.set_high()
            } else {
                pin.set_low()
            }
        }
    }

    impl Hardware for GpioBoard {
        fn set_valve(&mut self, open: bool) -> Result<()> {
            Self::drive(&mut self.valve, open, self.active_low);
            Ok(())
        }

        fn set_pump(&mut self, on: bool) -> Result<()> {
            Self::drive(&mut self.pump, on, self.active_low);
            Ok(())
        }

        fn float_switch_low(&mut self) -> Result<bool> {
            Ok(self.float_switch.is_high())
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated board (no hardware, logs state)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct SimBoard {
    valve_open: bool,
    pump_on: bool,
    float_low_prob: f32,
}

#[cfg(not(feature = "gpio"))]
impl SimBoard {
    pub(crate) fn new(float_low_prob: f32) -> Self {
        tracing::info!(float_low_prob, "[sim] valve/pump board initialised (no hardware)");
        Self {
            valve_open: false,
            pump_on: false,
            float_low_prob,
        }
    }
}

#[cfg(not(feature = "gpio"))]
impl Hardware for SimBoard {
    fn set_valve(&mut self, open: bool) -> Result<()> {
        if !open && self.pump_on {
            tracing::warn!("[sim] closing valve while pump is running");
        }
        self.valve_open = open;
        tracing::info!("[sim] valve {}", if open { "OPEN" } else { "CLOSED" });
        Ok(())
    }

    fn set_pump(&mut self, on: bool) -> Result<()> {
        if on && !self.valve_open {
            tracing::warn!("[sim] pump started against a closed valve");
        }
        self.pump_on = on;
        tracing::info!("[sim] pump {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    fn float_switch_low(&mut self) -> Result<bool> {
        #[cfg(feature = "sim")]
        {
            Ok(self.float_low_prob > 0.0 && fastrand::f32() < self.float_low_prob)
        }
        #[cfg(not(feature = "sim"))]
        {
            Ok(false)
        }
    }
}


// ===========================================================================
// Tests
// ===========================================================================
