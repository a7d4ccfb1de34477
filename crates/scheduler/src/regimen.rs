//! Compiles a [`Schedule`] into the times of day at which a one-minute
//! watering pulse fires.
//!
//! Each window spreads its pulses evenly: with `n` minutes requested over a
//! `span`-minute window the pulses are `ceil(span / n)` minutes apart,
//! starting at the window's first minute. Never more than `n` pulses are
//! emitted, and none at or after the window's end.

use std::fmt;
use thiserror::Error;

use crate::schedule::Schedule;

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

/// Minutes since midnight, `0..1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SlotTime(u16);

impl SlotTime {
    pub(crate) fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    pub(crate) fn from_minutes(minutes: u32) -> Option<Self> {
        u16::try_from(minutes).ok().filter(|m| *m < 24 * 60).map(Self)
    }

    pub(crate) fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub(crate) fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }
}

impl From<time::Time> for SlotTime {
    fn from(t: time::Time) -> Self {
        Self(u16::from(t.hour()) * 60 + u16::from(t.minute()))
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour(), self.minute())
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// A day-part during which pulses may fire, `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub(crate) name: &'static str,
    pub(crate) start_hour: u8,
    pub(crate) end_hour: u8,
}

pub(crate) const MORNING: Window = Window {
    name: "morning",
    start_hour: 6,
    end_hour: 9,
};

pub(crate) const AFTERNOON: Window = Window {
    name: "afternoon",
    start_hour: 11,
    end_hour: 17,
};

pub(crate) const NIGHT: Window = Window {
    name: "night",
    start_hour: 19,
    end_hour: 22,
};

impl Window {
    pub(crate) fn span_minutes(&self) -> u32 {
        u32::from(self.end_hour.saturating_sub(self.start_hour)) * 60
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RegimenError {
    #[error(
        "configuration error: {window} window must satisfy {start_hour} < end hour {end_hour} <= 24"
    )]
    Configuration {
        window: &'static str,
        start_hour: u8,
        end_hour: u8,
    },
}

// ---------------------------------------------------------------------------
// Regimen
// ---------------------------------------------------------------------------

/// Ordered pulse times for one schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Regimen(Vec<SlotTime>);

impl Regimen {
    pub(crate) fn slots(&self) -> &[SlotTime] {
        &self.0
    }

    /// The latest slot at or before `now`. Before the first slot of the day
    /// this is the latest slot overall, i.e. yesterday's last pulse.
    pub(crate) fn due_slot(&self, now: SlotTime) -> Option<SlotTime> {
        self.0
            .iter()
            .copied()
            .filter(|slot| *slot <= now)
            .max()
            .or_else(|| self.0.iter().copied().max())
    }
}

impl fmt::Display for Regimen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<EMPTY>");
        }
        for (i, slot) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{slot}")?;
        }
        Ok(())
    }
}

/// Pulse times for a single window.
pub(crate) fn compile_window(
    window: &Window,
    duration_minutes: u32,
) -> Result<Vec<SlotTime>, RegimenError> {
    if duration_minutes == 0 {
        return Ok(Vec::new());
    }
    if window.end_hour <= window.start_hour || window.end_hour > 24 {
        return Err(RegimenError::Configuration {
            window: window.name,
            start_hour: window.start_hour,
            end_hour: window.end_hour,
        });
    }

    let start = u32::from(window.start_hour) * 60;
    let end = u32::from(window.end_hour) * 60;
    let period = window.span_minutes().div_ceil(duration_minutes);

    Ok((start..end)
        .step_by(period as usize)
        .take(duration_minutes as usize)
        .filter_map(SlotTime::from_minutes)
        .collect())
}

/// Concatenate morning, afternoon, and night pulses.
pub(crate) fn compile(schedule: &Schedule) -> Result<Regimen, RegimenError> {
    let mut slots = Vec::new();
    for (window, minutes) in schedule.windows() {
        slots.extend(compile_window(&window, minutes)?);
    }
    Ok(Regimen(slots))
}

// ===========================================================================
// Tests
// ===========================================================================
