//! The schedule document written by the editing UI: total watering minutes
//! wanted in each day-part window.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::regimen::{Window, AFTERNOON, MORNING, NIGHT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Schedule {
    pub(crate) morning: u32,
    pub(crate) afternoon: u32,
    pub(crate) night: u32,
}

impl Schedule {
    /// Read and parse the schedule file. Any failure here is treated by the
    /// loop as transient (the UI may be mid-write).
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schedule: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse schedule: {}", path.display()))
    }

    /// Each window paired with its requested minutes, in firing order.
    pub(crate) fn windows(&self) -> [(Window, u32); 3] {
        [
            (MORNING, self.morning),
            (AFTERNOON, self.afternoon),
            (NIGHT, self.night),
        ]
    }

    /// A window cannot hold more one-minute pulses than it has minutes. The
    /// compiler stops at the window's end regardless, so an excess only
    /// means fewer pulses than asked for.
    pub(crate) fn validate(&self) -> Result<()> {
        let errors: Vec<String> = self
            .windows()
            .iter()
            .filter(|(w, minutes)| *minutes > w.span_minutes())
            .map(|(w, minutes)| {
                format!(
                    "{}: {minutes} minutes exceeds the {}-minute window",
                    w.name,
                    w.span_minutes()
                )
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            bail!("schedule out of range: {}", errors.join("; "));
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
