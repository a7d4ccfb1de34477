//! Durable record of the last slot a watering was triggered for, stored as a
//! single `"<hour>,<minute>\n"` line.

use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::regimen::SlotTime;

pub(crate) struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no checkpoint has been written yet.
    pub(crate) fn load(&self) -> Result<Option<SlotTime>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read checkpoint: {}", self.path.display()))
            }
        };
        parse(&contents)
            .map(Some)
            .with_context(|| format!("invalid checkpoint: {}", self.path.display()))
    }

    /// Replace the checkpoint. Written to a sibling temp file and renamed so a
    /// crash mid-write never leaves a torn line behind.
    pub(crate) fn save(&self, slot: SlotTime) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, format_line(slot))
            .with_context(|| format!("failed to write checkpoint: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace checkpoint: {}", self.path.display()))
    }
}

fn format_line(slot: SlotTime) -> String {
    format!("{},{}\n", slot.hour(), slot.minute())
}

fn parse(contents: &str) -> Result<SlotTime> {
    let line = contents.lines().next().unwrap_or_default();
    let (hour, minute) = line
        .split_once(',')
        .ok_or_else(|| anyhow!("expected \"<hour>,<minute>\", got {line:?}"))?;
    let hour: u8 = hour
        .trim()
        .parse()
        .with_context(|| format!("bad hour {hour:?}"))?;
    let minute: u8 = minute
        .trim()
        .parse()
        .with_context(|| format!("bad minute {minute:?}"))?;
    SlotTime::new(hour, minute).ok_or_else(|| anyhow!("{hour}:{minute:02} is not a time of day"))
}

// ===========================================================================
// Tests
// ===========================================================================
