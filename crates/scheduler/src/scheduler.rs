//! Timed watering scheduler: polls the schedule file and the clock and
//! triggers one watering attempt per due slot through the control client.
//!
//! ## Per-tick flow
//!
//! ```text
//! load schedule ──[unreadable]──▶ skip tick
//!      │
//!      ▼
//! changed? ──▶ warn if out of range, recompile regimen
//!      │
//!      ▼
//! due slot == last triggered? ──[yes]──▶ idle
//!      │ no
//!      ▼
//! water ──▶ persist checkpoint (whatever the outcome) ──▶ log outcome
//! ```
//!
//! The checkpoint is written even when the attempt fails, so a failed slot
//! is skipped rather than retried every tick.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::client::WateringClient;
use crate::regimen::{self, Regimen, RegimenError, SlotTime};
use crate::schedule::Schedule;

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// The schedule could not be read; nothing else happened.
    Skipped,
    /// Nothing due (empty regimen, or the due slot already fired).
    Idle,
    Watered { slot: SlotTime, succeeded: bool },
}

pub(crate) struct Scheduler<C> {
    schedule_path: PathBuf,
    checkpoints: CheckpointStore,
    client: C,
    duration_sec: u64,

    schedule: Option<Schedule>,
    regimen: Regimen,
    /// Mirrors the checkpoint file; authoritative if a write fails.
    last_triggered: Option<SlotTime>,
    /// Last schedule load error, so a persistent one is logged once.
    load_error: Option<String>,
}

impl<C: WateringClient> Scheduler<C> {
    pub(crate) fn new(
        schedule_path: PathBuf,
        checkpoints: CheckpointStore,
        client: C,
        duration_sec: u64,
    ) -> Self {
        let last_triggered = match checkpoints.load() {
            Ok(slot) => slot,
            Err(e) => {
                warn!("ignoring unreadable checkpoint: {e:#}");
                None
            }
        };
        info!(
            checkpoint = %checkpoints.path().display(),
            last_triggered = ?last_triggered.map(|s| s.to_string()),
            "checkpoint loaded"
        );

        Self {
            schedule_path,
            checkpoints,
            client,
            duration_sec,
            schedule: None,
            regimen: Regimen::default(),
            last_triggered,
            load_error: None,
        }
    }

    /// Poll forever. Returns only on a configuration error in the regimen.
    pub(crate) async fn run(
        mut self,
        poll: Duration,
        mut clock: impl FnMut() -> SlotTime,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(poll);
        // A watering attempt blocks for minutes; don't burst ticks afterwards.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            schedule = %self.schedule_path.display(),
            poll_ms = poll.as_millis() as u64,
            duration_sec = self.duration_sec,
            "scheduler started"
        );

        loop {
            ticker.tick().await;
            self.tick(clock()).await?;
        }
    }

    pub(crate) async fn tick(&mut self, now: SlotTime) -> Result<TickOutcome, RegimenError> {
        let schedule = match Schedule::load(&self.schedule_path) {
            Ok(s) => {
                if self.load_error.take().is_some() {
                    info!("schedule readable again");
                }
                s
            }
            Err(e) => {
                let msg = format!("{e:#}");
                if self.load_error.as_deref() == Some(msg.as_str()) {
                    debug!("schedule still unreadable: {msg}");
                } else {
                    warn!("skipping tick, schedule unreadable: {msg}");
                    self.load_error = Some(msg);
                }
                return Ok(TickOutcome::Skipped);
            }
        };

        if self.schedule != Some(schedule) {
            if let Err(e) = schedule.validate() {
                warn!("schedule asks for more than its windows hold: {e:#}");
            }
            self.regimen = regimen::compile(&schedule)?;
            self.schedule = Some(schedule);
            info!(
                morning = schedule.morning,
                afternoon = schedule.afternoon,
                night = schedule.night,
                "updated schedule"
            );
            debug!(regimen = %self.regimen, pulses = self.regimen.slots().len(), "updated regimen");
        }

        let Some(due) = self.regimen.due_slot(now) else {
            return Ok(TickOutcome::Idle);
        };
        if self.last_triggered == Some(due) {
            return Ok(TickOutcome::Idle);
        }

        info!(slot = %due, now = %now, duration_sec = self.duration_sec, "watering");
        let succeeded = match self.client.water(self.duration_sec).await {
            Ok(success) => success,
            Err(e) => {
                warn!(slot = %due, "watering attempt did not complete: {e}");
                false
            }
        };

        self.last_triggered = Some(due);
        if let Err(e) = self.checkpoints.save(due) {
            error!(slot = %due, "failed to persist checkpoint: {e:#}");
        }

        if succeeded {
            info!(slot = %due, "watering succeeded");
        } else {
            warn!(slot = %due, "watering failed");
        }

        Ok(TickOutcome::Watered {
            slot: due,
            succeeded,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
