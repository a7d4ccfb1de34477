//! Safety-interlocked watering cycle.
//!
//! ```text
//! Idle ──[float ok]──▶ ValveOpen ──[buffer]──▶ PumpOn ──[duration]──▶ PumpOff ──[drain]──▶ ValveClosed
//!  │                       │                      │
//!  └─[float low]─▶ abort   └──[float low]─────────┴──▶ shutdown sequence
//! ```
//!
//! The main stage may stop early (float switch low, or a hardware fault).
//! The shutdown sequence runs exactly once afterwards, whatever happened, and
//! always switches the pump off before the valve is closed.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::hardware::Hardware;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timing {
    /// Pressurise time before the pump starts, and drain time after it stops.
    pub(crate) buffer: Duration,
    /// Float switch polling period while waiting.
    pub(crate) poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            buffer: Duration::from_secs(10),
            poll: Duration::from_millis(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellable wait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    TimedOut,
    Cancelled,
}

/// Sleep for `total`, checking `cancelled` every `poll`. The check runs once
/// before each sleep, so a zero-length wait never consults it.
pub(crate) async fn wait_or_cancel(
    total: Duration,
    poll: Duration,
    mut cancelled: impl FnMut() -> Result<bool>,
) -> Result<WaitOutcome> {
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= total {
            return Ok(WaitOutcome::TimedOut);
        }
        if cancelled()? {
            return Ok(WaitOutcome::Cancelled);
        }
        sleep(poll.min(total - elapsed)).await;
    }
}

// ---------------------------------------------------------------------------
// Cycle outcome
// ---------------------------------------------------------------------------

/// Where a cycle stopped when the float switch read low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Before any output was touched.
    Start,
    /// Valve open, waiting for line pressure.
    Pressurizing,
    /// Pump running.
    Pumping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Completed,
    Aborted(Stage),
}

impl CycleOutcome {
    pub(crate) fn succeeded(self) -> bool {
        matches!(self, Self::Completed)
    }
}

// ---------------------------------------------------------------------------
// Shutdown sequence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownStep {
    PumpOff,
    /// Wait one buffer interval for residual pressure; only after the pump ran.
    Drain,
    /// Only if the valve was commanded open.
    CloseValve,
}

pub(crate) const SHUTDOWN_SEQUENCE: [ShutdownStep; 3] = [
    ShutdownStep::PumpOff,
    ShutdownStep::Drain,
    ShutdownStep::CloseValve,
];

/// Which outputs the main stage got as far as commanding.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    valve_opened: bool,
    pump_engaged: bool,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run one watering cycle with the pump on for `duration`.
///
/// `Ok(Completed)` means the full duration ran. A float switch abort is a
/// normal `Ok(Aborted(_))`. `Err` is a hardware fault; outputs have still been
/// shut down as far as the hardware allowed.
pub(crate) async fn run_cycle<H: Hardware>(
    hw: &mut H,
    timing: &Timing,
    duration: Duration,
) -> Result<CycleOutcome> {
    info!(duration_sec = duration.as_secs(), "watering cycle requested");

    if hw.float_switch_low().context("float switch read failed")? {
        warn!("float switch low before start — not watering");
        return Ok(CycleOutcome::Aborted(Stage::Start));
    }

    let mut progress = Progress::default();
    let main = main_stage(hw, timing, duration, &mut progress).await;
    let cleanup = shutdown(hw, timing, progress).await;

    match (main, cleanup) {
        (Ok(outcome), Ok(())) => {
            match outcome {
                CycleOutcome::Completed => info!("watering cycle complete"),
                CycleOutcome::Aborted(stage) => {
                    warn!(?stage, "float switch low — watering cycle aborted")
                }
            }
            Ok(outcome)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            error!("shutdown after fault also failed: {cleanup_err:#}");
            Err(e)
        }
    }
}

async fn main_stage<H: Hardware>(
    hw: &mut H,
    timing: &Timing,
    duration: Duration,
    progress: &mut Progress,
) -> Result<CycleOutcome> {
    // Marked before the write: a failed write may still have moved the relay.
    progress.valve_opened = true;
    hw.set_valve(true).context("failed to open valve")?;
    info!(buffer_ms = timing.buffer.as_millis() as u64, "valve open, pressurizing");

    let outcome = wait_or_cancel(timing.buffer, timing.poll, || hw.float_switch_low())
        .await
        .context("float switch read failed while pressurizing")?;
    if outcome == WaitOutcome::Cancelled {
        return Ok(CycleOutcome::Aborted(Stage::Pressurizing));
    }

    progress.pump_engaged = true;
    hw.set_pump(true).context("failed to engage pump")?;
    info!(duration_sec = duration.as_secs(), "pump on");

    let outcome = wait_or_cancel(duration, timing.poll, || hw.float_switch_low())
        .await
        .context("float switch read failed while pumping")?;
    if outcome == WaitOutcome::Cancelled {
        return Ok(CycleOutcome::Aborted(Stage::Pumping));
    }

    Ok(CycleOutcome::Completed)
}

async fn shutdown<H: Hardware>(hw: &mut H, timing: &Timing, progress: Progress) -> Result<()> {
    for step in SHUTDOWN_SEQUENCE {
        match step {
            ShutdownStep::PumpOff => {
                // Never close the valve against a pump that may still run.
                if let Err(e) = hw.set_pump(false) {
                    error!("pump did not switch off — leaving valve open: {e:#}");
                    return Err(e.context("failed to switch pump off"));
                }
                info!("pump off");
            }
            ShutdownStep::Drain => {
                if progress.pump_engaged {
                    info!(buffer_ms = timing.buffer.as_millis() as u64, "draining");
                    sleep(timing.buffer).await;
                }
            }
            ShutdownStep::CloseValve => {
                if progress.valve_opened {
                    hw.set_valve(false).context("failed to close valve")?;
                    info!("valve closed");
                }
            }
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{Fault, HwEvent, MockBoard};

    fn timing() -> Timing {
        Timing::default()
    }

    fn position(events: &[HwEvent], ev: HwEvent) -> Option<usize> {
        events.iter().position(|e| *e == ev)
    }

    // -- wait_or_cancel -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_never_cancelled() {
        let start = Instant::now();
        let mut checks = 0;
        let outcome = wait_or_cancel(Duration::from_secs(1), Duration::from_millis(300), || {
            checks += 1;
            Ok(false)
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        // checks at 0, 300, 600, 900 ms
        assert_eq!(checks, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_cancels_at_next_poll() {
        let start = Instant::now();
        let mut checks = 0;
        let outcome = wait_or_cancel(Duration::from_secs(10), Duration::from_millis(300), || {
            checks += 1;
            Ok(checks == 3)
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_propagates_check_error() {
        let res = wait_or_cancel(Duration::from_secs(1), Duration::from_millis(300), || {
            anyhow::bail!("sensor gone")
        })
        .await;
        assert!(res.is_err());
    }

    // -- Happy path ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn full_cycle_completes_in_order() {
        let mut hw = MockBoard::new();
        let start = Instant::now();
        let outcome = run_cycle(&mut hw, &timing(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Completed);
        assert!(outcome.succeeded());
        assert_eq!(
            hw.events,
            vec![
                HwEvent::ValveOpen,
                HwEvent::PumpOn,
                HwEvent::PumpOff,
                HwEvent::ValveClosed
            ]
        );
        assert!(!hw.pump_on);
        assert!(!hw.valve_open);
        // buffer + duration + drain
        assert_eq!(start.elapsed(), Duration::from_secs(80));
    }

    // -- Entry guard --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn float_low_before_start_touches_nothing() {
        let mut hw = MockBoard::low_from(0);
        let outcome = run_cycle(&mut hw, &timing(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Aborted(Stage::Start));
        assert!(!outcome.succeeded());
        assert!(hw.events.is_empty());
    }

    // -- Float switch aborts -----------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn float_low_while_pressurizing_never_starts_pump() {
        let mut hw = MockBoard::low_from(5);
        let outcome = run_cycle(&mut hw, &timing(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Aborted(Stage::Pressurizing));
        assert_eq!(
            hw.events,
            vec![HwEvent::ValveOpen, HwEvent::PumpOff, HwEvent::ValveClosed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn float_low_while_pumping_shuts_down_without_reopening() {
        // read 0 is the entry check, 1..=34 cover the 10s buffer
        let mut hw = MockBoard::low_from(40);
        let start = Instant::now();
        let outcome = run_cycle(&mut hw, &timing(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Aborted(Stage::Pumping));
        assert_eq!(
            hw.events,
            vec![
                HwEvent::ValveOpen,
                HwEvent::PumpOn,
                HwEvent::PumpOff,
                HwEvent::ValveClosed
            ]
        );
        assert_eq!(
            hw.events.iter().filter(|e| **e == HwEvent::ValveOpen).count(),
            1
        );
        assert!(!hw.pump_on);
        assert!(!hw.valve_open);
        // aborted before the full 5s of pumping
        assert!(start.elapsed() < Duration::from_secs(25));
    }

    // -- Fault injection ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn pump_off_precedes_valve_close_for_every_read_fault() {
        // 1 entry read + 34 buffer reads + 10 pumping reads for a 3s pump
        for n in 0..50 {
            let mut hw = MockBoard::failing(Fault::FloatRead(n));
            let res = run_cycle(&mut hw, &timing(), Duration::from_secs(3)).await;

            if let Some(closed) = position(&hw.events, HwEvent::ValveClosed) {
                let off = position(&hw.events, HwEvent::PumpOff)
                    .unwrap_or_else(|| panic!("fault at read {n}: valve closed without pump off"));
                assert!(off < closed, "fault at read {n}: {:?}", hw.events);
            }
            assert!(!hw.pump_on, "fault at read {n}: pump left on");
            assert!(!hw.valve_open, "fault at read {n}: valve left open");
            if n < 45 {
                assert!(res.is_err(), "fault at read {n} should surface");
            } else {
                assert_eq!(res.unwrap(), CycleOutcome::Completed);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pump_on_fault_still_closes_valve() {
        let mut hw = MockBoard::failing(Fault::PumpOn);
        let res = run_cycle(&mut hw, &timing(), Duration::from_secs(60)).await;
        assert!(res.is_err());
        assert_eq!(
            hw.events,
            vec![HwEvent::ValveOpen, HwEvent::PumpOff, HwEvent::ValveClosed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn valve_open_fault_still_commands_close() {
        let mut hw = MockBoard::failing(Fault::ValveOpen);
        let res = run_cycle(&mut hw, &timing(), Duration::from_secs(60)).await;
        let msg = format!("{:#}", res.unwrap_err());
        assert!(msg.contains("failed to open valve"), "got: {msg}");
        assert_eq!(hw.events, vec![HwEvent::PumpOff, HwEvent::ValveClosed]);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_off_fault_leaves_valve_open() {
        let mut hw = MockBoard::failing(Fault::PumpOff);
        let res = run_cycle(&mut hw, &timing(), Duration::from_secs(5)).await;
        let msg = format!("{:#}", res.unwrap_err());
        assert!(msg.contains("failed to switch pump off"), "got: {msg}");
        assert_eq!(hw.events, vec![HwEvent::ValveOpen, HwEvent::PumpOn]);
        assert!(hw.valve_open);
    }

    #[test]
    fn shutdown_sequence_switches_pump_before_valve() {
        let pump = SHUTDOWN_SEQUENCE
            .iter()
            .position(|s| *s == ShutdownStep::PumpOff)
            .unwrap();
        let drain = SHUTDOWN_SEQUENCE
            .iter()
            .position(|s| *s == ShutdownStep::Drain)
            .unwrap();
        let valve = SHUTDOWN_SEQUENCE
            .iter()
            .position(|s| *s == ShutdownStep::CloseValve)
            .unwrap();
        assert!(pump < drain && drain < valve);
    }
}
