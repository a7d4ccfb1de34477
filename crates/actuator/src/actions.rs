//! Named actions a client may request, and the table that resolves them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::hardware::Hardware;
use crate::watering::{self, Timing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Water,
}

/// Named parameters for [`Action::Water`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WaterArgs {
    /// Whole seconds of pump time.
    duration: u64,
}

impl Action {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Water => "water",
        }
    }

    /// Run the action. `Ok(false)` is a normal unsuccessful outcome (e.g. the
    /// float switch aborted the cycle); `Err` is a fault.
    pub(crate) async fn invoke<H: Hardware>(
        self,
        args: Map<String, Value>,
        hw: &mut H,
        timing: &Timing,
    ) -> Result<bool> {
        match self {
            Self::Water => {
                let args: WaterArgs = serde_json::from_value(Value::Object(args))
                    .context("invalid arguments for water")?;
                if args.duration == 0 {
                    bail!("duration must be positive");
                }
                let outcome =
                    watering::run_cycle(hw, timing, Duration::from_secs(args.duration)).await?;
                Ok(outcome.succeeded())
            }
        }
    }
}

/// Immutable name → action map, built once at startup and shared by
/// reference with the server.
#[derive(Debug)]
pub(crate) struct ActionTable {
    entries: Vec<Action>,
}

impl ActionTable {
    pub(crate) fn new(entries: Vec<Action>) -> Self {
        Self { entries }
    }

    /// Every action this device supports.
    pub(crate) fn standard() -> Self {
        Self::new(vec![Action::Water])
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Action> {
        self.entries.iter().copied().find(|a| a.name() == name)
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|a| a.name()).collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{HwEvent, MockBoard};
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            other => panic!("not an object: {other}"),
        }
    }

    // -- ActionTable --------------------------------------------------------

    #[test]
    fn standard_table_knows_water_only() {
        let table = ActionTable::standard();
        assert_eq!(table.lookup("water"), Some(Action::Water));
        assert_eq!(table.lookup("wash"), None);
        assert_eq!(table.lookup("WATER"), None);
        assert_eq!(table.names(), vec!["water"]);
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let table = ActionTable::new(vec![]);
        assert_eq!(table.lookup("water"), None);
    }

    // -- Action::Water ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn water_runs_a_cycle() {
        let mut hw = MockBoard::new();
        let ok = Action::Water
            .invoke(args(json!({"duration": 2})), &mut hw, &Timing::default())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(hw.events.first(), Some(&HwEvent::ValveOpen));
        assert_eq!(hw.events.last(), Some(&HwEvent::ValveClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn water_reports_float_abort_as_false() {
        let mut hw = MockBoard::low_from(0);
        let ok = Action::Water
            .invoke(args(json!({"duration": 2})), &mut hw, &Timing::default())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test(start_paused = true)]
    async fn water_rejects_bad_arguments() {
        for bad in [
            json!({}),
            json!({"duration": 1.5}),
            json!({"duration": -3}),
            json!({"duration": "60"}),
            json!({"duration": 60, "zone": 2}),
            json!({"duration": 0}),
        ] {
            let mut hw = MockBoard::new();
            let res = Action::Water
                .invoke(args(bad.clone()), &mut hw, &Timing::default())
                .await;
            assert!(res.is_err(), "expected fault for {bad}");
            assert!(hw.events.is_empty(), "hardware touched for {bad}");
        }
    }
}
