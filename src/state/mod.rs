//! Published engine state.
//!
//! A [`GammaSnapshot`] is never edited in place: every change builds a new one
//! and swaps it in, so a reader holding an `Arc<GammaSnapshot>` always sees a
//! consistent picture.
//!
//! - [`notifier`]: debounced fan-out of snapshots to subscribers
//! - [`ipc`]: JSON-lines control socket built on the engine API

pub mod ipc;
pub mod notifier;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::GammaConfig;
use crate::core::schedule::Plan;

/// What the engine is doing right now.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaSnapshot {
    pub config: GammaConfig,
    pub current_temp: u32,
    pub next_transition: Option<DateTime<Local>>,
    pub sunrise_time: Option<DateTime<Local>>,
    pub sunset_time: Option<DateTime<Local>>,
    pub is_day: bool,
}

impl GammaSnapshot {
    /// Snapshot published before the first scheduling pass.
    pub fn initial(config: GammaConfig, current_temp: u32) -> Self {
        Self {
            config,
            current_temp,
            ..Default::default()
        }
    }

    /// Snapshot for a scheduling pass. `current_temp` is left at zero for the
    /// caller to fill in from the applied temperature.
    pub fn from_plan(config: GammaConfig, plan: &Plan<Local>) -> Self {
        let (sunrise_time, sunset_time) = match &plan.sun_times {
            Some(times) => (Some(times.sunrise), Some(times.sunset)),
            None => (None, None),
        };
        Self {
            config,
            current_temp: 0,
            next_transition: Some(plan.next_transition),
            sunrise_time,
            sunset_time,
            is_day: plan.is_day,
        }
    }
}

/// Whether `new` differs from `old` in a way subscribers care about.
///
/// Only the applied temperature, the day flag, the schedule instants and the
/// master switch count; other config edits ride along with the next
/// meaningful change.
pub fn state_changed(old: Option<&GammaSnapshot>, new: &GammaSnapshot) -> bool {
    let Some(old) = old else {
        return true;
    };
    old.current_temp != new.current_temp
        || old.is_day != new.is_day
        || old.next_transition != new.next_transition
        || old.sunrise_time != new.sunrise_time
        || old.sunset_time != new.sunset_time
        || old.config.enabled != new.config.enabled
}
