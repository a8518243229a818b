//! The scheduler loop.
//!
//! Each pass computes the target temperature and the next sunrise/sunset
//! boundary, hands the target to the transition worker and publishes a new
//! snapshot. The loop then sleeps until that boundary or until a trigger
//! arrives. Triggers are debounced: every further trigger inside the window
//! restarts it.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::PAST_TRANSITION_RETRY;
use crate::core::Shared;
use crate::core::mailbox::Received;
use crate::core::schedule;
use crate::state::GammaSnapshot;

pub(crate) fn run(shared: Arc<Shared>) {
    loop {
        let next = recompute(&shared);

        match shared.trigger.recv_timeout(wait_until(next)) {
            Received::Value(()) => {
                if !debounce(&shared) {
                    break;
                }
            }
            Received::Timeout => {}
            Received::Closed => break,
        }
    }
    log_debug!("Scheduler stopped");
}

/// Returns false when the engine is shutting down.
fn debounce(shared: &Shared) -> bool {
    loop {
        match shared.trigger.recv_timeout(shared.timing.trigger_debounce) {
            Received::Value(()) => continue,
            Received::Timeout => return true,
            Received::Closed => return false,
        }
    }
}

fn wait_until(next: DateTime<Local>) -> Duration {
    match (next - Local::now()).to_std() {
        Ok(wait) if !wait.is_zero() => wait,
        _ => PAST_TRANSITION_RETRY,
    }
}

/// One scheduling pass. Returns when the next pass is due.
pub(crate) fn recompute(shared: &Shared) -> DateTime<Local> {
    let config = shared.config().clone();
    let now = Local::now();
    let plan = schedule::plan(&config, &now, || shared.location.get());

    if config.enabled {
        shared.start_transition(plan.target_temp);
    } else {
        shared.settle_disabled(config.high_temp);
    }

    log_debug!(
        "Target {}K, next transition at {}",
        plan.target_temp,
        plan.next_transition.format("%Y-%m-%d %H:%M:%S")
    );

    shared.replace_snapshot(GammaSnapshot::from_plan(config, &plan));
    plan.next_transition
}
