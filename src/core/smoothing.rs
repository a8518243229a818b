//! Animated transitions between color temperatures.
//!
//! The worker waits on the engine's single-slot transition mailbox. For each
//! target it interpolates linearly from the last applied temperature, posting
//! one frame to the command actor per step.
//!
//! A transition is superseded, not cancelled: as soon as a newer target shows
//! up in the mailbox (or the shared target moves) the loop stops posting and
//! the next transition starts from whatever frame was applied last.

use std::sync::Arc;
use std::thread;

use crate::core::Shared;
use crate::core::mailbox::Received;

pub(crate) fn run(shared: Arc<Shared>) {
    loop {
        let target = match shared.transitions.recv() {
            Received::Value(target) => target,
            Received::Timeout => continue,
            Received::Closed => break,
        };

        let start = {
            let mut transition = shared.transition();
            if transition.current == target {
                transition.in_flight = false;
                None
            } else {
                transition.in_flight = true;
                Some(transition.current)
            }
        };

        let completed = match start {
            None => true,
            Some(start) => {
                log_debug!("Transitioning {start}K -> {target}K");
                let completed = animate(&shared, start, target);
                shared.transition().in_flight = false;
                completed
            }
        };

        if completed {
            shared.finish_transition(target);
        }
    }
    log_debug!("Transition worker stopped");
}

/// Post every frame from `start` to `target`. Returns false if a newer target
/// or shutdown interrupted the animation.
fn animate(shared: &Shared, start: u32, target: u32) -> bool {
    let steps = shared.timing.transition_steps.max(1);
    let interval = shared.timing.step_interval();

    for step in 1..=steps {
        if superseded(shared, target) {
            return false;
        }

        let temp = interpolate_u32(start, target, step, steps);
        shared.post(move |actor| actor.apply_frame(temp, target));

        if step < steps {
            thread::sleep(interval);
        }
    }
    true
}

fn superseded(shared: &Shared, target: u32) -> bool {
    shared.is_stopping() || shared.transitions.is_pending() || shared.transition().target != target
}

/// Linear interpolation at `step` of `steps`, exact at both ends.
pub(crate) fn interpolate_u32(start: u32, end: u32, step: u32, steps: u32) -> u32 {
    if step >= steps {
        return end;
    }
    let progress = f64::from(step) / f64::from(steps);
    let value = f64::from(start) + (f64::from(end) - f64::from(start)) * progress;
    value.round() as u32
}
