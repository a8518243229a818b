//! The command actor: sole owner of the gamma protocol.
//!
//! Every request that touches a protocol object runs here, one job at a time,
//! in the order it was posted. Other workers only ever hold an `Arc<Shared>`
//! and post closures through [`Shared::post`]; they never see the protocol.
//!
//! Between jobs the actor pumps compositor events and fires any per-output
//! retries whose backoff has elapsed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use crate::backend::{GammaProtocol, OutputId, ProtocolEvent, gamma};
use crate::core::Shared;
use crate::core::outputs::RetryDecision;

pub(crate) type Job = Box<dyn FnOnce(&mut Actor) + Send>;

pub(crate) enum ActorMessage {
    Run(Job),
    Stop,
}

pub(crate) struct Actor {
    protocol: Box<dyn GammaProtocol>,
    shared: Arc<Shared>,
    dispatch_failed: bool,
    /// Gamma exponent of the last successful apply.
    applied_gamma: Option<f64>,
}

impl Actor {
    pub(crate) fn new(protocol: Box<dyn GammaProtocol>, shared: Arc<Shared>) -> Self {
        Self {
            protocol,
            shared,
            dispatch_failed: false,
            applied_gamma: None,
        }
    }

    /// Drain the command queue until [`ActorMessage::Stop`], then destroy every
    /// protocol object.
    pub(crate) fn run(mut self, inbox: Receiver<ActorMessage>) {
        loop {
            match inbox.recv_timeout(self.next_wake()) {
                Ok(ActorMessage::Run(job)) => job(&mut self),
                Ok(ActorMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.pump_events();
            self.run_due_retries();
        }

        log_debug!("Command actor stopping, releasing gamma controls");
        self.protocol.shutdown();
    }

    /// Release the protocol without running the loop. Used when startup fails.
    pub(crate) fn abort(mut self) {
        self.protocol.shutdown();
    }

    fn next_wake(&self) -> std::time::Duration {
        let interval = self.shared.timing.dispatch_interval;
        match self.shared.outputs().next_retry_at() {
            Some(at) => at.saturating_duration_since(Instant::now()).min(interval),
            None => interval,
        }
    }

    /// Read compositor events and fold them into the output table.
    pub(crate) fn pump_events(&mut self) {
        match self.protocol.dispatch() {
            Ok(events) => {
                self.dispatch_failed = false;
                if !events.is_empty() {
                    self.handle_events(events);
                }
            }
            Err(e) => {
                if !self.dispatch_failed {
                    log_error!("Failed to dispatch compositor events: {e:#}");
                    self.dispatch_failed = true;
                }
            }
        }
    }

    fn handle_events(&mut self, events: Vec<ProtocolEvent>) {
        let mut added = Vec::new();
        let mut sized = false;
        let mut failed = false;

        for event in events {
            match event {
                ProtocolEvent::OutputAdded { id, registry_name } => {
                    self.shared.outputs().add(id, registry_name);
                    added.push(id);
                }
                ProtocolEvent::OutputNamed { id, name } => {
                    log_debug!("Output {id} is {name}");
                    let is_virtual = name.starts_with(crate::constants::VIRTUAL_OUTPUT_PREFIX);
                    let drop_control = self.shared.outputs().set_name(id, name);
                    if drop_control {
                        self.protocol.destroy_control(id);
                    }
                    if is_virtual {
                        log_debug!("Ignoring virtual output {id}");
                    }
                }
                ProtocolEvent::OutputRemoved { registry_name } => {
                    let removed = self.shared.outputs().remove_by_registry(registry_name);
                    if let Some(record) = removed {
                        self.protocol.release_output(record.id);
                        log_decorated!("Output {} disconnected", display_name(&record.name, record.id));
                    }
                }
                ProtocolEvent::GammaSize { id, size } => {
                    if self.shared.outputs().mark_ready(id, size) {
                        log_debug!("Output {id} accepts gamma tables of {size} entries");
                        sized = true;
                    }
                }
                ProtocolEvent::ControlFailed { id } => {
                    self.fail_output(id);
                    failed = true;
                }
            }
        }

        if !added.is_empty() && self.shared.config().enabled {
            let physical: Vec<OutputId> = {
                let outputs = self.shared.outputs();
                added
                    .into_iter()
                    .filter(|id| outputs.get(*id).is_some_and(|r| !r.is_virtual && !r.has_control()))
                    .collect()
            };
            if !physical.is_empty() {
                for id in physical {
                    self.create_control(id);
                }
                self.shared.outputs().set_controls_initialized(true);
            }
        }

        if sized {
            let temp = {
                let transition = self.shared.transition();
                if transition.in_flight {
                    transition.current
                } else {
                    transition.target
                }
            };
            self.apply_now(temp);
        } else if failed {
            self.resume_pending_target();
        }
    }

    /// Start the transition that was only recorded while some control was
    /// still waiting for its size, now that a failure released it.
    fn resume_pending_target(&self) {
        let pending = {
            let transition = self.shared.transition();
            (!transition.in_flight && transition.current != transition.target)
                .then_some(transition.target)
        };
        if let Some(target) = pending {
            self.shared.start_transition(target);
        }
    }

    fn create_control(&mut self, id: OutputId) {
        match self.protocol.create_control(id) {
            Ok(()) => self.shared.outputs().mark_awaiting(id),
            Err(e) => {
                log_debug!("Could not create gamma control for output {id}: {e:#}");
                self.fail_output(id);
            }
        }
    }

    /// Destroy the output's control and schedule its recreation.
    fn fail_output(&mut self, id: OutputId) {
        self.protocol.destroy_control(id);

        let (failure, name) = {
            let mut outputs = self.shared.outputs();
            let failure = outputs.mark_failed(id, Instant::now(), &self.shared.timing);
            let name = outputs.get(id).map(|r| r.name.clone()).unwrap_or_default();
            (failure, name)
        };

        if let Some(failure) = failure
            && failure.should_log
        {
            log_warning!(
                "Gamma control for output {} failed (attempt {}), retrying in {:?}",
                display_name(&name, id),
                failure.retry_count,
                self.shared.timing.backoff(failure.retry_count)
            );
        }
    }

    fn run_due_retries(&mut self) {
        let due = self.shared.outputs().due_retries(Instant::now());
        if due.is_empty() {
            return;
        }

        let enabled = self.shared.config().enabled;
        let max_retries = self.shared.timing.max_retries;

        for id in due {
            let decision = self.shared.outputs().retry_decision(id, enabled, max_retries);
            match decision {
                RetryDecision::Recreate => self.create_control(id),
                RetryDecision::Abandon => {
                    let mut outputs = self.shared.outputs();
                    if let Some(record) = outputs.get(id)
                        && record.retry_count >= max_retries
                    {
                        log_warning!(
                            "Giving up on output {} after {} failures",
                            display_name(&record.name, id),
                            record.retry_count
                        );
                    }
                    outputs.abandon(id);
                }
                RetryDecision::Skip => {}
            }
        }
    }

    /// Create a control for every physical output that lacks one.
    pub(crate) fn init_controls(&mut self) {
        if !self.shared.config().enabled {
            return;
        }

        let missing = {
            let mut outputs = self.shared.outputs();
            let missing = outputs.without_control();
            for id in &missing {
                outputs.reset_retry_count(*id);
            }
            missing
        };

        for id in &missing {
            self.create_control(*id);
        }

        let mut outputs = self.shared.outputs();
        if outputs.physical_count() > 0 {
            outputs.set_controls_initialized(true);
        }
    }

    /// Upload `temp` to every ready output.
    ///
    /// Buffers are built for all outputs before the first upload so the
    /// displays change within the same tick.
    pub(crate) fn apply_now(&mut self, temp: u32) {
        let ready = {
            let outputs = self.shared.outputs();
            if !outputs.controls_initialized() {
                return;
            }
            outputs.ready_outputs()
        };
        if ready.is_empty() {
            return;
        }

        let gamma_value = self.shared.config().gamma;
        let mut buffers: HashMap<u32, Vec<u8>> = HashMap::new();
        for &(_, size) in &ready {
            buffers
                .entry(size)
                .or_insert_with(|| gamma::ramp_for(size as usize, temp, gamma_value).to_bytes());
        }

        let mut failed = Vec::new();
        for (id, size) in &ready {
            let Some(buffer) = buffers.get(size) else {
                continue;
            };
            if let Err(e) = self.protocol.set_gamma(*id, buffer) {
                log_debug!("Gamma upload to output {id} failed: {e:#}");
                failed.push(*id);
            }
        }
        for id in failed {
            self.fail_output(id);
        }

        self.applied_gamma = Some(gamma_value);
        self.shared.set_current_temp(temp);
    }

    /// Re-upload the settled temperature when only the gamma exponent changed.
    pub(crate) fn reapply_gamma(&mut self) {
        let gamma_value = self.shared.config().gamma;
        if self.applied_gamma.is_none_or(|applied| applied == gamma_value) {
            return;
        }
        let transition = *self.shared.transition();
        if !transition.in_flight {
            self.apply_now(transition.current);
        }
    }

    /// Apply one animation frame unless a newer target has replaced `target`.
    pub(crate) fn apply_frame(&mut self, temp: u32, target: u32) {
        if self.shared.transition().target != target {
            return;
        }
        self.apply_now(temp);
    }

    /// Destroy every control and settle at the day temperature.
    ///
    /// Skipped when the feature was re-enabled after the teardown was posted.
    pub(crate) fn teardown(&mut self) {
        if self.shared.config().enabled {
            return;
        }

        let ids = self.shared.outputs().with_control();
        for id in &ids {
            self.protocol.destroy_control(*id);
        }
        self.shared.outputs().reset_controls();

        let high = self.shared.config().high_temp;
        {
            let mut transition = self.shared.transition();
            transition.target = high;
        }
        self.shared.set_current_temp(high);

        if let Err(e) = self.protocol.sync() {
            log_warning!("Display sync after releasing gamma controls failed: {e:#}");
        }
        log_debug!("Released {} gamma control(s)", ids.len());
    }
}

fn display_name(name: &str, id: OutputId) -> String {
    if name.is_empty() {
        format!("#{id}")
    } else {
        name.to_string()
    }
}
