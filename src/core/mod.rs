//! The night-light engine.
//!
//! [`GammaEngine`] wires five workers around one [`Shared`] block:
//!
//! - the command actor ([`actor`]), sole owner of the gamma protocol
//! - the scheduler ([`update_loop`]), which picks the target temperature
//! - the transition worker ([`smoothing`]), which animates toward it
//! - the notifier ([`crate::state::notifier`]), which fans snapshots out
//! - optionally the suspend/resume and clock monitors ([`crate::io::dbus`])
//!
//! Locks in [`Shared`] are held only long enough to copy data in or out and
//! never across a protocol or network call. When two are needed the order is
//! snapshot before transition.

pub mod mailbox;
pub mod outputs;
pub mod schedule;

pub(crate) mod actor;
pub(crate) mod smoothing;
pub(crate) mod update_loop;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};

use crate::backend::GammaProtocol;
use crate::config::{EngineTiming, GammaConfig};
use crate::geo::{LocationCache, LocationProvider};
use crate::state::GammaSnapshot;
use crate::state::notifier::{self, SubscriberRegistry, Subscription};

use actor::{Actor, ActorMessage};
use mailbox::Mailbox;
use outputs::OutputTable;

/// The animation's view of the displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TransitionState {
    /// Last temperature actually uploaded.
    pub current: u32,
    /// Temperature the engine is heading toward.
    pub target: u32,
    pub in_flight: bool,
}

/// State shared by every worker.
pub(crate) struct Shared {
    config: RwLock<GammaConfig>,
    snapshot: RwLock<Arc<GammaSnapshot>>,
    outputs: Mutex<OutputTable>,
    transition: Mutex<TransitionState>,
    location: LocationCache,
    pub(crate) timing: EngineTiming,
    commands: SyncSender<ActorMessage>,
    pub(crate) trigger: Mailbox<()>,
    pub(crate) transitions: Mailbox<u32>,
    pub(crate) dirty: Mailbox<()>,
    pub(crate) subscribers: Arc<SubscriberRegistry>,
    stopping: AtomicBool,
}

impl Shared {
    pub(crate) fn config(&self) -> RwLockReadGuard<'_, GammaConfig> {
        self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn outputs(&self) -> MutexGuard<'_, OutputTable> {
        self.outputs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn transition(&self) -> MutexGuard<'_, TransitionState> {
        self.transition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn snapshot(&self) -> Arc<GammaSnapshot> {
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&snapshot)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Queue a job for the command actor. Dropped with a warning when the
    /// queue is full; the next scheduler pass supersedes it anyway.
    pub(crate) fn post(&self, job: impl FnOnce(&mut Actor) + Send + 'static) {
        match self.commands.try_send(ActorMessage::Run(Box::new(job))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log_warning!("Command queue full, dropping gamma update");
            }
            Err(TrySendError::Disconnected(_)) => {
                log_debug!("Command actor gone, dropping gamma update");
            }
        }
    }

    pub(crate) fn request_recompute(&self) {
        self.trigger.put(());
    }

    /// Validate a mutated copy of the config and commit it atomically.
    fn commit_config(&self, mutate: impl FnOnce(&mut GammaConfig)) -> Result<GammaConfig> {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut candidate = config.clone();
        mutate(&mut candidate);
        candidate.validate()?;
        *config = candidate.clone();
        Ok(candidate)
    }

    /// Record an uploaded temperature in both the animation state and the
    /// published snapshot.
    pub(crate) fn set_current_temp(&self, temp: u32) {
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.transition().current = temp;
        if snapshot.current_temp != temp {
            let mut next = GammaSnapshot::clone(&snapshot);
            next.current_temp = temp;
            *snapshot = Arc::new(next);
            self.dirty.put(());
        }
    }

    /// Publish a freshly computed snapshot. `current_temp` is taken from the
    /// animation state, not from `next`.
    pub(crate) fn replace_snapshot(&self, mut next: GammaSnapshot) {
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        next.current_temp = self.transition().current;
        *snapshot = Arc::new(next);
        self.dirty.put(());
    }

    /// Head toward `target`, animating when every control is ready.
    ///
    /// Until then only the target is recorded; the actor applies it as soon
    /// as an output reports its gamma size.
    pub(crate) fn start_transition(&self, target: u32) {
        let ready = {
            let outputs = self.outputs();
            outputs.controls_initialized() && outputs.all_ready()
        };

        let mut transition = self.transition();
        if !ready {
            transition.target = target;
            return;
        }
        if transition.in_flight && transition.target == target {
            return;
        }
        if !transition.in_flight && transition.current == target {
            transition.target = target;
            drop(transition);
            self.post(|actor| actor.reapply_gamma());
            return;
        }
        transition.target = target;
        drop(transition);

        self.transitions.put(target);
    }

    /// While disabled, head for the day temperature `high` and release the
    /// controls once there. A fade already running toward an older day
    /// temperature is retargeted.
    pub(crate) fn settle_disabled(&self, high: u32) {
        let all_ready = {
            let outputs = self.outputs();
            if !outputs.controls_initialized() {
                return;
            }
            outputs.all_ready()
        };
        let settled = {
            let transition = self.transition();
            transition.current == high && !transition.in_flight
        };
        if settled || !all_ready {
            self.post(|actor| actor.teardown());
        } else {
            self.start_transition(high);
        }
    }

    /// Called when the displays have settled at `target`. Releases the
    /// controls once a disable has finished fading out.
    pub(crate) fn finish_transition(&self, target: u32) {
        {
            let config = self.config();
            if config.enabled || target != config.high_temp {
                return;
            }
        }
        if !self.outputs().controls_initialized() {
            return;
        }
        self.post(|actor| actor.teardown());
    }
}

/// Runs the night light against a gamma protocol.
///
/// Setters validate synchronously and return; their effect on the displays
/// happens on the engine's workers.
pub struct GammaEngine {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    actor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl GammaEngine {
    /// Start the engine on an already connected protocol.
    ///
    /// Fails when the config is invalid or no physical output is present.
    pub fn new(
        protocol: Box<dyn GammaProtocol>,
        config: GammaConfig,
        location: Box<dyn LocationProvider>,
        timing: EngineTiming,
    ) -> Result<Self> {
        config
            .validate()
            .context("Refusing to start with an invalid configuration")?;

        let (commands, inbox) = mpsc::sync_channel(timing.actor_queue_capacity);
        let high = config.high_temp;

        let shared = Arc::new(Shared {
            snapshot: RwLock::new(Arc::new(GammaSnapshot::initial(config.clone(), high))),
            config: RwLock::new(config),
            outputs: Mutex::new(OutputTable::new()),
            transition: Mutex::new(TransitionState {
                current: high,
                target: high,
                in_flight: false,
            }),
            location: LocationCache::new(location),
            timing,
            commands,
            trigger: Mailbox::new(),
            transitions: Mailbox::new(),
            dirty: Mailbox::new(),
            subscribers: Arc::new(SubscriberRegistry::new()),
            stopping: AtomicBool::new(false),
        });

        let mut actor = Actor::new(protocol, Arc::clone(&shared));
        actor.pump_events();

        let (physical, total) = {
            let outputs = shared.outputs();
            (outputs.physical_count(), outputs.len())
        };
        if physical == 0 {
            actor.abort();
            anyhow::bail!("No physical outputs available for gamma control ({total} virtual)");
        }
        log_decorated!("Found {physical} output(s) with gamma control support");

        let actor = spawn("nightlight-actor", move || actor.run(inbox))?;
        let roles: [(&str, fn(Arc<Shared>)); 3] = [
            ("nightlight-scheduler", update_loop::run),
            ("nightlight-transition", smoothing::run),
            ("nightlight-notifier", notifier::run),
        ];
        let mut workers = Vec::new();
        for (name, worker) in roles {
            let shared = Arc::clone(&shared);
            workers.push(spawn(name, move || worker(shared))?);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            actor: Mutex::new(Some(actor)),
            closed: AtomicBool::new(false),
        })
    }

    /// The latest published snapshot.
    pub fn get_state(&self) -> Arc<GammaSnapshot> {
        self.shared.snapshot()
    }

    pub fn config(&self) -> GammaConfig {
        self.shared.config().clone()
    }

    /// Register for snapshot broadcasts. Returns the current snapshot and the
    /// stream of later ones.
    pub fn subscribe(&self) -> (Arc<GammaSnapshot>, Subscription) {
        let subscription = self.shared.subscribers.subscribe();
        (self.shared.snapshot(), subscription)
    }

    pub fn set_temperature(&self, low: u32, high: u32) -> Result<()> {
        self.shared.commit_config(|c| {
            c.low_temp = low;
            c.high_temp = high;
        })?;
        self.shared.request_recompute();
        Ok(())
    }

    /// Use explicit coordinates. Turns IP location off.
    pub fn set_location(&self, latitude: f64, longitude: f64) -> Result<()> {
        self.shared.commit_config(|c| {
            c.latitude = Some(latitude);
            c.longitude = Some(longitude);
            c.use_ip_location = false;
        })?;
        self.shared.request_recompute();
        Ok(())
    }

    pub fn set_manual_times(&self, sunrise: NaiveTime, sunset: NaiveTime) -> Result<()> {
        self.shared.commit_config(|c| {
            c.manual_sunrise = Some(sunrise);
            c.manual_sunset = Some(sunset);
        })?;
        self.shared.request_recompute();
        Ok(())
    }

    pub fn clear_manual_times(&self) -> Result<()> {
        self.shared.commit_config(|c| {
            c.manual_sunrise = None;
            c.manual_sunset = None;
        })?;
        self.shared.request_recompute();
        Ok(())
    }

    /// Enabling IP location drops explicit coordinates and forces a fresh lookup.
    pub fn set_use_ip_location(&self, use_ip: bool) -> Result<()> {
        self.shared.commit_config(|c| {
            c.use_ip_location = use_ip;
            if use_ip {
                c.latitude = None;
                c.longitude = None;
            }
        })?;
        if use_ip {
            self.shared.location.invalidate();
        }
        self.shared.request_recompute();
        Ok(())
    }

    pub fn set_gamma(&self, gamma: f64) -> Result<()> {
        self.shared.commit_config(|c| c.gamma = gamma)?;
        self.shared.request_recompute();
        Ok(())
    }

    /// Switch the night light on or off.
    ///
    /// Disabling fades to the day temperature and then releases every gamma
    /// control. When the displays already sit there, or some control never
    /// became ready, the controls are released right away.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let config = self.shared.commit_config(|c| c.enabled = enabled)?;

        if enabled {
            if !self.shared.outputs().controls_initialized() {
                self.shared.post(|actor| actor.init_controls());
            }
        } else {
            self.shared.settle_disabled(config.high_temp);
        }

        self.shared.request_recompute();
        Ok(())
    }

    /// Force an immediate recomputation, as after resume from suspend.
    pub fn refresh(&self) {
        self.shared.request_recompute();
    }

    /// Recompute after every resume from suspend and every system clock step.
    ///
    /// The monitors hold only a weak reference and wind down once the engine
    /// is dropped.
    pub fn watch_system_events(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.shared);
        crate::io::dbus::start_sleep_monitor(move || match weak.upgrade() {
            Some(shared) if !shared.is_stopping() => {
                shared.request_recompute();
                true
            }
            _ => false,
        })
    }

    /// Stop every worker, then release the protocol. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.trigger.close();
        self.shared.transitions.close();
        self.shared.dirty.close();

        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for worker in workers {
            if worker.join().is_err() {
                log_error!("An engine worker panicked during shutdown");
            }
        }

        // Blocking send: the actor is still draining, so this cannot deadlock.
        let _ = self.shared.commands.send(ActorMessage::Stop);
        let actor = self
            .actor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(actor) = actor
            && actor.join().is_err()
        {
            log_error!("Command actor panicked during shutdown");
        }

        self.shared.subscribers.close_all();
    }
}

impl Drop for GammaEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn(name: &str, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("Failed to spawn {name} thread"))
}
