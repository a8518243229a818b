//! In-memory gamma protocol and location source for tests.
//!
//! [`FakeProtocol`] behaves like a compositor that answers every control
//! request with a gamma size on the next dispatch. The paired [`FakeHandle`]
//! lets a test plug and unplug outputs, make controls fail, and inspect every
//! uploaded table.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{GammaProtocol, OutputId, ProtocolEvent, gamma};
use crate::geo::{Coordinates, LocationProvider};

/// Table size reported for every fake output.
pub const FAKE_RAMP_SIZE: u32 = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub output: OutputId,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct FakeOutput {
    registry_name: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    outputs: BTreeMap<OutputId, FakeOutput>,
    controls: BTreeSet<OutputId>,
    pending: Vec<ProtocolEvent>,
    uploads: Vec<Upload>,
    creations: HashMap<OutputId, u32>,
    failing_controls: HashMap<OutputId, u32>,
    failing_uploads: BTreeSet<OutputId>,
    withhold_sizes: bool,
    withheld: Vec<OutputId>,
    syncs: u32,
    shut_down: bool,
    next_id: OutputId,
}

impl FakeState {
    fn add_output(&mut self, name: &str) -> OutputId {
        self.next_id += 1;
        let id = self.next_id;
        let registry_name = 100 + id;
        self.outputs.insert(id, FakeOutput { registry_name });
        self.pending.push(ProtocolEvent::OutputAdded { id, registry_name });
        self.pending.push(ProtocolEvent::OutputNamed {
            id,
            name: name.to_string(),
        });
        id
    }
}

/// Test-side view of a [`FakeProtocol`].
#[derive(Clone, Default)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plug in an output. It shows up on the engine's next dispatch.
    pub fn add_output(&self, name: &str) -> OutputId {
        self.lock().add_output(name)
    }

    /// Unplug an output.
    pub fn remove_output(&self, id: OutputId) {
        let mut state = self.lock();
        if let Some(output) = state.outputs.get(&id) {
            let registry_name = output.registry_name;
            state
                .pending
                .push(ProtocolEvent::OutputRemoved { registry_name });
        }
    }

    /// Report the output's current control as failed.
    pub fn fail_control(&self, id: OutputId) {
        let mut state = self.lock();
        if state.controls.contains(&id) {
            state.pending.push(ProtocolEvent::ControlFailed { id });
        }
    }

    /// The next `count` controls created for `id` fail instead of reporting a size.
    pub fn fail_next_controls(&self, id: OutputId, count: u32) {
        self.lock().failing_controls.insert(id, count);
    }

    /// Make uploads to `id` fail until cleared.
    pub fn set_upload_failure(&self, id: OutputId, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_uploads.insert(id);
        } else {
            state.failing_uploads.remove(&id);
        }
    }

    /// Hold back gamma size events, as a slow compositor would.
    pub fn withhold_sizes(&self, withhold: bool) {
        let mut state = self.lock();
        state.withhold_sizes = withhold;
        if !withhold {
            let released: Vec<OutputId> = std::mem::take(&mut state.withheld);
            for id in released {
                if state.controls.contains(&id) {
                    state.pending.push(ProtocolEvent::GammaSize {
                        id,
                        size: FAKE_RAMP_SIZE,
                    });
                }
            }
        }
    }

    pub fn live_controls(&self) -> Vec<OutputId> {
        self.lock().controls.iter().copied().collect()
    }

    pub fn control_creations(&self, id: OutputId) -> u32 {
        self.lock().creations.get(&id).copied().unwrap_or(0)
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.lock().uploads.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.lock().uploads.len()
    }

    pub fn last_upload(&self, id: OutputId) -> Option<Vec<u8>> {
        self.lock()
            .uploads
            .iter()
            .rev()
            .find(|u| u.output == id)
            .map(|u| u.bytes.clone())
    }

    pub fn syncs(&self) -> u32 {
        self.lock().syncs
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

/// Scriptable [`GammaProtocol`].
pub struct FakeProtocol {
    handle: FakeHandle,
}

impl FakeProtocol {
    pub fn new() -> (Self, FakeHandle) {
        let handle = FakeHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// A protocol whose outputs are already advertised, in order.
    pub fn with_outputs(names: &[&str]) -> (Self, FakeHandle) {
        let (protocol, handle) = Self::new();
        for name in names {
            handle.add_output(name);
        }
        (protocol, handle)
    }
}

impl GammaProtocol for FakeProtocol {
    fn dispatch(&mut self) -> Result<Vec<ProtocolEvent>> {
        let mut state = self.handle.lock();
        let events = std::mem::take(&mut state.pending);
        Ok(events
            .into_iter()
            .filter(|event| match event {
                ProtocolEvent::GammaSize { id, .. } | ProtocolEvent::ControlFailed { id } => {
                    state.controls.contains(id)
                }
                _ => true,
            })
            .collect())
    }

    fn create_control(&mut self, output: OutputId) -> Result<()> {
        let mut state = self.handle.lock();
        if !state.outputs.contains_key(&output) {
            anyhow::bail!("Output {output} is not bound");
        }
        state.controls.insert(output);
        *state.creations.entry(output).or_default() += 1;

        let failing = state.failing_controls.get(&output).copied().unwrap_or(0);
        if failing > 0 {
            state.failing_controls.insert(output, failing - 1);
            state.pending.push(ProtocolEvent::ControlFailed { id: output });
        } else if state.withhold_sizes {
            state.withheld.push(output);
        } else {
            state.pending.push(ProtocolEvent::GammaSize {
                id: output,
                size: FAKE_RAMP_SIZE,
            });
        }
        Ok(())
    }

    fn destroy_control(&mut self, output: OutputId) {
        self.handle.lock().controls.remove(&output);
    }

    fn release_output(&mut self, output: OutputId) {
        let mut state = self.handle.lock();
        state.controls.remove(&output);
        state.outputs.remove(&output);
    }

    fn set_gamma(&mut self, output: OutputId, ramp: &[u8]) -> Result<()> {
        let mut state = self.handle.lock();
        if !state.controls.contains(&output) {
            anyhow::bail!("Output {output} has no gamma control");
        }
        if state.failing_uploads.contains(&output) {
            anyhow::bail!("Injected upload failure on output {output}");
        }
        state.uploads.push(Upload {
            output,
            bytes: ramp.to_vec(),
        });
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.handle.lock().syncs += 1;
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.handle.lock();
        state.controls.clear();
        state.shut_down = true;
    }
}

/// Packed table the engine uploads for `temperature` on a fake output.
pub fn ramp_bytes(temperature: u32, gamma_value: f64) -> Vec<u8> {
    gamma::ramp_for(FAKE_RAMP_SIZE as usize, temperature, gamma_value).to_bytes()
}

/// Location source with a fixed answer.
pub struct StaticLocation(Option<Coordinates>);

impl StaticLocation {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self(Some(Coordinates {
            latitude,
            longitude,
        }))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }
}

impl LocationProvider for StaticLocation {
    fn locate(&self) -> Result<Coordinates> {
        self.0
            .ok_or_else(|| anyhow::anyhow!("location unavailable"))
    }
}
