//! wlr-gamma-control-unstable-v1 over a live Wayland connection.
//!
//! [`WaylandGamma::connect`] enumerates globals on an already established
//! connection, binds the gamma control manager and every `wl_output`, and then
//! translates compositor events into [`ProtocolEvent`]s for the engine.
//!
//! Each control carries its output id and a generation number as user data, so
//! late events from a destroyed control never reach its replacement.

use anyhow::{Context, Result};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::collections::HashMap;
use std::os::fd::AsFd;

use wayland_client::{
    Connection, Dispatch, EventQueue, Proxy, QueueHandle,
    backend::WaylandError,
    protocol::{wl_output::WlOutput, wl_registry::WlRegistry},
};
use wayland_protocols_wlr::gamma_control::v1::client::{
    zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1,
    zwlr_gamma_control_v1::{Event as GammaControlEvent, ZwlrGammaControlV1},
};

use crate::backend::{GammaProtocol, OutputId, ProtocolEvent, gamma};
use crate::constants::{GAMMA_MANAGER_MAX_VERSION, WL_OUTPUT_MAX_VERSION};

/// User data attached to every gamma control object.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ControlTag {
    output: OutputId,
    generation: u64,
}

struct BoundOutput {
    output: WlOutput,
    registry_name: u32,
}

struct BoundControl {
    control: ZwlrGammaControlV1,
    generation: u64,
}

/// Dispatch state for the event queue.
struct WaylandState {
    gamma_manager: Option<ZwlrGammaControlManagerV1>,
    outputs: HashMap<OutputId, BoundOutput>,
    controls: HashMap<OutputId, BoundControl>,
    next_output_id: OutputId,
    next_generation: u64,
    events: Vec<ProtocolEvent>,
}

impl WaylandState {
    fn new() -> Self {
        Self {
            gamma_manager: None,
            outputs: HashMap::new(),
            controls: HashMap::new(),
            next_output_id: 1,
            next_generation: 1,
            events: Vec::new(),
        }
    }

    fn is_current(&self, tag: &ControlTag) -> bool {
        self.controls
            .get(&tag.output)
            .is_some_and(|c| c.generation == tag.generation)
    }
}

/// [`GammaProtocol`] backed by a Wayland connection.
pub struct WaylandGamma {
    connection: Connection,
    event_queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    state: WaylandState,
}

impl WaylandGamma {
    /// Bind the gamma control manager and all outputs.
    ///
    /// Runs two roundtrips after requesting the registry so compositors that
    /// batch their initial advertisements are fully enumerated. Fails when the
    /// compositor does not offer wlr-gamma-control.
    pub fn connect(connection: &Connection) -> Result<Self> {
        let mut event_queue = connection.new_event_queue();
        let qh = event_queue.handle();
        let mut state = WaylandState::new();

        let _registry = connection.display().get_registry(&qh, ());

        for _ in 0..2 {
            event_queue
                .roundtrip(&mut state)
                .context("Wayland roundtrip failed while enumerating globals")?;
        }

        if state.gamma_manager.is_none() {
            anyhow::bail!(
                "Compositor does not support the wlr-gamma-control-unstable-v1 protocol"
            );
        }

        Ok(Self {
            connection: connection.clone(),
            event_queue,
            qh,
            state,
        })
    }

    fn read_available(&mut self) -> Result<()> {
        let Some(guard) = self.event_queue.prepare_read() else {
            // Events are already queued; dispatch_pending will pick them up.
            return Ok(());
        };

        let readable = {
            let mut fds = [PollFd::new(guard.connection_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::ZERO).context("Failed to poll Wayland socket")? > 0
        };

        if readable {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e).context("Failed to read Wayland events"),
            }
        }
        Ok(())
    }
}

impl GammaProtocol for WaylandGamma {
    fn dispatch(&mut self) -> Result<Vec<ProtocolEvent>> {
        self.event_queue
            .flush()
            .context("Failed to flush Wayland requests")?;
        self.read_available()?;
        self.event_queue
            .dispatch_pending(&mut self.state)
            .context("Failed to dispatch Wayland events")?;
        Ok(std::mem::take(&mut self.state.events))
    }

    fn create_control(&mut self, output: OutputId) -> Result<()> {
        let manager = self
            .state
            .gamma_manager
            .as_ref()
            .context("Gamma control manager is gone")?;
        let bound = self
            .state
            .outputs
            .get(&output)
            .with_context(|| format!("Output {output} is not bound"))?;

        if let Some(old) = self.state.controls.remove(&output) {
            old.control.destroy();
        }

        let generation = self.state.next_generation;
        self.state.next_generation += 1;

        let control = manager.get_gamma_control(
            &bound.output,
            &self.qh,
            ControlTag { output, generation },
        );
        self.state
            .controls
            .insert(output, BoundControl { control, generation });
        Ok(())
    }

    fn destroy_control(&mut self, output: OutputId) {
        if let Some(bound) = self.state.controls.remove(&output) {
            bound.control.destroy();
        }
    }

    fn release_output(&mut self, output: OutputId) {
        self.destroy_control(output);
        if let Some(bound) = self.state.outputs.remove(&output)
            && bound.output.version() >= 3
        {
            bound.output.release();
        }
    }

    fn set_gamma(&mut self, output: OutputId, ramp: &[u8]) -> Result<()> {
        let bound = self
            .state
            .controls
            .get(&output)
            .with_context(|| format!("Output {output} has no gamma control"))?;

        let file = gamma::ramp_file(ramp)?;
        bound.control.set_gamma(file.as_fd());

        // The request must leave the buffer while the file is still open.
        self.connection
            .flush()
            .context("Failed to send gamma table")?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.event_queue
            .roundtrip(&mut self.state)
            .context("Wayland roundtrip failed")?;
        Ok(())
    }

    fn shutdown(&mut self) {
        for (_, bound) in self.state.controls.drain() {
            bound.control.destroy();
        }
        for (_, bound) in self.state.outputs.drain() {
            if bound.output.version() >= 3 {
                bound.output.release();
            }
        }
        if let Some(manager) = self.state.gamma_manager.take() {
            manager.destroy();
        }
        let _ = self.connection.flush();
    }
}

impl Dispatch<WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: <WlRegistry as Proxy>::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_registry::Event;

        match event {
            Event::Global {
                name,
                interface,
                version,
            } => match interface.as_str() {
                "zwlr_gamma_control_manager_v1" if state.gamma_manager.is_none() => {
                    let manager = registry.bind::<ZwlrGammaControlManagerV1, _, _>(
                        name,
                        version.min(GAMMA_MANAGER_MAX_VERSION),
                        qh,
                        (),
                    );
                    state.gamma_manager = Some(manager);
                }
                "wl_output" => {
                    let id = state.next_output_id;
                    state.next_output_id += 1;

                    let output = registry.bind::<WlOutput, _, _>(
                        name,
                        version.min(WL_OUTPUT_MAX_VERSION),
                        qh,
                        id,
                    );
                    state.outputs.insert(
                        id,
                        BoundOutput {
                            output,
                            registry_name: name,
                        },
                    );
                    state.events.push(ProtocolEvent::OutputAdded {
                        id,
                        registry_name: name,
                    });
                }
                _ => {}
            },
            Event::GlobalRemove { name } => {
                if state.outputs.values().any(|o| o.registry_name == name) {
                    state
                        .events
                        .push(ProtocolEvent::OutputRemoved { registry_name: name });
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<ZwlrGammaControlManagerV1, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &ZwlrGammaControlManagerV1,
        _: <ZwlrGammaControlManagerV1 as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // No events for the manager
    }
}

impl Dispatch<ZwlrGammaControlV1, ControlTag> for WaylandState {
    fn event(
        state: &mut Self,
        _: &ZwlrGammaControlV1,
        event: GammaControlEvent,
        tag: &ControlTag,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if !state.is_current(tag) {
            return;
        }

        match event {
            GammaControlEvent::GammaSize { size } => {
                state.events.push(ProtocolEvent::GammaSize {
                    id: tag.output,
                    size,
                });
            }
            GammaControlEvent::Failed => {
                state
                    .events
                    .push(ProtocolEvent::ControlFailed { id: tag.output });
            }
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, OutputId> for WaylandState {
    fn event(
        state: &mut Self,
        _: &WlOutput,
        event: <WlOutput as Proxy>::Event,
        id: &OutputId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_output::Event;

        if let Event::Name { name } = event {
            state
                .events
                .push(ProtocolEvent::OutputNamed { id: *id, name });
        }
    }
}
