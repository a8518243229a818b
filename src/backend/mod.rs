//! Protocol seam between the engine and the compositor.
//!
//! The engine never touches Wayland objects directly. It drives a
//! [`GammaProtocol`] implementation that lives on the command actor thread and
//! reports what the compositor said as [`ProtocolEvent`]s.
//!
//! - [`wayland`]: wlr-gamma-control-unstable-v1 over a live Wayland connection
//! - [`gamma`]: ramp generation and LUT buffer packing

use anyhow::Result;

pub mod gamma;
pub mod wayland;

/// Engine-assigned identifier of a bound output. Never reused within a process.
pub type OutputId = u32;

/// Something the compositor told us, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A new output global was bound.
    OutputAdded { id: OutputId, registry_name: u32 },
    /// The output reported its connector name.
    OutputNamed { id: OutputId, name: String },
    /// The output global went away. Keyed by registry name.
    OutputRemoved { registry_name: u32 },
    /// The current control for `id` is usable with tables of `size` entries.
    GammaSize { id: OutputId, size: u32 },
    /// The compositor invalidated the current control for `id`.
    ControlFailed { id: OutputId },
}

/// Operations the engine needs from a gamma-control protocol.
///
/// Implementations are only ever used from the command actor thread; `Send`
/// lets the actor take ownership at startup.
pub trait GammaProtocol: Send {
    /// Read whatever the compositor has sent and return the decoded events.
    /// Must not block.
    fn dispatch(&mut self) -> Result<Vec<ProtocolEvent>>;

    /// Request a gamma control for the output. Its size arrives later as
    /// [`ProtocolEvent::GammaSize`].
    fn create_control(&mut self, output: OutputId) -> Result<()>;

    /// Destroy the output's control if it has one. Idempotent.
    fn destroy_control(&mut self, output: OutputId);

    /// Drop the output binding after its global was removed.
    fn release_output(&mut self, output: OutputId);

    /// Upload a packed ramp (see [`gamma::GammaRamp::to_bytes`]).
    fn set_gamma(&mut self, output: OutputId, ramp: &[u8]) -> Result<()>;

    /// Wait until the compositor has processed every request sent so far.
    fn sync(&mut self) -> Result<()>;

    /// Destroy every protocol object. Called once, after all workers stopped.
    fn shutdown(&mut self);
}
