//! JSON-lines control socket.
//!
//! The daemon exposes the engine's operations on a Unix socket so shells and
//! bars can read the state, change settings and follow snapshots live. See
//! [`request`] for the wire format.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;

use crate::GammaEngine;

pub mod client;
pub mod request;
mod server;

pub use server::socket_path;

/// Background thread running the socket server.
pub struct IpcServer {
    socket_path: PathBuf,
    thread_handle: Option<JoinHandle<()>>,
}

impl IpcServer {
    /// Bind the default socket and start serving.
    pub fn start(engine: Arc<GammaEngine>, running: Arc<AtomicBool>) -> Result<Self> {
        Self::start_at(socket_path(), engine, running)
    }

    /// Bind `path` and start serving. Binding errors are returned here; the
    /// thread stops once `running` is cleared.
    pub fn start_at(path: PathBuf, engine: Arc<GammaEngine>, running: Arc<AtomicBool>) -> Result<Self> {
        let server = server::IpcSocketServer::new(path.clone())
            .context("Failed to create IPC socket server")?;

        let thread_handle = std::thread::Builder::new()
            .name("nightlight-ipc".to_string())
            .spawn(move || {
                if let Err(e) = server.run(engine, running) {
                    log_warning!("IPC server stopped: {e:#}");
                }
            })
            .context("Failed to spawn IPC server thread")?;

        Ok(Self {
            socket_path: path,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    /// Wait for the server thread. The running flag must already be cleared.
    pub fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("IPC server thread panicked"))?;
        }
        Ok(())
    }
}
