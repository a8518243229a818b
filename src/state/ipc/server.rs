//! Unix socket server for the control protocol.
//!
//! The listener is non-blocking and polled from one thread that also watches
//! the shared running flag. Every accepted client gets its own thread, which
//! reads requests line by line and writes one response per request; a
//! `gamma.subscribe` request turns the connection into a snapshot stream until
//! either side goes away.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::GammaEngine;
use crate::constants::{IPC_ACCEPT_POLL, SOCKET_FILE_NAME};
use crate::state::ipc::request::{self, Reply, Request, Response};

/// How often blocked client threads look at the running flag.
const CLIENT_POLL: Duration = Duration::from_millis(200);

pub struct IpcSocketServer {
    socket_path: PathBuf,
    listener: UnixListener,
    clients: Vec<JoinHandle<()>>,
    next_client_id: u32,
}

impl IpcSocketServer {
    /// Bind the socket, replacing a stale one left by a previous run.
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove existing socket: {socket_path:?}"))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {socket_path:?}"))?;
        listener
            .set_nonblocking(true)
            .context("Failed to set socket to non-blocking mode")?;

        Ok(Self {
            socket_path,
            listener,
            clients: Vec::new(),
            next_client_id: 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until `running` is cleared, then wait for client threads and
    /// remove the socket.
    pub fn run(mut self, engine: Arc<GammaEngine>, running: Arc<AtomicBool>) -> Result<()> {
        log_debug!("IPC server listening on {:?}", self.socket_path);

        while running.load(Ordering::SeqCst) {
            self.accept(&engine, &running);
            self.clients.retain(|client| !client.is_finished());
            thread::sleep(IPC_ACCEPT_POLL);
        }

        log_debug!("IPC server shutting down");
        for client in self.clients.drain(..) {
            let _ = client.join();
        }
        self.cleanup()
    }

    fn accept(&mut self, engine: &Arc<GammaEngine>, running: &Arc<AtomicBool>) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let client_id = self.next_client_id;
                    self.next_client_id += 1;

                    let engine = Arc::clone(engine);
                    let running = Arc::clone(running);
                    let spawned = thread::Builder::new()
                        .name(format!("nightlight-ipc-{client_id}"))
                        .spawn(move || {
                            if let Err(e) = serve_client(stream, &engine, &running) {
                                log_debug!("IPC client {client_id} dropped: {e:#}");
                            }
                        });
                    match spawned {
                        Ok(handle) => self.clients.push(handle),
                        Err(e) => log_warning!("Could not serve IPC client: {e}"),
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log_debug!("Error accepting IPC connection: {e}");
                    break;
                }
            }
        }
    }

    fn cleanup(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket file: {:?}", self.socket_path))?;
        }
        Ok(())
    }
}

fn serve_client(stream: UnixStream, engine: &GammaEngine, running: &AtomicBool) -> Result<()> {
    stream
        .set_nonblocking(false)
        .context("Failed to make client stream blocking")?;
    stream
        .set_read_timeout(Some(CLIENT_POLL))
        .context("Failed to set client read timeout")?;

    let mut reader = BufReader::new(stream.try_clone().context("Failed to clone client stream")?);
    let mut writer = stream;
    let mut line = String::new();

    while running.load(Ordering::SeqCst) {
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let keep_open = handle_line(line.trim(), &mut writer, engine, running)?;
                line.clear();
                if !keep_open {
                    break;
                }
            }
            // A partial line stays in `line` until the rest arrives.
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(e).context("Failed to read IPC request"),
        }
    }
    Ok(())
}

/// Answer one request line. Returns false when the connection is done.
fn handle_line(
    line: &str,
    writer: &mut UnixStream,
    engine: &GammaEngine,
    running: &AtomicBool,
) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }

    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            write_line(writer, &Response::error(None, format!("invalid request: {e}")))?;
            return Ok(true);
        }
    };

    match request::dispatch(engine, &request) {
        Ok(Reply::Result(result)) => write_line(writer, &Response::result(request.id, result))?,
        Ok(Reply::Subscribe) => {
            stream_snapshots(writer, engine, request.id, running)?;
            return Ok(false);
        }
        Err(e) => write_line(writer, &Response::error(request.id, format!("{e:#}")))?,
    }
    Ok(true)
}

fn stream_snapshots(
    writer: &mut UnixStream,
    engine: &GammaEngine,
    id: Option<u64>,
    running: &AtomicBool,
) -> Result<()> {
    let (initial, subscription) = engine.subscribe();
    write_line(writer, &Response::result(id, serde_json::to_value(&*initial)?))?;

    while running.load(Ordering::SeqCst) {
        match subscription.recv_timeout(CLIENT_POLL) {
            Ok(snapshot) => {
                write_line(writer, &Response::result(None, serde_json::to_value(&*snapshot)?))?
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn write_line(writer: &mut UnixStream, response: &Response) -> Result<()> {
    let mut json = serde_json::to_string(response).context("Failed to serialize IPC response")?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .context("Failed to write IPC response")?;
    writer.flush().context("Failed to flush IPC response")
}

/// Socket path: `$XDG_RUNTIME_DIR/nightlight.sock`, falling back to
/// `/run/user/{uid}/nightlight.sock`.
pub fn socket_path() -> PathBuf {
    crate::io::runtime_dir().join(SOCKET_FILE_NAME)
}
