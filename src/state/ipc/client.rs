//! Client side of the control socket, used by `nightlight get|watch|set`.

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use super::request::{Request, Response};
use super::server::socket_path;
use crate::state::GammaSnapshot;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct IpcClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: u64,
}

impl IpcClient {
    /// Connect to the running daemon's socket.
    pub fn connect() -> Result<Self> {
        let path = socket_path();
        Self::connect_to(&path)
            .with_context(|| format!("Is nightlight running? (socket {})", path.display()))
    }

    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .with_context(|| format!("Failed to connect to IPC socket at {path:?}"))?;
        stream
            .set_read_timeout(Some(REPLY_TIMEOUT))
            .context("Failed to set read timeout on IPC socket")?;
        let reader = BufReader::new(
            stream
                .try_clone()
                .context("Failed to clone stream for reader")?,
        );
        Ok(Self {
            writer: stream,
            reader,
            next_id: 1,
        })
    }

    /// Send one request and wait for its result. Server-side errors become
    /// `Err` with the server's message.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.send(method, params)?;
        self.read_result()?
            .ok_or_else(|| anyhow::anyhow!("Connection closed by daemon"))
    }

    pub fn get_state(&mut self) -> Result<GammaSnapshot> {
        let state = self.call("gamma.getState", Value::Null)?;
        serde_json::from_value(state).context("Malformed state from daemon")
    }

    /// Subscribe and hand every snapshot (starting with the current one) to
    /// `on_snapshot` until it returns false or the daemon closes the stream.
    pub fn watch(mut self, mut on_snapshot: impl FnMut(GammaSnapshot) -> bool) -> Result<()> {
        self.writer
            .set_read_timeout(None)
            .context("Failed to clear read timeout")?;
        self.send("gamma.subscribe", Value::Null)?;

        while let Some(result) = self.read_result()? {
            let snapshot: GammaSnapshot =
                serde_json::from_value(result).context("Malformed state from daemon")?;
            if !on_snapshot(snapshot) {
                break;
            }
        }
        Ok(())
    }

    fn send(&mut self, method: &str, params: Value) -> Result<()> {
        let request = Request::new(self.next_id, method, params);
        self.next_id += 1;

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .context("Failed to send IPC request")?;
        self.writer.flush().context("Failed to send IPC request")
    }

    /// Next result line, or `None` once the daemon closed the connection.
    fn read_result(&mut self) -> Result<Option<Value>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .context("Failed to read IPC response")?;
        if read == 0 {
            return Ok(None);
        }

        let response: Response = serde_json::from_str(line.trim())
            .with_context(|| format!("Malformed IPC response: {}", line.trim()))?;
        if let Some(error) = response.error {
            anyhow::bail!(error);
        }
        Ok(Some(response.result.unwrap_or(Value::Null)))
    }
}
