//! Shutdown signal handling.
//!
//! SIGINT, SIGTERM and SIGHUP all request a cooperative shutdown: the
//! handler thread clears the shared running flag (which the IPC server polls)
//! and wakes whoever is blocked in [`ShutdownSignal::wait`].

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM},
    iterator::Signals,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;

pub struct ShutdownSignal {
    /// True until a shutdown signal arrives.
    pub running: Arc<AtomicBool>,
    receiver: Receiver<i32>,
}

impl ShutdownSignal {
    /// Block until a shutdown signal arrives. Returns the signal number.
    pub fn wait(&self) -> Option<i32> {
        self.receiver.recv().ok()
    }
}

pub fn setup_signal_handler() -> Result<ShutdownSignal> {
    let running = Arc::new(AtomicBool::new(true));
    let (sender, receiver) = mpsc::channel();

    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("failed to register signal handlers")?;

    let running_flag = Arc::clone(&running);
    thread::Builder::new()
        .name("nightlight-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                log_debug!("Received signal {signal}");
                running_flag.store(false, Ordering::SeqCst);
                if sender.send(signal).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn signal handler thread")?;

    Ok(ShutdownSignal { running, receiver })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sighup_requests_shutdown() {
        let shutdown = setup_signal_handler().unwrap();
        assert!(shutdown.running.load(Ordering::SeqCst));

        signal_hook::low_level::raise(SIGHUP).unwrap();
        assert_eq!(shutdown.wait(), Some(SIGHUP));
        assert!(!shutdown.running.load(Ordering::SeqCst));
    }
}
