//! Process-level I/O: system event monitors, signals and the instance lock.

pub mod dbus;
pub mod lock;
pub mod signals;

use nix::unistd::getuid;
use std::path::PathBuf;

/// `$XDG_RUNTIME_DIR`, or `/run/user/<uid>` when it is unset.
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(format!("/run/user/{}", getuid())),
    }
}
