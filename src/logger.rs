//! Box-drawing logger used by the daemon and the engine workers.
//!
//! Every line is written in one call so output from concurrent workers never
//! interleaves mid-line. Layout conventions:
//!
//! - `log_version!` prints the `┏ nightlight vX.Y.Z ━━╸` header once at startup.
//! - `log_block_start!` opens a new block: an empty `┃` line, then `┣ message`.
//! - `log_decorated!` continues a block with `┣ message`.
//! - `log_indented!` prints nested details as `┃   message`.
//! - `log_pipe!` inserts a lone `┃` for spacing before a level message.
//! - `log_end!` prints the closing `╹`.
//! - `log_info!`, `log_warning!`, `log_error!`, `log_critical!` and `log_debug!`
//!   print `┣[LEVEL] message` with a colored level tag. `log_debug!` is silent
//!   unless debug output was switched on with [`Log::set_debug`].

use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(true);
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static OUTPUT_LOCK: Mutex<()> = Mutex::new(());

/// Global switches for log output.
pub struct Log;

impl Log {
    /// Enable or disable all log output.
    ///
    /// Client commands and tests turn logging off so their own output stays clean.
    pub fn set_enabled(enabled: bool) {
        LOGGING_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled() -> bool {
        LOGGING_ENABLED.load(Ordering::SeqCst)
    }

    /// Enable `log_debug!` output (the daemon's `--debug` flag).
    pub fn set_debug(enabled: bool) {
        DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_debug() -> bool {
        DEBUG_ENABLED.load(Ordering::SeqCst)
    }
}

/// Write an already formatted chunk of log text to stdout.
pub fn write_output(text: &str) {
    let _guard = OUTPUT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_line {
    ($template:literal, $($arg:tt)*) => {{
        if $crate::logger::Log::is_enabled() {
            let message = format!($($arg)*);
            $crate::logger::write_output(&format!($template, message));
        }
    }};
}

/// Log a decorated message, typically as part of an existing block.
#[macro_export]
macro_rules! log_decorated {
    ($($arg:tt)*) => { $crate::__log_line!("┣ {}\n", $($arg)*) };
}

/// Log an indented message for sub-items or details within a block.
#[macro_export]
macro_rules! log_indented {
    ($($arg:tt)*) => { $crate::__log_line!("┃   {}\n", $($arg)*) };
}

/// Log a block start message, initiating a new conceptual block of information.
#[macro_export]
macro_rules! log_block_start {
    ($($arg:tt)*) => { $crate::__log_line!("┃\n┣ {}\n", $($arg)*) };
}

/// Log a visual pipe separator for vertical spacing.
#[macro_export]
macro_rules! log_pipe {
    () => {{
        if $crate::logger::Log::is_enabled() {
            $crate::logger::write_output("┃\n");
        }
    }};
}

/// Log the application version header.
#[macro_export]
macro_rules! log_version {
    () => {{
        if $crate::logger::Log::is_enabled() {
            let version = env!("CARGO_PKG_VERSION");
            $crate::logger::write_output(&format!("┏ nightlight v{version} ━━╸\n"));
        }
    }};
}

/// Log the final termination marker.
#[macro_export]
macro_rules! log_end {
    () => {{
        if $crate::logger::Log::is_enabled() {
            $crate::logger::write_output("╹\n");
        }
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__log_line!("┣[\x1b[32mINFO\x1b[0m] {}\n", $($arg)*) };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => { $crate::__log_line!("┣[\x1b[33mWARNING\x1b[0m] {}\n", $($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__log_line!("┣[\x1b[31mERROR\x1b[0m] {}\n", $($arg)*) };
}

/// Log an error that ends the current flow, closing the block with `┗`.
#[macro_export]
macro_rules! log_error_exit {
    ($($arg:tt)*) => { $crate::__log_line!("┃\n┗[\x1b[31mERROR\x1b[0m] {}\n", $($arg)*) };
}

#[macro_export]
macro_rules! log_critical {
    ($($arg:tt)*) => { $crate::__log_line!("┣[\x1b[31mCRITICAL\x1b[0m] {}\n", $($arg)*) };
}

/// Log a debug message. Only printed when [`Log::is_debug`] is true.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if $crate::logger::Log::is_debug() {
            $crate::__log_line!("┣[\x1b[32mDEBUG\x1b[0m] {}\n", $($arg)*)
        }
    }};
}
