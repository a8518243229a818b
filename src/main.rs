//! Main application entry point and high-level flow coordination.
//!
//! `nightlight` with no command runs the daemon:
//! 1. Argument parsing and early exit for help/version
//! 2. Instance lock, so two daemons never fight over the gamma tables
//! 3. Configuration loading and Wayland connection
//! 4. Engine startup, system event monitors and the control socket
//! 5. Waiting for SIGINT/SIGTERM/SIGHUP
//! 6. Graceful shutdown, which hands the displays back to the compositor
//!
//! The `get`, `watch` and `set` commands are thin clients of the daemon's
//! control socket.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use nightlight::args::{self, CliAction, ParsedArgs, SetField};
use nightlight::backend::wayland::WaylandGamma;
use nightlight::config::{self, EngineTiming};
use nightlight::constants::{EXIT_FAILURE, EXIT_SUCCESS};
use nightlight::geo::IpApiLocator;
use nightlight::io::lock::InstanceLock;
use nightlight::io::signals::setup_signal_handler;
use nightlight::logger::Log;
use nightlight::state::GammaSnapshot;
use nightlight::state::ipc::IpcServer;
use nightlight::state::ipc::client::IpcClient;
use nightlight::{
    GammaEngine, log_block_start, log_debug, log_decorated, log_end, log_error_exit,
    log_indented, log_pipe, log_version, log_warning,
};

fn main() {
    let parsed_args = ParsedArgs::from_env();

    let result = match parsed_args.action {
        CliAction::ShowVersion => {
            args::display_version_info();
            Ok(())
        }
        CliAction::ShowHelp => {
            args::display_help();
            Ok(())
        }
        CliAction::ShowHelpDueToError => {
            args::display_help();
            std::process::exit(EXIT_FAILURE);
        }
        CliAction::Run {
            debug_enabled,
            config_path,
        } => run_daemon(debug_enabled, config_path.map(PathBuf::from)),
        CliAction::Get { json } => run_get(json),
        CliAction::Watch { json } => run_watch(json),
        CliAction::Set(field) => run_set(&field),
    };

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(e) => {
            Log::set_enabled(true);
            log_error_exit!("{e:#}");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

fn run_daemon(debug_enabled: bool, config_path: Option<PathBuf>) -> Result<()> {
    log_version!();
    Log::set_debug(debug_enabled);
    if debug_enabled {
        log_pipe!();
        log_debug!("Debug mode enabled - showing detailed engine operations");
    }

    let lock = InstanceLock::acquire(&InstanceLock::default_path())?;
    log_block_start!("Lock acquired, starting nightlight...");

    let config = config::load(config_path.as_deref())?;
    log_decorated!(
        "Temperatures: {}K night, {}K day, gamma {}",
        config.low_temp,
        config.high_temp,
        config.gamma
    );

    let connection = wayland_client::Connection::connect_to_env()
        .context("Failed to connect to Wayland display. Is WAYLAND_DISPLAY set?")?;
    let protocol = WaylandGamma::connect(&connection)?;

    let engine = Arc::new(GammaEngine::new(
        Box::new(protocol),
        config,
        Box::new(IpApiLocator::new()),
        EngineTiming::default(),
    )?);

    if let Err(e) = engine.watch_system_events() {
        log_warning!("Suspend and clock change detection unavailable: {e:#}");
    }

    let shutdown = setup_signal_handler()?;
    let server = IpcServer::start(Arc::clone(&engine), Arc::clone(&shutdown.running))?;
    log_decorated!("Control socket at {}", server.socket_path().display());

    if let Some(signal) = shutdown.wait() {
        log_block_start!("Received signal {signal}, shutting down...");
    }
    shutdown.running.store(false, Ordering::SeqCst);

    if let Err(e) = server.shutdown() {
        log_warning!("{e:#}");
    }
    engine.close();
    drop(lock);

    log_decorated!("Displays restored");
    log_end!();
    Ok(())
}

fn run_get(json: bool) -> Result<()> {
    Log::set_enabled(false);
    let snapshot = IpcClient::connect()?.get_state()?;
    print_snapshot(&snapshot, json)
}

fn run_watch(json: bool) -> Result<()> {
    Log::set_enabled(false);
    let client = IpcClient::connect()?;
    let mut failure = None;
    client.watch(|snapshot| match print_snapshot(&snapshot, json) {
        Ok(()) => true,
        Err(e) => {
            failure = Some(e);
            false
        }
    })?;
    failure.map_or(Ok(()), Err)
}

fn run_set(field: &SetField) -> Result<()> {
    Log::set_enabled(false);
    let (method, params) = field.to_request();
    let result = IpcClient::connect()?.call(method, params)?;
    let message = result
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("done");
    println!("{message}");
    Ok(())
}

fn print_snapshot(snapshot: &GammaSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    Log::set_enabled(true);
    log_block_start!(
        "{} at {}K ({})",
        if snapshot.config.enabled { "Enabled" } else { "Disabled" },
        snapshot.current_temp,
        if snapshot.is_day { "day" } else { "night" }
    );
    if let (Some(sunrise), Some(sunset)) = (snapshot.sunrise_time, snapshot.sunset_time) {
        log_indented!("Sunrise {}", sunrise.format("%H:%M"));
        log_indented!("Sunset  {}", sunset.format("%H:%M"));
    }
    if let Some(next) = snapshot.next_transition {
        log_indented!("Next transition {}", next.format("%Y-%m-%d %H:%M:%S"));
    }
    Log::set_enabled(false);
    Ok(())
}
