//! # nightlight
//!
//! Night-light engine for wlroots compositors. It schedules a warm color
//! temperature between sunset and sunrise and applies it to every physical
//! output through the wlr-gamma-control protocol.
//!
//! The library exists so the daemon binary, its client commands and the
//! integration tests share one implementation.
//!
//! ## Architecture
//!
//! - **Engine**: [`GammaEngine`] owns the workers: a command actor that is the
//!   only code touching protocol objects, a scheduler, a smoothing animator
//!   and a snapshot notifier
//! - **Backends**: `backend` defines the [`backend::GammaProtocol`] seam and its
//!   Wayland implementation
//! - **Configuration**: `config` for the TOML settings and engine timing
//! - **Geographic**: `geo` for sunrise/sunset math and IP geolocation
//! - **State**: `state` for published snapshots, subscribers and the control socket
//! - **Infrastructure**: `io` for signals, the instance lock and D-Bus monitoring

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod logger;

pub mod args;
pub mod backend;
pub mod config;
pub mod constants;
pub mod core;
pub mod geo;
pub mod io;
pub mod state;

#[cfg(any(test, feature = "testing-support"))]
pub mod testing;

pub use core::GammaEngine;
