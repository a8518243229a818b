//! Defaults, validation limits and engine timing constants.

use std::time::Duration;

// # Color temperature

pub const DEFAULT_LOW_TEMP: u32 = 4000;
pub const DEFAULT_HIGH_TEMP: u32 = 6500;
pub const MINIMUM_TEMP: u32 = 1000;
pub const MAXIMUM_TEMP: u32 = 10000;

// # Gamma exponent

pub const DEFAULT_GAMMA: f64 = 1.0;
/// Exclusive lower bound: a gamma of exactly zero is rejected.
pub const MINIMUM_GAMMA_EXCLUSIVE: f64 = 0.0;
pub const MAXIMUM_GAMMA: f64 = 10.0;

// # Transition engine

pub const DEFAULT_TRANSITION_DURATION: Duration = Duration::from_secs(1);
pub const DEFAULT_TRANSITION_STEPS: u32 = 30;

// # Scheduler

/// Window that coalesces bursts of recompute triggers.
pub const DEFAULT_TRIGGER_DEBOUNCE: Duration = Duration::from_millis(50);
/// Wake delay used when the computed next transition is already in the past.
pub const PAST_TRANSITION_RETRY: Duration = Duration::from_secs(1);
/// How far ahead the scheduler sleeps when no sunrise/sunset source resolves.
pub const NO_SCHEDULE_FALLBACK_HOURS: i64 = 24;

// # Per-output retry

pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_BACKOFF_DOUBLINGS: u32 = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Failures are logged on the first occurrence and then every Nth.
pub const FAILURE_LOG_INTERVAL: u32 = 5;

// # Actor

pub const DEFAULT_ACTOR_QUEUE_CAPACITY: usize = 128;
/// How often the actor dispatches pending protocol events while idle.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(50);

// # Notifier and subscribers

pub const DEFAULT_NOTIFY_DEBOUNCE: Duration = Duration::from_millis(100);
pub const SUBSCRIBER_BUFFER: usize = 64;

// # Wayland

/// Output names starting with this prefix belong to headless/virtual outputs.
pub const VIRTUAL_OUTPUT_PREFIX: &str = "HEADLESS-";
pub const GAMMA_MANAGER_MAX_VERSION: u32 = 1;
pub const WL_OUTPUT_MAX_VERSION: u32 = 4;

// # Geolocation

pub const IP_LOCATION_URL: &str = "http://ip-api.com/json/";
pub const IP_LOCATION_TIMEOUT: Duration = Duration::from_secs(10);

// # D-Bus sleep monitor

pub const DBUS_MAX_RESTARTS: u32 = 3;
pub const DBUS_RESTART_DELAY: Duration = Duration::from_secs(2);

// # IPC

pub const SOCKET_FILE_NAME: &str = "nightlight.sock";
pub const LOCK_FILE_NAME: &str = "nightlight.lock";
pub const IPC_ACCEPT_POLL: Duration = Duration::from_millis(10);

// # Exit codes

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
