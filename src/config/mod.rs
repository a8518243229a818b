//! Night-light configuration: user intent plus engine timing.
//!
//! [`GammaConfig`] is what callers mutate through the engine setters and what the
//! daemon reads at startup from `nightlight.toml`:
//!
//! ```toml
//! low_temp = 4000          # Night temperature (1000-10000) Kelvin
//! high_temp = 6500         # Day temperature (1000-10000) Kelvin, >= low_temp
//! gamma = 1.0              # Gamma exponent (0 < gamma <= 10)
//! enabled = true
//!
//! # Pick at most one sunrise/sunset source. Priority: manual times, IP, coordinates.
//! manual_sunrise = "06:30"
//! manual_sunset = "18:30"
//! use_ip_location = false
//! latitude = 52.52
//! longitude = 13.40
//! ```
//!
//! On the IPC wire the same structure is serialized in camelCase.

pub mod loading;
pub mod validation;

use anyhow::Result;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::*;

pub use loading::{default_config_path, load, load_from_path};
pub use validation::validate_config;

/// User-controlled night-light settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GammaConfig {
    #[serde(alias = "low_temp")]
    pub low_temp: u32,
    #[serde(alias = "high_temp")]
    pub high_temp: u32,
    pub gamma: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(rename = "useIPLocation", alias = "use_ip_location")]
    pub use_ip_location: bool,
    #[serde(alias = "manual_sunrise", with = "time_of_day")]
    pub manual_sunrise: Option<NaiveTime>,
    #[serde(alias = "manual_sunset", with = "time_of_day")]
    pub manual_sunset: Option<NaiveTime>,
    pub enabled: bool,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            low_temp: DEFAULT_LOW_TEMP,
            high_temp: DEFAULT_HIGH_TEMP,
            gamma: DEFAULT_GAMMA,
            latitude: None,
            longitude: None,
            use_ip_location: false,
            manual_sunrise: None,
            manual_sunset: None,
            enabled: false,
        }
    }
}

/// Where sunrise and sunset come from, resolved in priority order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SunSource {
    Manual { sunrise: NaiveTime, sunset: NaiveTime },
    IpLocation,
    Coordinates { latitude: f64, longitude: f64 },
    Unconfigured,
}

impl GammaConfig {
    pub fn validate(&self) -> Result<()> {
        validate_config(self)
    }

    pub fn sun_source(&self) -> SunSource {
        if let (Some(sunrise), Some(sunset)) = (self.manual_sunrise, self.manual_sunset) {
            return SunSource::Manual { sunrise, sunset };
        }
        if self.use_ip_location {
            return SunSource::IpLocation;
        }
        if let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) {
            return SunSource::Coordinates {
                latitude,
                longitude,
            };
        }
        SunSource::Unconfigured
    }
}

/// Durations and limits that drive the engine's workers.
///
/// Production code uses [`EngineTiming::default`]; tests shrink the durations so
/// whole transitions complete in a few milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTiming {
    pub transition_duration: Duration,
    pub transition_steps: u32,
    pub trigger_debounce: Duration,
    pub notify_debounce: Duration,
    pub retry_base: Duration,
    pub max_backoff_doublings: u32,
    pub max_retries: u32,
    pub actor_queue_capacity: usize,
    pub dispatch_interval: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            transition_duration: DEFAULT_TRANSITION_DURATION,
            transition_steps: DEFAULT_TRANSITION_STEPS,
            trigger_debounce: DEFAULT_TRIGGER_DEBOUNCE,
            notify_debounce: DEFAULT_NOTIFY_DEBOUNCE,
            retry_base: DEFAULT_RETRY_BASE,
            max_backoff_doublings: DEFAULT_MAX_BACKOFF_DOUBLINGS,
            max_retries: DEFAULT_MAX_RETRIES,
            actor_queue_capacity: DEFAULT_ACTOR_QUEUE_CAPACITY,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
        }
    }
}

impl EngineTiming {
    /// Sleep between two animation frames.
    pub fn step_interval(&self) -> Duration {
        self.transition_duration / self.transition_steps.max(1)
    }

    /// Delay before the next recreation attempt after `retry_count` failures.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let doublings = retry_count
            .saturating_sub(1)
            .min(self.max_backoff_doublings);
        self.retry_base * (1u32 << doublings)
    }
}

/// Parse a wall-clock time given as `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| anyhow::anyhow!("invalid time '{value}' (use HH:MM)"))
}

/// Serde adapter storing optional times of day as `"HH:MM"` strings.
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_str(&time.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => super::parse_time_of_day(text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
