//! Target temperature and next wake time for a given instant.
//!
//! Everything here is a pure function of the config, the current time and a
//! location lookup, so the scheduler can be tested with fixed clocks.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};

use crate::config::{GammaConfig, SunSource};
use crate::constants::NO_SCHEDULE_FALLBACK_HOURS;
use crate::geo::{Coordinates, SunTimes, calculate_sun_times};

/// Result of one scheduling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan<Tz: TimeZone> {
    pub target_temp: u32,
    pub next_transition: DateTime<Tz>,
    pub sun_times: Option<SunTimes<Tz>>,
    pub is_day: bool,
}

/// How sunrise/sunset resolved for today.
enum Window<Tz: TimeZone> {
    Manual(SunTimes<Tz>),
    Solar(SunTimes<Tz>, Coordinates),
    LocationFailed,
    Unconfigured,
}

/// Compute the whole schedule for `now`.
///
/// `locate` is only called when the config asks for IP location, and at most once.
pub fn plan<Tz, F>(config: &GammaConfig, now: &DateTime<Tz>, locate: F) -> Plan<Tz>
where
    Tz: TimeZone,
    F: FnOnce() -> Result<Coordinates>,
{
    let window = resolve_window(config, now, locate);

    let sun_times = match &window {
        Window::Manual(times) | Window::Solar(times, _) => Some(times.clone()),
        Window::LocationFailed | Window::Unconfigured => None,
    };

    // Open interval: the sunrise instant itself already targets the day
    // temperature but is not reported as day.
    let is_day = sun_times
        .as_ref()
        .is_some_and(|t| *now > t.sunrise && *now < t.sunset);

    Plan {
        target_temp: target_for(config, now, &window),
        next_transition: next_for(config, now, &window),
        sun_times,
        is_day,
    }
}

#[cfg(test)]
fn target_temperature<Tz, F>(config: &GammaConfig, now: &DateTime<Tz>, locate: F) -> u32
where
    Tz: TimeZone,
    F: FnOnce() -> Result<Coordinates>,
{
    plan(config, now, locate).target_temp
}

fn target_for<Tz: TimeZone>(config: &GammaConfig, now: &DateTime<Tz>, window: &Window<Tz>) -> u32 {
    if !config.enabled {
        return config.high_temp;
    }

    match window {
        Window::Manual(times) | Window::Solar(times, _) => {
            if *now >= times.sunrise && *now < times.sunset {
                config.high_temp
            } else {
                config.low_temp
            }
        }
        Window::LocationFailed => config.high_temp,
        // Nothing configured: stay on the night setting.
        Window::Unconfigured => config.low_temp,
    }
}

fn next_for<Tz: TimeZone>(
    config: &GammaConfig,
    now: &DateTime<Tz>,
    window: &Window<Tz>,
) -> DateTime<Tz> {
    let fallback = now.clone() + Duration::hours(NO_SCHEDULE_FALLBACK_HOURS);
    if !config.enabled {
        return fallback;
    }

    let times = match window {
        Window::Manual(times) | Window::Solar(times, _) => times,
        Window::LocationFailed | Window::Unconfigured => return fallback,
    };

    if *now < times.sunrise {
        return times.sunrise.clone();
    }
    if *now < times.sunset {
        return times.sunset.clone();
    }

    let tomorrow = now.clone() + Duration::hours(24);
    match (window, config.sun_source()) {
        (Window::Manual(_), SunSource::Manual { sunrise, .. }) => {
            local_at(now, tomorrow.date_naive(), sunrise)
        }
        (Window::Solar(_, coords), _) => {
            calculate_sun_times(coords.latitude, coords.longitude, &tomorrow).sunrise
        }
        _ => fallback,
    }
}

fn resolve_window<Tz, F>(config: &GammaConfig, now: &DateTime<Tz>, locate: F) -> Window<Tz>
where
    Tz: TimeZone,
    F: FnOnce() -> Result<Coordinates>,
{
    match config.sun_source() {
        SunSource::Manual { sunrise, sunset } => Window::Manual(manual_times(now, sunrise, sunset)),
        SunSource::IpLocation => match locate() {
            Ok(coords) => solar_window(now, coords),
            Err(e) => {
                log_warning!("IP location unavailable: {e}");
                Window::LocationFailed
            }
        },
        SunSource::Coordinates {
            latitude,
            longitude,
        } => solar_window(
            now,
            Coordinates {
                latitude,
                longitude,
            },
        ),
        SunSource::Unconfigured => Window::Unconfigured,
    }
}

fn solar_window<Tz: TimeZone>(now: &DateTime<Tz>, coords: Coordinates) -> Window<Tz> {
    Window::Solar(
        calculate_sun_times(coords.latitude, coords.longitude, now),
        coords,
    )
}

/// Manual wall-clock times placed on today's date. A sunset earlier than the
/// sunrise belongs to the following day.
fn manual_times<Tz: TimeZone>(now: &DateTime<Tz>, sunrise: NaiveTime, sunset: NaiveTime) -> SunTimes<Tz> {
    let today = now.date_naive();
    let sunrise = local_at(now, today, sunrise);
    let mut sunset = local_at(now, today, sunset);
    if sunset < sunrise {
        sunset = sunset + Duration::hours(24);
    }
    SunTimes { sunrise, sunset }
}

fn local_at<Tz: TimeZone>(now: &DateTime<Tz>, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        // Wall-clock time skipped by a DST jump: interpret it as UTC instead.
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}
