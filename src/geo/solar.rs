//! Sunrise and sunset from the NOAA solar position approximation.
//!
//! Uses the fractional-year series for the equation of time and the solar
//! declination, with the standard -0.833° horizon (refraction plus solar disc).
//! Precision is around a minute, which is plenty for switching a night light.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use std::f64::consts::PI;

const SUNRISE_ANGLE_DEG: f64 = -0.833;
const SOLAR_NOON_HOURS: f64 = 12.0;

/// Sunrise and sunset for one date, expressed in the caller's time zone.
#[derive(Debug, Clone, PartialEq)]
pub struct SunTimes<Tz: TimeZone> {
    pub sunrise: DateTime<Tz>,
    pub sunset: DateTime<Tz>,
}

/// Compute sunrise and sunset for the UTC date containing `at`.
///
/// Polar night yields a zero-length window at UTC midnight. Polar day yields
/// the window 00:00:00 to 23:59:59 UTC.
pub fn calculate_sun_times<Tz: TimeZone>(latitude: f64, longitude: f64, at: &DateTime<Tz>) -> SunTimes<Tz> {
    let tz = at.timezone();
    let utc_date = at.with_timezone(&Utc).date_naive();
    let midnight = utc_date.and_time(NaiveTime::MIN).and_utc();

    let fractional_year = 2.0 * PI / 365.0 * (utc_date.ordinal() as f64 - 1.0);
    let (eq_time, declination) = solar_terms(fractional_year);

    let lat_rad = latitude.to_radians();
    let cos_hour_angle = (SUNRISE_ANGLE_DEG.to_radians().sin()
        - lat_rad.sin() * declination.sin())
        / (lat_rad.cos() * declination.cos());

    if cos_hour_angle > 1.0 {
        return SunTimes {
            sunrise: midnight.with_timezone(&tz),
            sunset: midnight.with_timezone(&tz),
        };
    }
    if cos_hour_angle < -1.0 {
        return SunTimes {
            sunrise: midnight.with_timezone(&tz),
            sunset: (midnight + Duration::seconds(86_399)).with_timezone(&tz),
        };
    }

    let hour_angle = cos_hour_angle.acos().to_degrees();
    let offset = -longitude / 15.0 - eq_time / 60.0;
    let sunrise_hours = SOLAR_NOON_HOURS - hour_angle / 15.0 + offset;
    let sunset_hours = SOLAR_NOON_HOURS + hour_angle / 15.0 + offset;

    SunTimes {
        sunrise: at_utc_hours(midnight, sunrise_hours).with_timezone(&tz),
        sunset: at_utc_hours(midnight, sunset_hours).with_timezone(&tz),
    }
}

/// Equation of time (minutes) and declination (radians).
fn solar_terms(g: f64) -> (f64, f64) {
    let eq_time = 229.18
        * (0.000075 + 0.001868 * g.cos()
            - 0.032077 * g.sin()
            - 0.014615 * (2.0 * g).cos()
            - 0.040849 * (2.0 * g).sin());

    let declination = 0.006918 - 0.399912 * g.cos() + 0.070257 * g.sin()
        - 0.006758 * (2.0 * g).cos()
        + 0.000907 * (2.0 * g).sin()
        - 0.002697 * (3.0 * g).cos()
        + 0.00148 * (3.0 * g).sin();

    (eq_time, declination)
}

/// Hours past UTC midnight, truncated to whole seconds. Values outside
/// `0..24` roll into the neighbouring day.
fn at_utc_hours(midnight: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    midnight + Duration::seconds((hours * 3600.0).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_equator_equinox_has_twelve_hour_day() {
        let times = calculate_sun_times(0.0, 0.0, &utc(2024, 3, 20, 12));
        let day_length = times.sunset - times.sunrise;
        assert!(
            (day_length.num_minutes() - 12 * 60).abs() < 15,
            "day length {day_length}"
        );
        assert_eq!(times.sunrise.hour(), 6);
    }

    #[test]
    fn test_berlin_summer_solstice() {
        let times = calculate_sun_times(52.52, 13.405, &utc(2024, 6, 21, 12));
        // Roughly 02:43 UTC sunrise and 19:33 UTC sunset.
        assert_eq!(times.sunrise.hour(), 2);
        assert_eq!(times.sunset.hour(), 19);
        assert!(times.sunset > times.sunrise);
    }

    #[test]
    fn test_new_york_winter_in_local_offset() {
        let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
        let at = eastern.with_ymd_and_hms(2024, 12, 21, 12, 0, 0).unwrap();
        let times = calculate_sun_times(40.7128, -74.006, &at);
        // About 07:17 and 16:32 local.
        assert_eq!(times.sunrise.hour(), 7);
        assert_eq!(times.sunset.hour(), 16);
        assert_eq!(times.sunrise.offset(), at.offset());
    }

    #[test]
    fn test_polar_night_is_zero_length() {
        let times = calculate_sun_times(80.0, 0.0, &utc(2024, 12, 21, 12));
        assert_eq!(times.sunrise, times.sunset);
        assert_eq!(times.sunrise, utc(2024, 12, 21, 0));
    }

    #[test]
    fn test_polar_day_spans_whole_day() {
        let times = calculate_sun_times(80.0, 0.0, &utc(2024, 6, 21, 12));
        assert_eq!(times.sunrise, utc(2024, 6, 21, 0));
        assert_eq!(
            times.sunset,
            Utc.with_ymd_and_hms(2024, 6, 21, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_far_east_longitude_rolls_sunrise_to_previous_day() {
        // Sunrise at 170°E happens before UTC midnight of the requested date.
        let times = calculate_sun_times(-40.0, 170.0, &utc(2024, 1, 10, 12));
        assert!(times.sunrise < utc(2024, 1, 10, 0));
        assert!(times.sunset > times.sunrise);
    }
}
