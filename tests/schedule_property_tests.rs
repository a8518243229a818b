use chrono::{Duration, NaiveTime, TimeZone, Utc};
use proptest::prelude::*;

use nightlight::backend::gamma::{RgbFactors, identity_ramp, ramp_for, ramp_with_factors};
use nightlight::config::GammaConfig;
use nightlight::core::schedule::plan;
use nightlight::geo::calculate_sun_times;

fn temperature_strategy() -> impl Strategy<Value = u32> {
    1000u32..=10000
}

fn gamma_strategy() -> impl Strategy<Value = f64> {
    0.1f64..=10.0
}

fn time_of_day_strategy() -> impl Strategy<Value = NaiveTime> {
    (0u32..24, 0u32..60).prop_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

#[cfg(test)]
mod ramp_tests {
    use super::*;

    proptest! {
        #[test]
        fn test_channels_non_decreasing_from_zero(
            size in 2usize..1024,
            temperature in temperature_strategy(),
            gamma in gamma_strategy()
        ) {
            let ramp = ramp_for(size, temperature, gamma);
            prop_assert_eq!(ramp.len(), size);
            for channel in [&ramp.red, &ramp.green, &ramp.blue] {
                prop_assert_eq!(channel[0], 0);
                prop_assert!(channel.windows(2).all(|w| w[0] <= w[1]));
            }
        }

        #[test]
        fn test_identity_ramp_is_linear(size in 2usize..4096) {
            let ramp = identity_ramp(size);
            prop_assert_eq!(ramp.red[0], 0);
            prop_assert_eq!(ramp.red[size - 1], u16::MAX);
            prop_assert_eq!(&ramp.red, &ramp.green);
            prop_assert_eq!(&ramp.green, &ramp.blue);
            prop_assert_eq!(ramp_with_factors(size, RgbFactors::NEUTRAL, 1.0), ramp);
        }

        #[test]
        fn test_packed_size(size in 1usize..512, temperature in temperature_strategy()) {
            prop_assert_eq!(ramp_for(size, temperature, 1.0).to_bytes().len(), size * 6);
        }
    }
}

#[cfg(test)]
mod sun_time_tests {
    use super::*;

    proptest! {
        /// Away from the polar circles the sun always rises before it sets.
        #[test]
        fn test_sunset_after_sunrise_at_mid_latitudes(
            lat in -60.0f64..60.0,
            lon in -180.0f64..=180.0,
            day in 0i64..3650
        ) {
            let at = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap() + Duration::days(day);
            let times = calculate_sun_times(lat, lon, &at);
            prop_assert!(times.sunset > times.sunrise,
                "sunrise {} sunset {} at ({lat}, {lon})", times.sunrise, times.sunset);
            prop_assert!(times.sunset - times.sunrise < Duration::hours(24));
        }
    }
}

#[cfg(test)]
mod schedule_tests {
    use super::*;

    proptest! {
        /// With manual times the target follows the window, and the next
        /// wake-up always lies in the future.
        #[test]
        fn test_manual_window_drives_target(
            sunrise in time_of_day_strategy(),
            sunset in time_of_day_strategy(),
            now in time_of_day_strategy()
        ) {
            prop_assume!(sunrise < sunset);

            let config = GammaConfig {
                low_temp: 3500,
                high_temp: 6500,
                manual_sunrise: Some(sunrise),
                manual_sunset: Some(sunset),
                enabled: true,
                ..Default::default()
            };
            let date = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap().date_naive();
            let now = date.and_time(now).and_utc();

            let result = plan(&config, &now, || unreachable!("manual times need no location"));

            let daytime = now.time() >= sunrise && now.time() < sunset;
            let expected = if daytime { 6500 } else { 3500 };
            prop_assert_eq!(result.target_temp, expected);
            prop_assert!(result.next_transition > now);
        }

        #[test]
        fn test_disabled_always_targets_day(
            now_minutes in 0i64..(24 * 60),
            low in 1000u32..=6500
        ) {
            let config = GammaConfig {
                low_temp: low,
                high_temp: 6500,
                latitude: Some(52.5),
                longitude: Some(13.4),
                enabled: false,
                ..Default::default()
            };
            let now = Utc.with_ymd_and_hms(2024, 12, 21, 0, 0, 0).unwrap()
                + Duration::minutes(now_minutes);
            prop_assert_eq!(plan(&config, &now, || unreachable!()).target_temp, 6500);
        }
    }
}
