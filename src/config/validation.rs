//! Whole-config validation.
//!
//! Setters build a candidate config and run it through [`validate_config`]
//! before it replaces the live one, so a rejected change leaves nothing behind.

use anyhow::Result;

use super::GammaConfig;
use crate::constants::*;

pub fn validate_config(config: &GammaConfig) -> Result<()> {
    validate_temperature("low_temp", config.low_temp)?;
    validate_temperature("high_temp", config.high_temp)?;

    if config.low_temp > config.high_temp {
        anyhow::bail!(
            "low_temp ({}) must not exceed high_temp ({})",
            config.low_temp,
            config.high_temp
        );
    }

    if !config.gamma.is_finite()
        || config.gamma <= MINIMUM_GAMMA_EXCLUSIVE
        || config.gamma > MAXIMUM_GAMMA
    {
        anyhow::bail!(
            "gamma ({}) must be greater than {} and at most {}",
            config.gamma,
            MINIMUM_GAMMA_EXCLUSIVE,
            MAXIMUM_GAMMA
        );
    }

    if let Some(lat) = config.latitude
        && !(-90.0..=90.0).contains(&lat)
    {
        anyhow::bail!("latitude must be between -90 and 90 degrees (got {})", lat);
    }

    if let Some(lon) = config.longitude
        && !(-180.0..=180.0).contains(&lon)
    {
        anyhow::bail!(
            "longitude must be between -180 and 180 degrees (got {})",
            lon
        );
    }

    if config.latitude.is_some() != config.longitude.is_some() {
        anyhow::bail!("latitude and longitude must be set together");
    }

    if config.manual_sunrise.is_some() != config.manual_sunset.is_some() {
        anyhow::bail!("manual sunrise and sunset must be set together");
    }

    Ok(())
}

fn validate_temperature(field: &str, value: u32) -> Result<()> {
    if !(MINIMUM_TEMP..=MAXIMUM_TEMP).contains(&value) {
        anyhow::bail!(
            "{} ({}) must be between {} and {} Kelvin",
            field,
            value,
            MINIMUM_TEMP,
            MAXIMUM_TEMP
        );
    }
    Ok(())
}
