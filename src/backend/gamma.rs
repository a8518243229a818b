//! Gamma ramp generation and LUT buffer packing.
//!
//! A ramp is three equal-length 16-bit tables (red, green, blue). The compositor
//! receives them through an anonymous file descriptor holding the three tables
//! back to back, each entry a little-endian `u16`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::FromRawFd;

/// Normalized channel multipliers in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgbFactors {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl RgbFactors {
    /// No tint.
    pub const NEUTRAL: Self = Self {
        red: 1.0,
        green: 1.0,
        blue: 1.0,
    };
}

/// Three channel lookup tables of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaRamp {
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

impl GammaRamp {
    pub fn len(&self) -> usize {
        self.red.len()
    }

    pub fn is_empty(&self) -> bool {
        self.red.is_empty()
    }

    /// Pack the ramp into the wire layout: red, green, blue, little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.len() * 6);
        for channel in [&self.red, &self.green, &self.blue] {
            for value in channel {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
        data
    }
}

/// Convert a color temperature to channel multipliers.
///
/// Piecewise blackbody-locus fit working on hundreds of Kelvin: red saturates
/// below 6600 K, green switches from a logarithmic to a power curve at the same
/// point, and blue is zero below 1900 K and saturated from 6600 K up.
pub fn temperature_to_rgb(temperature: u32) -> RgbFactors {
    let temp_k = temperature as f64 / 100.0;

    let red = if temp_k <= 66.0 {
        255.0
    } else {
        329.698727446 * (temp_k - 60.0).powf(-0.1332047592)
    };

    let green = if temp_k <= 66.0 {
        99.4708025861 * temp_k.ln() - 161.1195681661
    } else {
        288.1221695283 * (temp_k - 60.0).powf(-0.0755148492)
    };

    let blue = if temp_k >= 66.0 {
        255.0
    } else if temp_k <= 19.0 {
        0.0
    } else {
        138.5177312231 * (temp_k - 10.0).ln() - 305.0447927307
    };

    RgbFactors {
        red: red.clamp(0.0, 255.0) / 255.0,
        green: green.clamp(0.0, 255.0) / 255.0,
        blue: blue.clamp(0.0, 255.0) / 255.0,
    }
}

/// Build the ramp for `temperature` with inverse-gamma correction applied.
pub fn ramp_for(size: usize, temperature: u32, gamma: f64) -> GammaRamp {
    ramp_with_factors(size, temperature_to_rgb(temperature), gamma)
}

/// Linear passthrough ramp, 0 to 65535.
pub fn identity_ramp(size: usize) -> GammaRamp {
    ramp_with_factors(size, RgbFactors::NEUTRAL, 1.0)
}

pub fn ramp_with_factors(size: usize, factors: RgbFactors, gamma: f64) -> GammaRamp {
    let mut ramp = GammaRamp {
        red: Vec::with_capacity(size),
        green: Vec::with_capacity(size),
        blue: Vec::with_capacity(size),
    };

    let denominator = size.saturating_sub(1).max(1) as f64;
    for i in 0..size {
        let base = (i as f64 / denominator).powf(1.0 / gamma);
        ramp.red.push(scale(base, factors.red));
        ramp.green.push(scale(base, factors.green));
        ramp.blue.push(scale(base, factors.blue));
    }

    ramp
}

fn scale(base: f64, factor: f64) -> u16 {
    (base * factor * 65535.0).clamp(0.0, 65535.0) as u16
}

/// Copy a packed ramp into an anonymous memory-backed file positioned at 0.
///
/// Uses `memfd_create`; if the kernel refuses, an unlinked temporary file is
/// used instead.
pub fn ramp_file(data: &[u8]) -> Result<File> {
    let mut file = match anonymous_memfd() {
        Ok(file) => file,
        Err(_) => tempfile::tempfile().context("Failed to create gamma table file")?,
    };

    file.write_all(data)
        .context("Failed to write gamma table")?;
    file.flush().context("Failed to flush gamma table")?;
    // The compositor reads from the current offset.
    file.seek(SeekFrom::Start(0))
        .context("Failed to rewind gamma table")?;

    Ok(file)
}

fn anonymous_memfd() -> std::io::Result<File> {
    let fd = unsafe { libc::memfd_create(c"nightlight-gamma".as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by memfd_create and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_temperature_to_rgb_daylight() {
        let rgb = temperature_to_rgb(6500);
        assert_eq!(rgb.red, 1.0);
        assert!(rgb.green > 0.99);
        assert!(rgb.blue > 0.95);
    }

    #[test]
    fn test_temperature_to_rgb_warm() {
        let rgb = temperature_to_rgb(3000);
        assert_eq!(rgb.red, 1.0);
        assert!(rgb.red > rgb.green);
        assert!(rgb.green > rgb.blue);
        assert!(rgb.blue < 0.7);
    }

    #[test]
    fn test_temperature_to_rgb_candle_has_no_blue() {
        let rgb = temperature_to_rgb(1800);
        assert_eq!(rgb.blue, 0.0);
    }

    #[test]
    fn test_temperature_to_rgb_cool_side() {
        let rgb = temperature_to_rgb(10000);
        assert!(rgb.red < 1.0);
        assert_eq!(rgb.blue, 1.0);
    }

    #[test]
    fn test_identity_ramp_is_linear() {
        let size = 256;
        let ramp = identity_ramp(size);
        assert_eq!(ramp.len(), size);
        for i in 0..size {
            let expected = (i as f64 / 255.0 * 65535.0) as u16;
            assert_eq!(ramp.red[i], expected);
            assert_eq!(ramp.green[i], expected);
            assert_eq!(ramp.blue[i], expected);
        }
        assert_eq!(ramp.red[0], 0);
        assert_eq!(ramp.red[size - 1], 65535);
    }

    #[test]
    fn test_warm_ramp_caps_blue_channel() {
        let ramp = ramp_for(1024, 3000, 1.0);
        assert_eq!(ramp.red[1023], 65535);
        assert!(ramp.blue[1023] < ramp.green[1023]);
    }

    #[test]
    fn test_degenerate_sizes() {
        assert!(ramp_for(0, 4000, 1.0).is_empty());
        let single = ramp_for(1, 4000, 1.0);
        assert_eq!(single.red, vec![0]);
    }

    #[test]
    fn test_to_bytes_layout() {
        let ramp = GammaRamp {
            red: vec![0x0102, 0x0304],
            green: vec![0x0506, 0x0708],
            blue: vec![0x090a, 0x0b0c],
        };
        assert_eq!(
            ramp.to_bytes(),
            vec![
                0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07, 0x0a, 0x09, 0x0c, 0x0b
            ]
        );
    }

    #[test]
    fn test_ramp_file_is_rewound_and_sized() {
        let data = ramp_for(512, 4500, 1.0).to_bytes();
        assert_eq!(data.len(), 512 * 6);

        let mut file = ramp_file(&data).unwrap();
        assert_eq!(file.metadata().unwrap().len(), data.len() as u64);

        let mut read_back = Vec::new();
        file.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, data);
    }
}
