//! IP-based location lookup with a process-lifetime cache.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::constants::{IP_LOCATION_TIMEOUT, IP_LOCATION_URL};

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Source of the machine's approximate position.
#[cfg_attr(test, mockall::automock)]
pub trait LocationProvider: Send + Sync {
    fn locate(&self) -> Result<Coordinates>;
}

/// Looks the public IP up on ip-api.com.
pub struct IpApiLocator {
    url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    #[serde(default)]
    city: Option<String>,
}

impl IpApiLocator {
    pub fn new() -> Self {
        Self::with_endpoint(IP_LOCATION_URL, IP_LOCATION_TIMEOUT)
    }

    pub fn with_endpoint(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl Default for IpApiLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationProvider for IpApiLocator {
    fn locate(&self) -> Result<Coordinates> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let body = agent
            .get(&self.url)
            .call()
            .with_context(|| format!("IP location request to {} failed", self.url))?
            .into_string()
            .context("Failed to read IP location response")?;

        parse_ip_api_response(&body)
    }
}

fn parse_ip_api_response(body: &str) -> Result<Coordinates> {
    let response: IpApiResponse =
        serde_json::from_str(body).context("Failed to parse IP location response")?;

    if response.lat == 0.0 && response.lon == 0.0 {
        anyhow::bail!("IP location service returned no coordinates");
    }

    if let Some(city) = response.city.as_deref().filter(|c| !c.is_empty()) {
        log_debug!(
            "IP location: {} ({:.4}, {:.4})",
            city,
            response.lat,
            response.lon
        );
    }

    Ok(Coordinates {
        latitude: response.lat,
        longitude: response.lon,
    })
}

/// Caches the first successful lookup until explicitly invalidated.
///
/// The lock is only held to read or store the cached value, never across the
/// network request.
pub struct LocationCache {
    provider: Box<dyn LocationProvider>,
    cached: Mutex<Option<Coordinates>>,
}

impl LocationCache {
    pub fn new(provider: Box<dyn LocationProvider>) -> Self {
        Self {
            provider,
            cached: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Result<Coordinates> {
        if let Some(coords) = *self.lock() {
            return Ok(coords);
        }

        let coords = self.provider.locate()?;
        *self.lock() = Some(coords);
        Ok(coords)
    }

    /// Forget the cached position so the next [`get`](Self::get) asks again.
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Coordinates>> {
        self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
