//! Request/response shapes and method dispatch for the control socket.
//!
//! One JSON object per line in both directions:
//!
//! ```text
//! → {"id":1,"method":"gamma.setTemperature","params":{"low":3500,"high":6500}}
//! ← {"id":1,"result":{"success":true,"message":"temperature set"}}
//! ← {"id":2,"error":"low_temp (500) must be between 1000 and 10000 Kelvin"}
//! ```
//!
//! Method names may carry a `wayland.` prefix.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::GammaEngine;
use crate::config::parse_time_of_day;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn result(id: Option<u64>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// What the connection handler should do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    /// Switch the connection to streaming snapshots.
    Subscribe,
}

/// Run one request against the engine.
///
/// Errors carry the message sent back to the client.
pub fn dispatch(engine: &GammaEngine, request: &Request) -> Result<Reply> {
    let method = request
        .method
        .strip_prefix("wayland.")
        .unwrap_or(&request.method);
    let params = &request.params;

    match method {
        "gamma.getState" => Ok(Reply::Result(serde_json::to_value(&*engine.get_state())?)),
        "gamma.setTemperature" => {
            let (low, high) = match number(params, "temp") {
                Some(temp) => (temp, temp),
                None => match (number(params, "low"), number(params, "high")) {
                    (Some(low), Some(high)) => (low, high),
                    _ => {
                        return Err(anyhow!(
                            "missing temperature parameters (provide 'temp' or both 'low' and 'high')"
                        ));
                    }
                },
            };
            engine.set_temperature(kelvin(low), kelvin(high))?;
            success("temperature set")
        }
        "gamma.setLocation" => {
            let latitude = number(params, "latitude")
                .ok_or_else(|| anyhow!("missing or invalid 'latitude' parameter"))?;
            let longitude = number(params, "longitude")
                .ok_or_else(|| anyhow!("missing or invalid 'longitude' parameter"))?;
            engine.set_location(latitude, longitude)?;
            success("location set")
        }
        "gamma.setManualTimes" => {
            let (Some(sunrise), Some(sunset)) = (text(params, "sunrise"), text(params, "sunset"))
            else {
                engine.clear_manual_times()?;
                return success("manual times cleared");
            };
            let sunrise = parse_time_of_day(sunrise)
                .map_err(|_| anyhow!("invalid sunrise format (use HH:MM)"))?;
            let sunset = parse_time_of_day(sunset)
                .map_err(|_| anyhow!("invalid sunset format (use HH:MM)"))?;
            engine.set_manual_times(sunrise, sunset)?;
            success("manual times set")
        }
        "gamma.setUseIPLocation" => {
            let use_ip =
                boolean(params, "use").ok_or_else(|| anyhow!("missing or invalid 'use' parameter"))?;
            engine.set_use_ip_location(use_ip)?;
            success("IP location preference set")
        }
        "gamma.setGamma" => {
            let gamma = number(params, "gamma")
                .ok_or_else(|| anyhow!("missing or invalid 'gamma' parameter"))?;
            engine.set_gamma(gamma)?;
            success("gamma set")
        }
        "gamma.setEnabled" => {
            let enabled = boolean(params, "enabled")
                .ok_or_else(|| anyhow!("missing or invalid 'enabled' parameter"))?;
            engine.set_enabled(enabled)?;
            success("enabled state set")
        }
        "gamma.subscribe" => Ok(Reply::Subscribe),
        _ => Err(anyhow!("unknown method: {}", request.method)),
    }
}

fn success(message: &str) -> Result<Reply> {
    Ok(Reply::Result(json!({ "success": true, "message": message })))
}

fn number(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

fn boolean(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

/// A non-empty string parameter.
fn text<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Clients send JSON numbers; out-of-range values still reach validation.
fn kelvin(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}
