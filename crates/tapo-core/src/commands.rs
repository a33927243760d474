//! Wire command builders for the Tapo JSON-RPC surface.
//!
//! Every application command is a JSON object with `method`, optional
//! `params`, and `requestTimeMils` (milliseconds since the Unix epoch; a
//! client-side freshness stamp the device does not validate). Requests are
//! identical over either transport once a session is established.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::credentials::Credentials;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The passthrough `handshake` request carrying the client's public key.
#[derive(Debug, Serialize)]
pub struct HandshakeRequest {
    method: &'static str,
    #[serde(rename = "requestTimeMils")]
    request_time_mils: i64,
    params: HandshakeParams,
}

#[derive(Debug, Serialize)]
struct HandshakeParams {
    key: String,
}

impl HandshakeRequest {
    /// `key` is the PEM-encoded SPKI public key the device will wrap the
    /// session key for.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            method: "handshake",
            request_time_mils: now_millis(),
            params: HandshakeParams { key: key.into() },
        }
    }
}

/// The `login_device` request exchanging credentials for a token
/// (passthrough transport only).
#[derive(Debug, Serialize)]
pub struct LoginDeviceRequest {
    method: &'static str,
    #[serde(rename = "requestTimeMils")]
    request_time_mils: i64,
    params: LoginDeviceParams,
}

#[derive(Debug, Serialize)]
struct LoginDeviceParams {
    username: String,
    password: String,
}

impl LoginDeviceRequest {
    /// Builds the `login_device` request.
    ///
    /// The device expects `username` as the base64 of the lowercase-hex
    /// SHA-1 of the username, and `password` as the base64 of the raw
    /// password.
    pub fn new(credentials: &Credentials) -> Self {
        let password = credentials.expose_password();
        if password.len() > 8 {
            // firmware bug, see https://github.com/fishbigger/TapoP100/issues/4
            warn!("passwords longer than 8 characters are truncated by some Tapo firmware");
        }

        let hexsha = hex::encode(Sha1::digest(credentials.username.as_bytes()));
        Self {
            method: "login_device",
            request_time_mils: now_millis(),
            params: LoginDeviceParams {
                username: STANDARD.encode(hexsha.as_bytes()),
                password: STANDARD.encode(password.as_bytes()),
            },
        }
    }
}

/// The outer envelope wrapping an encrypted inner request on the
/// passthrough transport.
#[derive(Debug, Serialize)]
pub struct SecurePassthroughRequest {
    method: &'static str,
    params: SecurePassthroughParams,
}

#[derive(Debug, Serialize)]
struct SecurePassthroughParams {
    request: String,
}

impl SecurePassthroughRequest {
    /// `request` is the base64 AES-CBC ciphertext of the inner JSON.
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            method: "securePassthrough",
            params: SecurePassthroughParams {
                request: request.into(),
            },
        }
    }
}

/// Queries the device info block.
#[derive(Debug, Serialize)]
pub struct GetDeviceInfoRequest {
    method: &'static str,
    #[serde(rename = "requestTimeMils")]
    request_time_mils: i64,
}

impl GetDeviceInfoRequest {
    pub fn new() -> Self {
        Self {
            method: "get_device_info",
            request_time_mils: now_millis(),
        }
    }
}

impl Default for GetDeviceInfoRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Switches the relay on or off.
#[derive(Debug, Serialize)]
pub struct SetDeviceInfoRequest {
    method: &'static str,
    params: SetDeviceInfoParams,
}

#[derive(Debug, Serialize)]
struct SetDeviceInfoParams {
    device_on: bool,
}

impl SetDeviceInfoRequest {
    pub fn new(device_on: bool) -> Self {
        Self {
            method: "set_device_info",
            params: SetDeviceInfoParams { device_on },
        }
    }
}

/// Queries the time/power usage counters.
#[derive(Debug, Serialize)]
pub struct GetDeviceUsageRequest {
    method: &'static str,
    #[serde(rename = "requestTimeMils")]
    request_time_mils: i64,
}

impl GetDeviceUsageRequest {
    pub fn new() -> Self {
        Self {
            method: "get_device_usage",
            request_time_mils: now_millis(),
        }
    }
}

impl Default for GetDeviceUsageRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Queries the energy meter (P110 and other metering models).
#[derive(Debug, Serialize)]
pub struct GetEnergyUsageRequest {
    method: &'static str,
    #[serde(rename = "requestTimeMils")]
    request_time_mils: i64,
}

impl GetEnergyUsageRequest {
    pub fn new() -> Self {
        Self {
            method: "get_energy_usage",
            request_time_mils: now_millis(),
        }
    }
}

impl Default for GetEnergyUsageRequest {
    fn default() -> Self {
        Self::new()
    }
}
