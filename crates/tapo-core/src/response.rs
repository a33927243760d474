//! Typed response structures for Tapo JSON replies.
//!
//! Every reply shares the same envelope: a signed `error_code` plus an
//! optional `result` object whose shape depends on the request. The
//! envelope keeps `result` raw until the caller knows what to expect.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{Error, Status};

/// Response envelope common to every command.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub error_code: i32,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
}

impl Envelope {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Protocol(format!("failed to decode response envelope: {}", e)))
    }

    pub fn status(&self) -> Status {
        Status::from_code(self.error_code)
    }

    /// Fails on a non-zero status, otherwise deserializes `result` into the
    /// expected shape.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, Error> {
        let status = self.status();
        if !status.is_success() {
            return Err(Error::Device(status));
        }
        let raw = self
            .result
            .ok_or_else(|| Error::Protocol("response has no result".into()))?;
        serde_json::from_str(raw.get())
            .map_err(|e| Error::Protocol(format!("failed to decode result: {}", e)))
    }

    /// Fails on a non-zero status, ignoring any result payload.
    pub fn ok(self) -> Result<(), Error> {
        let status = self.status();
        if !status.is_success() {
            return Err(Error::Device(status));
        }
        Ok(())
    }
}

/// Result of the passthrough `handshake` call: the base64 RSA-wrapped
/// session key blob.
#[derive(Debug, Deserialize)]
pub struct HandshakeResult {
    pub key: String,
}

/// Result of `login_device`.
#[derive(Debug, Deserialize)]
pub struct TokenResult {
    #[serde(default)]
    pub token: String,
}

/// Result of `securePassthrough`: the base64 ciphertext of the inner
/// response.
#[derive(Debug, Deserialize)]
pub struct PassthroughResult {
    pub response: String,
}

/// Device state and identity returned by `get_device_info`.
///
/// `ssid` and `nickname` arrive base64-encoded; the facade fills in the
/// `decoded_*` fields. Field availability differs between models (P100 vs
/// P110), so everything defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub fw_ver: String,
    #[serde(default)]
    pub hw_ver: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub model: String,
    /// Unseparated 12-char hex string; see [`DeviceInfo::mac_address`].
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub hw_id: String,
    #[serde(default)]
    pub fw_id: String,
    #[serde(default)]
    pub oem_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub time_diff: i64,
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub rssi: i32,
    #[serde(default)]
    pub signal_level: i32,
    #[serde(default)]
    pub latitude: i64,
    #[serde(default)]
    pub longitude: i64,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub specs: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub has_set_location_info: bool,
    #[serde(default)]
    pub device_on: bool,
    #[serde(default)]
    pub on_time: i64,
    #[serde(default)]
    pub default_states: Option<DefaultStates>,
    #[serde(default)]
    pub overheated: bool,
    #[serde(default)]
    pub power_protection_status: String,
    #[serde(default)]
    pub location: String,

    /// Decoded form of the base64 `ssid`, filled in by the facade.
    #[serde(skip_deserializing, default)]
    pub decoded_ssid: String,
    /// Decoded form of the base64 `nickname`, filled in by the facade.
    #[serde(skip_deserializing, default)]
    pub decoded_nickname: String,
}

impl DeviceInfo {
    /// The MAC address in colon-separated hex.
    ///
    /// Devices report the MAC as a bare 12-char hex string; anything
    /// already containing separators is returned as-is.
    pub fn mac_address(&self) -> String {
        format_mac(&self.mac)
    }
}

/// Power-on default behavior reported in `get_device_info`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DefaultStates {
    #[serde(default, rename = "type")]
    pub state_type: String,
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

/// Colon-separated rendering of an unseparated 12-hex-char MAC string.
pub fn format_mac(mac: &str) -> String {
    if mac.len() != 12 || !mac.bytes().all(|b| b.is_ascii_hexdigit()) {
        return mac.to_string();
    }
    mac.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// One today/past7/past30 counter window from `get_device_usage`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct UsageWindow {
    #[serde(default)]
    pub today: i64,
    #[serde(default)]
    pub past7: i64,
    #[serde(default)]
    pub past30: i64,
}

/// Result of `get_device_usage`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceUsage {
    #[serde(default)]
    pub time_usage: UsageWindow,
    #[serde(default)]
    pub power_usage: UsageWindow,
    #[serde(default)]
    pub saved_power: UsageWindow,
}

/// Result of `get_energy_usage` (metering models only).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnergyUsage {
    #[serde(default)]
    pub today_runtime: i64,
    #[serde(default)]
    pub month_runtime: i64,
    #[serde(default)]
    pub today_energy: i64,
    #[serde(default)]
    pub month_energy: i64,
    #[serde(default)]
    pub local_time: String,
    #[serde(default)]
    pub electricity_charge: [i64; 3],
    #[serde(default)]
    pub current_power: i64,
}
