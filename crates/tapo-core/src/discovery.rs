//! LAN discovery probe for Tapo devices.
//!
//! Two broadcast schemes run concurrently over one UDP socket:
//!
//! - **v1**: a JSON document with four keyed empty-object sub-requests,
//!   obfuscated with the rolling-XOR scheme and sent to port 9999
//! - **v2**: a fixed 16-byte binary frame sent to port 20002
//!
//! The sender task emits each probe six times at 200 ms intervals while the
//! receive loop collects replies until the window closes. Replies are JSON
//! prefixed by a 16-byte header; devices are deduplicated by device id with
//! later replies winning, and replies carrying a non-zero status are
//! collected separately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::crypto::xor;
use crate::error::{Error, Status};
use crate::response::format_mac;

/// Port for v1 (XOR-obfuscated JSON) discovery.
pub const V1_DISCOVERY_PORT: u16 = 9999;

/// Port for v2 (fixed binary frame) discovery.
pub const V2_DISCOVERY_PORT: u16 = 20002;

/// Default receive window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// The fixed v2 probe frame. An opaque blob on the wire; not derived.
const V2_PROBE: [u8; 16] = [
    0x02, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46, 0x3c, 0xb5, 0xd3,
];

/// Header bytes prefixed to every discovery reply.
const REPLY_HEADER_LEN: usize = 16;

/// Tuning knobs for a probe sweep. The defaults are the values devices are
/// known to answer reliably.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Destination for v1 probes.
    pub v1_addr: String,
    /// Destination for v2 probes.
    pub v2_addr: String,
    /// How many times each probe is sent.
    pub probe_count: u32,
    /// Pause between probe rounds.
    pub probe_interval: Duration,
    /// How long to keep reading replies.
    pub window: Duration,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            v1_addr: format!("255.255.255.255:{}", V1_DISCOVERY_PORT),
            v2_addr: format!("255.255.255.255:{}", V2_DISCOVERY_PORT),
            probe_count: 6,
            probe_interval: Duration::from_millis(200),
            window: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl DiscoverOptions {
    /// Sets the receive window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// A discovery reply as sent by a device.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoverResponse {
    #[serde(default)]
    pub result: DiscoverResult,
}

/// The `result` object of a discovery reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoverResult {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub device_model: String,
    #[serde(default)]
    pub ip: String,
    /// Unseparated 12-char hex string; see
    /// [`mac_address`](DiscoverResult::mac_address).
    #[serde(default)]
    pub mac: String,
    /// The wire name carries the firmware's own spelling.
    #[serde(default, rename = "is_support_iot_clout")]
    pub is_support_iot_cloud: bool,
    #[serde(default)]
    pub obd_src: String,
    #[serde(default)]
    pub factory_default: bool,
    #[serde(default)]
    pub mgt_encrypt_schm: EncryptScheme,
    #[serde(default)]
    pub error_code: i32,
}

impl DiscoverResult {
    /// The MAC address in colon-separated hex.
    pub fn mac_address(&self) -> String {
        format_mac(&self.mac)
    }

    pub fn status(&self) -> Status {
        Status::from_code(self.error_code)
    }
}

/// Management encryption scheme advertised in discovery replies.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EncryptScheme {
    #[serde(default)]
    pub is_support_https: bool,
    /// "KLAP" or "AES" on current firmware.
    #[serde(default)]
    pub encrypt_type: String,
    #[serde(default)]
    pub http_port: u16,
    /// Protocol level.
    #[serde(default)]
    pub lv: u32,
}

/// Devices found by a probe sweep, keyed by device id, plus the replies
/// that carried a non-zero status.
#[derive(Debug, Default)]
pub struct Discovered {
    pub devices: HashMap<String, DiscoverResponse>,
    pub errors: Vec<DiscoverResponse>,
}

/// The v1 probe body: four keyed empty-object sub-requests.
fn v1_probe() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "system": {"get_sysinfo": {}},
        "cnCloud": {"get_info": {}},
        "smartlife.iot.common.cloud": {"get_info": {}},
        "smartlife.cam.ipcamera.cloud": {"get_info": {}},
    }))
    .unwrap_or_default()
}

/// Probes the local network with the default options.
pub async fn discover() -> Result<Discovered, Error> {
    discover_with(DiscoverOptions::default()).await
}

/// Probes the local network for Tapo devices.
///
/// The sender and receiver run as independent tasks sharing one datagram
/// socket; the sweep ends when the receive window closes.
pub async fn discover_with(options: DiscoverOptions) -> Result<Discovered, Error> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    let socket = Arc::new(socket);

    let v1_frame = xor::obfuscate(&v1_probe());

    let sender = {
        let socket = Arc::clone(&socket);
        let options = options.clone();
        tokio::spawn(async move {
            for _ in 0..options.probe_count {
                if let Err(e) = socket.send_to(&v1_frame, options.v1_addr.as_str()).await {
                    debug!(error = %e, "failed to send v1 discovery probe");
                    break;
                }
                if let Err(e) = socket.send_to(&V2_PROBE, options.v2_addr.as_str()).await {
                    debug!(error = %e, "failed to send v2 discovery probe");
                    break;
                }
                tokio::time::sleep(options.probe_interval).await;
            }
        })
    };

    let mut found = Discovered::default();
    let mut buf = [0u8; 2048];
    let deadline = tokio::time::Instant::now() + options.window;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, addr))) => {
                debug!(bytes = n, from = %addr, "discovery reply");
                match parse_reply(&buf[..n]) {
                    Ok(reply) => {
                        if reply.result.error_code != 0 {
                            found.errors.push(reply);
                        } else {
                            // later replies from the same device win
                            found
                                .devices
                                .insert(reply.result.device_id.clone(), reply);
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring unparseable discovery reply"),
                }
            }
            Ok(Err(e)) => {
                sender.abort();
                return Err(Error::Transport(e.to_string()));
            }
            Err(_) => break,
        }
    }

    sender.abort();
    debug!(
        devices = found.devices.len(),
        errors = found.errors.len(),
        "discovery finished"
    );
    Ok(found)
}

/// Parses a discovery reply, skipping its 16-byte header.
fn parse_reply(data: &[u8]) -> Result<DiscoverResponse, Error> {
    if data.len() < REPLY_HEADER_LEN {
        return Err(Error::Protocol(format!(
            "discovery reply too short: {} bytes",
            data.len()
        )));
    }
    serde_json::from_slice(&data[REPLY_HEADER_LEN..])
        .map_err(|e| Error::Protocol(format!("failed to decode discovery reply: {}", e)))
}
