//! High-level plug facade.
//!
//! A [`Plug`] owns transport selection, the retry policy, and the typed
//! device operations. On handshake it tries KLAP first and falls back to
//! the passthrough transport (plus its `login_device` step): newer firmware
//! rejects passthrough, older firmware rejects KLAP, and the error
//! signatures are not reliable enough to pre-classify, so trial is cheaper
//! than inference.
//!
//! A plug is used serially; callers that share one across tasks must
//! provide their own mutual exclusion.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::debug;
use uuid::Uuid;

use crate::commands::{
    GetDeviceInfoRequest, GetDeviceUsageRequest, GetEnergyUsageRequest, SetDeviceInfoRequest,
};
use crate::credentials::Credentials;
use crate::error::{Error, Status};
use crate::response::{DeviceInfo, DeviceUsage, Envelope, EnergyUsage};
use crate::transport::{DEFAULT_TIMEOUT, KlapSession, PassthroughSession, SessionKind};

/// Default HTTP port for both transports.
pub const DEFAULT_PORT: u16 = 80;

/// Lifecycle of a plug's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlugState {
    /// No session negotiated yet.
    #[default]
    New,
    /// A handshake is in flight.
    Handshaking,
    /// A session is established; requests may be issued.
    Ready,
    /// The device invalidated the session and the configured retries are
    /// exhausted; a new handshake is required.
    Expired,
}

/// A single Tapo smart plug on the local network.
///
/// # Example
///
/// ```no_run
/// use tapo_core::{Credentials, Plug};
///
/// #[tokio::main]
/// async fn main() -> Result<(), tapo_core::Error> {
///     let mut plug = Plug::new("192.168.1.50");
///     plug.handshake(Credentials::new("user@example.com", "secret")).await?;
///     plug.on().await?;
///     let info = plug.get_device_info().await?;
///     println!("{} is on: {}", info.decoded_nickname, info.device_on);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Plug {
    host: String,
    port: u16,
    terminal_uuid: Uuid,
    credentials: Option<Credentials>,
    session: Option<SessionKind>,
    state: PlugState,
    timeout: Duration,
    retries_on_forbidden: u32,
    retries_on_communication_error: u32,
}

impl Plug {
    /// Creates a plug facade for the given host. No traffic is sent until
    /// [`handshake`](Self::handshake).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            terminal_uuid: Uuid::new_v4(),
            credentials: None,
            session: None,
            state: PlugState::New,
            timeout: DEFAULT_TIMEOUT,
            retries_on_forbidden: 0,
            retries_on_communication_error: 0,
        }
    }

    /// Overrides the HTTP port (the devices listen on 80).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the per-request I/O timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How many times a forbidden/expired session is renegotiated before
    /// giving up. Zero (the default) disables the retry.
    pub fn with_retries_on_forbidden(mut self, retries: u32) -> Self {
        self.retries_on_forbidden = retries;
        self
    }

    /// How many times a request is repeated after a communication error.
    /// Zero (the default) disables the retry. These retries reflect flaky
    /// device firmware, not congestion; there is no back-off.
    pub fn with_retries_on_communication_error(mut self, retries: u32) -> Self {
        self.retries_on_communication_error = retries;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn state(&self) -> PlugState {
        self.state
    }

    /// Client identity metadata, generated per plug. It plays no role in
    /// the local protocol.
    pub fn terminal_uuid(&self) -> Uuid {
        self.terminal_uuid
    }

    /// Name of the negotiated transport, once ready.
    pub fn transport(&self) -> Option<&'static str> {
        self.session.as_ref().map(|s| s.name())
    }

    /// Negotiates a session with the device, retaining the credentials for
    /// later renegotiation.
    ///
    /// KLAP is attempted first; if it fails for any reason the passthrough
    /// transport is tried, followed by its `login_device` step.
    pub async fn handshake(&mut self, credentials: Credentials) -> Result<(), Error> {
        self.credentials = Some(credentials);
        self.session = None;
        self.connect().await
    }

    async fn connect(&mut self) -> Result<(), Error> {
        let credentials = self
            .credentials
            .clone()
            .ok_or_else(|| Error::Auth("no credentials: call handshake first".into()))?;

        self.state = PlugState::Handshaking;

        let mut klap = KlapSession::new(self.host.clone(), self.port).with_timeout(self.timeout);
        match klap.handshake(&credentials).await {
            Ok(()) => {
                debug!(host = %self.host, "using KLAP transport");
                self.session = Some(SessionKind::Klap(klap));
                self.state = PlugState::Ready;
                return Ok(());
            }
            Err(e) => {
                debug!(host = %self.host, error = %e, "KLAP handshake failed, trying passthrough");
            }
        }

        let mut session =
            PassthroughSession::new(self.host.clone(), self.port).with_timeout(self.timeout);
        if let Err(e) = session.handshake().await {
            self.state = PlugState::New;
            return Err(e);
        }
        if let Err(e) = session.login(&credentials).await {
            self.state = PlugState::New;
            return Err(e);
        }

        debug!(host = %self.host, "using passthrough transport");
        self.session = Some(SessionKind::Passthrough(session));
        self.state = PlugState::Ready;
        Ok(())
    }

    async fn rehandshake(&mut self) -> Result<(), Error> {
        let credentials = self
            .credentials
            .clone()
            .ok_or_else(|| Error::Auth("no credentials retained".into()))?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Protocol("handshake not performed".into()))?;

        self.state = PlugState::Handshaking;
        if let Err(e) = session.handshake(&credentials).await {
            self.state = PlugState::New;
            return Err(e);
        }
        self.state = PlugState::Ready;
        Ok(())
    }

    /// Sends an inner request with the configured retry policy applied and
    /// returns the parsed response envelope.
    async fn roundtrip(&mut self, payload: &[u8]) -> Result<Envelope, Error> {
        if self.state == PlugState::Expired {
            return Err(Error::Protocol(
                "session expired; a new handshake is required".into(),
            ));
        }

        let mut forbidden_left = self.retries_on_forbidden;
        let mut communication_left = self.retries_on_communication_error;

        loop {
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| Error::Protocol("handshake not performed".into()))?;

            // `Some(err)` means the device rejected the session and a
            // re-handshake may recover it; `None` means the request is
            // repeated on the existing session.
            let rejection = match session.request(payload).await {
                Ok(bytes) => {
                    let envelope = Envelope::from_slice(&bytes)?;
                    match envelope.status() {
                        Status::SessionTimeout => Some(Error::Device(Status::SessionTimeout)),
                        Status::CommunicationError if communication_left > 0 => {
                            communication_left -= 1;
                            debug!(host = %self.host, "device reported a communication error, retrying request");
                            None
                        }
                        _ => return Ok(envelope),
                    }
                }
                Err(err @ Error::Forbidden) => Some(err),
                Err(Error::Transport(e)) if communication_left > 0 => {
                    communication_left -= 1;
                    debug!(host = %self.host, error = %e, "transport error, retrying request");
                    None
                }
                Err(e) => return Err(e),
            };

            if let Some(err) = rejection {
                if forbidden_left == 0 {
                    self.state = PlugState::Expired;
                    return Err(err);
                }
                forbidden_left -= 1;
                debug!(host = %self.host, "session rejected, re-handshaking");
                self.rehandshake().await?;
            }
        }
    }

    /// Reads the device's info block, decoding the base64 `ssid` and
    /// `nickname` fields into their `decoded_*` siblings.
    pub async fn get_device_info(&mut self) -> Result<DeviceInfo, Error> {
        let payload = serde_json::to_vec(&GetDeviceInfoRequest::new())?;
        let envelope = self.roundtrip(&payload).await?;
        let mut info: DeviceInfo = envelope.into_result()?;

        info.decoded_ssid = decode_base64_field(&info.ssid, "ssid")?;
        info.decoded_nickname = decode_base64_field(&info.nickname, "nickname")?;
        Ok(info)
    }

    /// Switches the relay on or off.
    pub async fn set_device_info(&mut self, device_on: bool) -> Result<(), Error> {
        let payload = serde_json::to_vec(&SetDeviceInfoRequest::new(device_on))?;
        self.roundtrip(&payload).await?.ok()
    }

    /// Turns the plug on.
    pub async fn on(&mut self) -> Result<(), Error> {
        self.set_device_info(true).await
    }

    /// Turns the plug off.
    pub async fn off(&mut self) -> Result<(), Error> {
        self.set_device_info(false).await
    }

    /// Whether the relay is currently on.
    pub async fn is_on(&mut self) -> Result<bool, Error> {
        Ok(self.get_device_info().await?.device_on)
    }

    /// Reads the time/power usage counters.
    pub async fn get_device_usage(&mut self) -> Result<DeviceUsage, Error> {
        let payload = serde_json::to_vec(&GetDeviceUsageRequest::new())?;
        self.roundtrip(&payload).await?.into_result()
    }

    /// Reads the energy meter (P110 and other metering models).
    pub async fn get_energy_usage(&mut self) -> Result<EnergyUsage, Error> {
        let payload = serde_json::to_vec(&GetEnergyUsageRequest::new())?;
        self.roundtrip(&payload).await?.into_result()
    }
}

fn decode_base64_field(value: &str, field: &str) -> Result<String, Error> {
    let decoded = STANDARD
        .decode(value)
        .map_err(|e| Error::Protocol(format!("failed to base64-decode {}: {}", field, e)))?;
    Ok(String::from_utf8_lossy(&decoded).into_owned())
}
