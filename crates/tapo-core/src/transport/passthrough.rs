//! Passthrough transport for older Tapo firmware.
//!
//! The handshake generates an ephemeral RSA-1024 key pair and sends the
//! public half PEM-encoded; the device replies with an RSA-wrapped 32-byte
//! blob holding the AES-128-CBC key and IV, plus a `TP_SESSIONID` routing
//! cookie. After a `login_device` exchange, every request URL carries the
//! returned token as a query parameter.
//!
//! Requests are AES-CBC encrypted, base64 encoded, and wrapped in an outer
//! `securePassthrough` JSON envelope POSTed to `/app`.

use std::fmt;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use tracing::debug;

use crate::commands::{HandshakeRequest, LoginDeviceRequest, SecurePassthroughRequest};
use crate::credentials::Credentials;
use crate::crypto::passthrough::PassthroughCipher;
use crate::error::Error;
use crate::http;
use crate::response::{Envelope, HandshakeResult, PassthroughResult, TokenResult};
use crate::transport::DEFAULT_TIMEOUT;

/// RSA modulus size for the ephemeral handshake key pair.
const RSA_BITS: usize = 1024;

/// Session cookie name used for request routing.
const SESSION_COOKIE_NAME: &str = "TP_SESSIONID";

/// A passthrough session with a device.
pub struct PassthroughSession {
    host: String,
    port: u16,
    cipher: Option<PassthroughCipher>,
    /// Verbatim `TP_SESSIONID=<value>` pair from the handshake response.
    cookie: Option<String>,
    token: Option<String>,
    timeout: Duration,
}

impl PassthroughSession {
    /// Creates an unconnected session; [`handshake`](Self::handshake) must
    /// succeed before requests can be issued.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            cipher: None,
            cookie: None,
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-request I/O timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Negotiates the AES session key.
    ///
    /// An ephemeral RSA-1024 key pair is generated and its public half sent
    /// PEM-encoded; the device replies with the wrapped 32-byte key/IV blob
    /// and the session cookie. The private key is only needed here and is
    /// dropped before returning.
    pub async fn handshake(&mut self) -> Result<(), Error> {
        self.cipher = None;
        self.cookie = None;
        self.token = None;

        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| Error::Protocol(format!("RSA key generation failed: {}", e)))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Protocol(format!("PEM encoding failed: {}", e)))?;

        let request = serde_json::to_vec(&HandshakeRequest::new(public_pem))?;
        debug!(host = %self.host, "performing passthrough handshake");

        let response = http::post(
            &self.host,
            self.port,
            "/app",
            "application/json",
            &request,
            None,
            self.timeout,
        )
        .await?;

        if response.status != 200 {
            return Err(Error::Protocol(format!(
                "handshake returned status {}",
                response.status
            )));
        }

        let cookie = response
            .cookie(SESSION_COOKIE_NAME)
            .map(|value| format!("{}={}", SESSION_COOKIE_NAME, value))
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "no {} cookie in handshake response",
                    SESSION_COOKIE_NAME
                ))
            })?;

        let envelope = Envelope::from_slice(&response.body)?;
        let result: HandshakeResult = envelope.into_result()?;

        let wrapped = STANDARD
            .decode(&result.key)
            .map_err(|e| Error::Protocol(format!("failed to base64-decode session key: {}", e)))?;
        let session_key = private_key
            .decrypt(Pkcs1v15Encrypt, &wrapped)
            .map_err(|e| Error::Protocol(format!("RSA decryption of session key failed: {}", e)))?;

        self.cipher = Some(PassthroughCipher::from_session_key(&session_key)?);
        self.cookie = Some(cookie);
        debug!(host = %self.host, "passthrough handshake complete");
        Ok(())
    }

    /// Exchanges credentials for the token appended to every request URL.
    pub async fn login(&mut self, credentials: &Credentials) -> Result<(), Error> {
        let request = serde_json::to_vec(&LoginDeviceRequest::new(credentials))?;
        let response = self.request(&request).await?;

        let envelope = Envelope::from_slice(&response)?;
        let result: TokenResult = envelope.into_result()?;
        if result.token.is_empty() {
            return Err(Error::Auth("empty token returned by device".into()));
        }

        self.token = Some(result.token);
        debug!(host = %self.host, "passthrough login complete");
        Ok(())
    }

    /// Sends one inner JSON request through the `securePassthrough`
    /// envelope and returns the decrypted inner response.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| Error::Protocol("handshake not performed".into()))?;

        let outer = serde_json::to_vec(&SecurePassthroughRequest::new(cipher.encrypt(payload)))?;
        let path = match &self.token {
            Some(token) => format!("/app?token={}", token),
            None => "/app".to_string(),
        };

        let response = http::post(
            &self.host,
            self.port,
            &path,
            "application/json",
            &outer,
            self.cookie.as_deref(),
            self.timeout,
        )
        .await?;

        if response.status != 200 {
            return Err(Error::Protocol(format!(
                "request returned status {}",
                response.status
            )));
        }

        let envelope = Envelope::from_slice(&response.body)?;
        if !envelope.status().is_success() {
            // session-level errors arrive on the outer envelope; hand it up
            // unparsed so callers see one envelope shape either way
            return Ok(response.body);
        }
        let result: PassthroughResult = envelope.into_result()?;
        cipher.decrypt(&result.response)
    }
}

// Implement Debug manually to avoid exposing session secrets
impl fmt::Debug for PassthroughSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cipher", &self.cipher)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
