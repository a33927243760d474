//! KLAP transport for newer Tapo firmware.
//!
//! KLAP moves the expensive public-key exchange out of the steady state:
//! the handshake establishes long-lived seeds, from which per-request AES
//! keys and integrity tags are deterministically derived.
//!
//! # Protocol overview
//!
//! 1. **Handshake 1**: POST 16 random bytes to `/app/handshake1`; the
//!    device answers with its own 16-byte seed plus a 32-byte hash proving
//!    it knows the credential hash, and sets the session cookie.
//! 2. **Handshake 2**: POST the client's counter-proof to
//!    `/app/handshake2`; 200 confirms authentication.
//! 3. **Requests**: POST `tag ‖ ciphertext` bodies to
//!    `/app/request?seq=<n>`; responses use the same layout and sequence
//!    number.

use std::fmt;
use std::time::Duration;

use rand::RngCore;
use tokio::time::Instant;
use tracing::debug;

use crate::credentials::Credentials;
use crate::crypto::klap::{KlapCipher, auth_hash, handshake1_hash, handshake2_hash};
use crate::error::Error;
use crate::http;
use crate::transport::DEFAULT_TIMEOUT;

/// Session cookie name used for request routing.
const SESSION_COOKIE_NAME: &str = "TP_SESSIONID";

/// Cookie carrying the session lifetime in seconds.
const TIMEOUT_COOKIE_NAME: &str = "TIMEOUT";

/// Expected handshake1 response length: 16-byte seed + 32-byte hash.
const HANDSHAKE1_LEN: usize = 48;

/// A KLAP session with a device.
pub struct KlapSession {
    host: String,
    port: u16,
    cipher: Option<KlapCipher>,
    session_id: Option<String>,
    expires_at: Option<Instant>,
    timeout: Duration,
}

impl KlapSession {
    /// Creates an unconnected session; [`handshake`](Self::handshake) must
    /// succeed before requests can be issued.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            cipher: None,
            session_id: None,
            expires_at: None,
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

    /// Session expiry advertised by the device's `TIMEOUT` cookie, if any.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Performs the two-round KLAP handshake.
    ///
    /// Fails with [`Error::Auth`] when the device's hash does not match the
    /// credential-derived one, which is how wrong credentials surface.
    pub async fn handshake(&mut self, credentials: &Credentials) -> Result<(), Error> {
        self.cipher = None;
        self.session_id = None;
        self.expires_at = None;

        let mut local_seed = [0u8; 16];
        rand::rng().fill_bytes(&mut local_seed);
        let auth = auth_hash(&credentials.username, credentials.expose_password());

        debug!(
            host = %self.host,
            local_seed = %hex::encode(local_seed),
            "performing KLAP handshake1"
        );

        let response = http::post(
            &self.host,
            self.port,
            "/app/handshake1",
            "application/octet-stream",
            &local_seed,
            None,
            self.timeout,
        )
        .await?;

        match response.status {
            200 => {}
            403 => return Err(Error::Forbidden),
            // non-200 is a communication error, not a framing one
            status => {
                return Err(Error::Transport(format!(
                    "handshake1 returned status {}",
                    status
                )));
            }
        }

        if response.body.len() != HANDSHAKE1_LEN {
            return Err(Error::Protocol(format!(
                "handshake1 response has unexpected length: {} (expected {})",
                response.body.len(),
                HANDSHAKE1_LEN
            )));
        }

        let mut remote_seed = [0u8; 16];
        remote_seed.copy_from_slice(&response.body[..16]);
        let server_hash = &response.body[16..HANDSHAKE1_LEN];

        let expected = handshake1_hash(&local_seed, &remote_seed, &auth);
        if server_hash != expected {
            debug!(
                server_hash = %hex::encode(server_hash),
                expected = %hex::encode(expected),
                "handshake1 hash mismatch"
            );
            return Err(Error::Auth(
                "server hash does not match credentials".into(),
            ));
        }

        let session_id = response
            .cookie(SESSION_COOKIE_NAME)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "no {} cookie in handshake1 response",
                    SESSION_COOKIE_NAME
                ))
            })?
            .to_string();

        let expires_at = match response.cookie(TIMEOUT_COOKIE_NAME) {
            Some(value) => {
                let seconds: u64 = value.trim().parse().map_err(|_| {
                    Error::Protocol(format!("invalid {} cookie value '{}'", TIMEOUT_COOKIE_NAME, value))
                })?;
                Some(Instant::now() + Duration::from_secs(seconds))
            }
            None => None,
        };

        debug!(
            host = %self.host,
            remote_seed = %hex::encode(remote_seed),
            "performing KLAP handshake2"
        );

        let payload = handshake2_hash(&local_seed, &remote_seed, &auth);
        let cookie = format!("{}={}", SESSION_COOKIE_NAME, session_id);
        let response = http::post(
            &self.host,
            self.port,
            "/app/handshake2",
            "application/octet-stream",
            &payload,
            Some(&cookie),
            self.timeout,
        )
        .await?;

        if response.status != 200 {
            return Err(Error::Auth(format!(
                "handshake2 returned status {}",
                response.status
            )));
        }

        self.cipher = Some(KlapCipher::new(&local_seed, &remote_seed, &auth));
        self.session_id = Some(session_id);
        self.expires_at = expires_at;
        debug!(host = %self.host, "KLAP handshake complete");
        Ok(())
    }

    /// Sends one inner JSON request and returns the decrypted response.
    ///
    /// Each request consumes one sequence number; its response is decrypted
    /// under the same number. HTTP 403 surfaces as [`Error::Forbidden`] so
    /// callers may re-handshake.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let (seq, body) = {
            let cipher = self
                .cipher
                .as_mut()
                .ok_or_else(|| Error::Protocol("handshake not performed".into()))?;
            cipher.encrypt(payload)
        };

        let session_id = self
            .session_id
            .as_deref()
            .ok_or_else(|| Error::Protocol("handshake not performed".into()))?;
        let cookie = format!("{}={}", SESSION_COOKIE_NAME, session_id);
        let path = format!("/app/request?seq={}", seq);

        debug!(host = %self.host, seq, "sending KLAP request");

        let response = http::post(
            &self.host,
            self.port,
            &path,
            "application/octet-stream",
            &body,
            Some(&cookie),
            self.timeout,
        )
        .await?;

        match response.status {
            200 => {}
            403 => return Err(Error::Forbidden),
            // non-200 is a communication error, not a framing one
            status => {
                return Err(Error::Transport(format!(
                    "request returned status {}",
                    status
                )));
            }
        }

        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| Error::Protocol("handshake not performed".into()))?;
        cipher.decrypt(seq, &response.body)
    }
}

// Implement Debug manually to avoid exposing session secrets
impl fmt::Debug for KlapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KlapSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cipher", &self.cipher)
            .field("session_id", &self.session_id.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_before_handshake_fails() {
        let mut session = KlapSession::new("127.0.0.1", 80);
        match session.request(b"{}").await {
            Err(Error::Protocol(msg)) => assert!(msg.contains("handshake")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_new_session_has_no_expiry() {
        let session = KlapSession::new("127.0.0.1", 80);
        assert!(session.expires_at().is_none());
    }
}
