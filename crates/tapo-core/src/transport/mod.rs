//! Encrypted transports for Tapo devices.
//!
//! Two mutually incompatible transports exist in the field; which one a
//! device speaks depends on its firmware version:
//!
//! - [`KlapSession`]: seed-exchange handshake producing per-request derived
//!   keys and integrity tags, raw binary bodies (newer firmware)
//! - [`PassthroughSession`]: AES key exchanged by RSA wrapping, requests
//!   carried base64-encoded inside a `securePassthrough` JSON envelope
//!   (older firmware)
//!
//! Both carry the same inner JSON commands once established. A session must
//! not issue application requests before its handshake has succeeded, and
//! requests on one session are serialised: the KLAP sequence counter and
//! per-request key derivation assume monotonic ordering.

pub mod klap;
pub mod passthrough;

pub use klap::KlapSession;
pub use passthrough::PassthroughSession;

use std::time::Duration;

use crate::credentials::Credentials;
use crate::error::Error;

/// Default timeout for transport operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A negotiated session with a device, one variant per transport.
#[derive(Debug)]
pub enum SessionKind {
    Klap(KlapSession),
    Passthrough(PassthroughSession),
}

impl SessionKind {
    /// Sends one inner JSON request and returns the raw inner response
    /// bytes.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            SessionKind::Klap(session) => session.request(payload).await,
            SessionKind::Passthrough(session) => session.request(payload).await,
        }
    }

    /// Re-runs the session's handshake (including the `login_device` step
    /// for the passthrough transport) after the device expired the previous
    /// session.
    pub async fn handshake(&mut self, credentials: &Credentials) -> Result<(), Error> {
        match self {
            SessionKind::Klap(session) => session.handshake(credentials).await,
            SessionKind::Passthrough(session) => {
                session.handshake().await?;
                session.login(credentials).await
            }
        }
    }

    /// Short protocol name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SessionKind::Klap(_) => "KLAP",
            SessionKind::Passthrough(_) => "passthrough",
        }
    }
}
