//! Error types for tapo-core.
//!
//! Errors fall into four kinds: transport failures (TCP/UDP, timeouts),
//! protocol errors (unexpected bytes on the wire), authentication/session
//! errors, and application status codes returned by the device itself.

use std::fmt;

use thiserror::Error;

/// Status code carried in the `error_code` field of every device response.
///
/// The codes the protocol documents are recognised by name so callers can
/// branch on individual ones (session timeout vs bad credentials); anything
/// else is carried verbatim as [`Status::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 0
    Success,
    /// -1010
    InvalidPublicKeyLength,
    /// -1012
    InvalidTerminalUuid,
    /// -1501
    InvalidRequestOrCredentials,
    /// 1002
    IncorrectRequest,
    /// -1003
    JsonFormattingError,
    /// 1003; often means the wrong transport was used.
    CommunicationError,
    /// 9999
    SessionTimeout,
    /// Any code the core does not interpret.
    Unknown(i32),
}

impl Status {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Success,
            -1010 => Status::InvalidPublicKeyLength,
            -1012 => Status::InvalidTerminalUuid,
            -1501 => Status::InvalidRequestOrCredentials,
            1002 => Status::IncorrectRequest,
            -1003 => Status::JsonFormattingError,
            1003 => Status::CommunicationError,
            9999 => Status::SessionTimeout,
            other => Status::Unknown(other),
        }
    }

    /// The numeric code as it appears on the wire.
    pub fn code(&self) -> i32 {
        match self {
            Status::Success => 0,
            Status::InvalidPublicKeyLength => -1010,
            Status::InvalidTerminalUuid => -1012,
            Status::InvalidRequestOrCredentials => -1501,
            Status::IncorrectRequest => 1002,
            Status::JsonFormattingError => -1003,
            Status::CommunicationError => 1003,
            Status::SessionTimeout => 9999,
            Status::Unknown(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "Success"),
            Status::InvalidPublicKeyLength => write!(f, "Invalid public key length"),
            Status::InvalidTerminalUuid => write!(f, "Invalid terminal UUID"),
            Status::InvalidRequestOrCredentials => write!(f, "Invalid request or credentials"),
            Status::IncorrectRequest => write!(f, "Incorrect request"),
            Status::JsonFormattingError => write!(f, "JSON formatting error"),
            Status::CommunicationError => write!(f, "Communication error"),
            Status::SessionTimeout => write!(f, "Session timeout"),
            Status::Unknown(code) => write!(f, "Unknown error: {}", code),
        }
    }
}

/// Error type for tapo-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// TCP/UDP failure or timeout while talking to the device.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unexpected bytes on the wire: non-200 HTTP status, missing session
    /// cookie, base64/JSON decode failure, bad ciphertext or tag. Fatal for
    /// the current session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered HTTP 403; the session must be renegotiated.
    #[error("session forbidden")]
    Forbidden,

    /// Handshake authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The device returned a non-zero status code.
    #[error("device error: {} ({})", .0, .0.code())]
    Device(Status),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(format!("JSON error: {}", err))
    }
}
