//! Credentials for authenticating with Tapo devices.
//!
//! Both transports derive their authentication material from the same
//! `(username, password)` pair: KLAP hashes it into the shared auth hash,
//! the passthrough transport sends a transformed copy in `login_device`.
//!
//! # Security
//!
//! Passwords are stored using [`SecretString`] from the `secrecy` crate to
//! prevent accidental logging or display. Use
//! [`Credentials::expose_password()`] to access the raw value when it is
//! actually needed for authentication.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// A TP-Link account username/password pair.
///
/// # Example
///
/// ```
/// use tapo_core::Credentials;
///
/// let creds = Credentials::new("user@example.com", "password123");
/// assert_eq!(creds.username, "user@example.com");
/// assert_eq!(creds.expose_password(), "password123");
/// ```
#[derive(Clone)]
pub struct Credentials {
    /// The username (typically an email address for TP-Link cloud accounts).
    pub username: String,
    /// The password for the account (protected from accidental logging).
    password: SecretString,
}

impl Credentials {
    /// Creates new credentials with the given username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Exposes the password for authentication purposes.
    ///
    /// Only use this method when the password is actually needed; never log
    /// or display the returned value.
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
    }
}

impl Eq for Credentials {}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
