//! Core library for communicating with TP-Link Tapo smart plugs over the
//! LAN.
//!
//! Tapo devices (P100/P110 and siblings) expose a small JSON-RPC surface
//! over HTTP, wrapped in one of two mutually incompatible encrypted
//! transports; which one a device speaks depends on its firmware version.
//! This crate negotiates a session, transparently encrypts outgoing
//! command payloads, decrypts replies, and presents a uniform
//! request/response channel.
//!
//! # Overview
//!
//! - [`Plug`] is the high-level entry point: it picks a transport (KLAP
//!   first, passthrough as fallback), performs the extra `login_device`
//!   step the passthrough transport needs, and exposes typed operations.
//! - [`transport`] holds the two session implementations for callers that
//!   want to drive a specific protocol.
//! - [`discovery`] locates plugs on the local network via UDP broadcast.
//!
//! # Example
//!
//! ```no_run
//! use tapo_core::{Credentials, Plug};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tapo_core::Error> {
//!     let mut plug = Plug::new("192.168.1.50");
//!     plug.handshake(Credentials::new("user@example.com", "secret")).await?;
//!
//!     plug.on().await?;
//!     let info = plug.get_device_info().await?;
//!     println!("{} ({}) is on: {}", info.decoded_nickname, info.model, info.device_on);
//!     Ok(())
//! }
//! ```
//!
//! # Protocol details
//!
//! Both transports carry the same inner JSON commands
//! (`get_device_info`, `set_device_info`, ...) and differ only in framing:
//!
//! - **KLAP** (newer firmware): a two-round seed exchange at
//!   `/app/handshake1` and `/app/handshake2` derives per-request AES keys
//!   and SHA-256 integrity tags; requests are raw binary bodies at
//!   `/app/request?seq=<n>`.
//! - **Passthrough** (older firmware): an RSA-wrapped AES key exchange at
//!   `/app`, after which requests travel base64-encoded inside an outer
//!   `securePassthrough` JSON envelope.
//!
//! The devices' HTTP server and cookie handling are non-compliant; see
//! the internal HTTP module for the workarounds.

pub mod commands;
pub mod credentials;
pub mod crypto;
pub mod discovery;
pub mod error;
mod http;
pub mod plug;
pub mod response;
pub mod transport;

pub use credentials::Credentials;
pub use error::{Error, Status};
pub use plug::{DEFAULT_PORT, Plug, PlugState};
pub use response::{DeviceInfo, DeviceUsage, EnergyUsage};
pub use transport::DEFAULT_TIMEOUT;

/// The version of the tapo-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
