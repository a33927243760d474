//! Cryptographic building blocks for the Tapo LAN protocols.
//!
//! Each transport has its own cipher module: the passthrough transport uses
//! a fixed AES-128-CBC key/IV negotiated by RSA wrapping, KLAP derives
//! per-request keys and integrity tags from handshake seeds. The discovery
//! probe uses a rolling-XOR obfuscation that is neither.

pub mod klap;
pub mod passthrough;
pub mod xor;

pub use klap::{KlapCipher, auth_hash, handshake1_hash, handshake2_hash};
pub use passthrough::PassthroughCipher;
