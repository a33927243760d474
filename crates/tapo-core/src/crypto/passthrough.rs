//! AES-CBC session cipher for the passthrough transport.
//!
//! The passthrough handshake RSA-unwraps a 32-byte blob chosen by the
//! device: the first half is the AES-128 key, the second half the CBC IV.
//! Every request on the session reuses the same key/IV pair; payloads are
//! PKCS#7 padded and base64 encoded for transport inside the outer
//! `securePassthrough` JSON envelope.

use std::fmt;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Length of the RSA-unwrapped session key blob: 16 bytes of AES key
/// followed by 16 bytes of IV.
pub const SESSION_KEY_LEN: usize = 32;

/// Session cipher holding the negotiated key/IV pair.
#[derive(Clone)]
pub struct PassthroughCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl PassthroughCipher {
    /// Splits the RSA-unwrapped 32-byte blob into AES key and IV.
    ///
    /// Any other blob length aborts the handshake.
    pub fn from_session_key(blob: &[u8]) -> Result<Self, Error> {
        if blob.len() != SESSION_KEY_LEN {
            return Err(Error::Protocol(format!(
                "session key length is not {} bytes, got {}",
                SESSION_KEY_LEN,
                blob.len()
            )));
        }

        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&blob[..16]);
        iv.copy_from_slice(&blob[16..]);

        Ok(Self { key, iv })
    }

    /// Encrypts an inner request and base64-encodes it for the envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let ciphertext = Aes128CbcEnc::new((&self.key).into(), (&self.iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        STANDARD.encode(ciphertext)
    }

    /// Base64-decodes and decrypts an inner response.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, Error> {
        let ciphertext = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Protocol(format!("failed to base64-decode response: {}", e)))?;

        Aes128CbcDec::new((&self.key).into(), (&self.iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| Error::Protocol("PKCS#7 unpadding failed".into()))
    }
}

// Implement Debug manually to avoid exposing key material
impl fmt::Debug for PassthroughCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughCipher")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}
