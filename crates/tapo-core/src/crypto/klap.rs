//! KLAP key schedule and per-request session cipher.
//!
//! The KLAP handshake establishes three 16/32-byte secrets: a client-chosen
//! `local_seed`, a device-chosen `remote_seed`, and the credential-derived
//! auth hash. All per-request material is deterministically derived from
//! them:
//!
//! * AES key: first 16 bytes of `SHA-256("lsk" ‖ local ‖ remote ‖ auth)`
//! * IV: first 12 bytes of `SHA-256("iv" ‖ local ‖ remote ‖ auth)`, with a
//!   big-endian 32-bit sequence number appended per request; the last 4
//!   bytes of the same digest seed the sequence counter
//! * signature prefix: first 28 bytes of `SHA-256("ldk" ‖ local ‖ remote ‖
//!   auth)`
//!
//! Each wire body is `SHA-256(sig ‖ seq ‖ ciphertext) ‖ ciphertext`. All
//! multi-byte integers are big-endian.

use std::fmt;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Length of the SHA-256 integrity tag prefixed to every wire body.
const TAG_LEN: usize = 32;

/// Computes the credential hash shared between client and device:
/// `SHA-256(SHA-1(username) ‖ SHA-1(password))`.
pub fn auth_hash(username: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(Sha1::digest(username.as_bytes()));
    hasher.update(Sha1::digest(password.as_bytes()));
    hasher.finalize().into()
}

/// Hash the device must present after handshake round 1:
/// `SHA-256(local_seed ‖ remote_seed ‖ auth_hash)`.
pub fn handshake1_hash(local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(local_seed);
    hasher.update(remote_seed);
    hasher.update(auth_hash);
    hasher.finalize().into()
}

/// Payload the client posts in handshake round 2:
/// `SHA-256(remote_seed ‖ local_seed ‖ auth_hash)`.
pub fn handshake2_hash(local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(remote_seed);
    hasher.update(local_seed);
    hasher.update(auth_hash);
    hasher.finalize().into()
}

fn label_digest(label: &[u8], local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(local_seed);
    hasher.update(remote_seed);
    hasher.update(auth_hash);
    hasher.finalize().into()
}

/// Per-request session cipher derived from the handshake seeds.
///
/// [`encrypt`](Self::encrypt) consumes one sequence number per call; its
/// response must be decrypted with the same number. [`seal`](Self::seal) and
/// [`open`](Self::open) are the sequence-explicit primitives, usable from
/// either side of the protocol.
#[derive(Clone)]
pub struct KlapCipher {
    key: [u8; 16],
    iv_prefix: [u8; 12],
    sig: [u8; 28],
    seq: i32,
}

impl KlapCipher {
    /// Derives the key schedule from the handshake seeds.
    pub fn new(local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> Self {
        let key_digest = label_digest(b"lsk", local_seed, remote_seed, auth_hash);
        let iv_digest = label_digest(b"iv", local_seed, remote_seed, auth_hash);
        let sig_digest = label_digest(b"ldk", local_seed, remote_seed, auth_hash);

        let mut key = [0u8; 16];
        key.copy_from_slice(&key_digest[..16]);

        let mut iv_prefix = [0u8; 12];
        iv_prefix.copy_from_slice(&iv_digest[..12]);

        let mut sig = [0u8; 28];
        sig.copy_from_slice(&sig_digest[..28]);

        let mut seq_bytes = [0u8; 4];
        seq_bytes.copy_from_slice(&iv_digest[28..32]);
        let seq = i32::from_be_bytes(seq_bytes);

        Self {
            key,
            iv_prefix,
            sig,
            seq,
        }
    }

    /// The sequence number the next request will use.
    pub fn seq(&self) -> i32 {
        self.seq
    }

    /// Encrypts a request with the current sequence number and advances the
    /// counter. Returns the consumed number and the wire body.
    pub fn encrypt(&mut self, payload: &[u8]) -> (i32, Vec<u8>) {
        let seq = self.seq;
        let body = self.seal(seq, payload);
        self.seq = self.seq.wrapping_add(1);
        (seq, body)
    }

    /// Verifies and decrypts the response to the request numbered `seq`.
    pub fn decrypt(&self, seq: i32, body: &[u8]) -> Result<Vec<u8>, Error> {
        self.open(seq, body)
    }

    /// Produces a wire body (tag ‖ ciphertext) for an explicit sequence
    /// number.
    pub fn seal(&self, seq: i32, payload: &[u8]) -> Vec<u8> {
        let iv = self.iv_for(seq);
        let ciphertext = Aes128CbcEnc::new((&self.key).into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(payload);
        let tag = self.tag_for(seq, &ciphertext);

        let mut body = Vec::with_capacity(TAG_LEN + ciphertext.len());
        body.extend_from_slice(&tag);
        body.extend_from_slice(&ciphertext);
        body
    }

    /// Verifies the tag of a wire body and decrypts it for an explicit
    /// sequence number.
    pub fn open(&self, seq: i32, body: &[u8]) -> Result<Vec<u8>, Error> {
        if body.len() < TAG_LEN {
            return Err(Error::Protocol(format!(
                "KLAP body shorter than its {}-byte tag: {} bytes",
                TAG_LEN,
                body.len()
            )));
        }

        let (tag, ciphertext) = body.split_at(TAG_LEN);
        if tag != self.tag_for(seq, ciphertext) {
            return Err(Error::Protocol("KLAP tag mismatch".into()));
        }

        let iv = self.iv_for(seq);
        Aes128CbcDec::new((&self.key).into(), (&iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::Protocol("PKCS#7 unpadding failed".into()))
    }

    /// Effective IV for a request: the 12-byte prefix plus the big-endian
    /// sequence number.
    fn iv_for(&self, seq: i32) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..12].copy_from_slice(&self.iv_prefix);
        iv[12..].copy_from_slice(&seq.to_be_bytes());
        iv
    }

    fn tag_for(&self, seq: i32, ciphertext: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.sig);
        hasher.update(seq.to_be_bytes());
        hasher.update(ciphertext);
        hasher.finalize().into()
    }
}

// Implement Debug manually to avoid exposing key material
impl fmt::Debug for KlapCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KlapCipher")
            .field("seq", &self.seq)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
