//! Rolling-XOR obfuscation for v1 discovery probes.
//!
//! The v1 discovery scheme obfuscates its JSON payload with an XOR autokey
//! cipher: each plaintext byte is XORed with the previous ciphertext byte,
//! seeded at 0xAB for the first byte. The same construction run in reverse
//! recovers the plaintext, so the scheme is self-inverse with a fresh key.

/// Initial key for the XOR autokey cipher.
const INITIAL_KEY: u8 = 0xab;

/// Obfuscates a discovery payload for UDP broadcast.
pub fn obfuscate(payload: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    let mut result = Vec::with_capacity(payload.len());

    for &byte in payload {
        key ^= byte;
        result.push(key);
    }

    result
}

/// Recovers the plaintext of an obfuscated payload.
pub fn deobfuscate(payload: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    let mut result = Vec::with_capacity(payload.len());

    for &byte in payload {
        result.push(key ^ byte);
        key = byte;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obfuscate_roundtrip() {
        let original = br#"{"system":{"get_sysinfo":{}}}"#;
        let obfuscated = obfuscate(original);
        assert_eq!(deobfuscate(&obfuscated), original);
    }

    #[test]
    fn test_first_byte_uses_seed() {
        let obfuscated = obfuscate(b"x");
        assert_eq!(obfuscated, vec![0xab ^ b'x']);
    }

    #[test]
    fn test_rolling_key_chains_ciphertext() {
        let obfuscated = obfuscate(b"ab");
        let first = 0xab ^ b'a';
        assert_eq!(obfuscated, vec![first, first ^ b'b']);
    }

    #[test]
    fn test_empty_payload() {
        assert!(obfuscate(&[]).is_empty());
        assert!(deobfuscate(&[]).is_empty());
    }
}
