//! Domain-Separated Hashing
//!
//! Provides deterministic SHA-256 hashing for:
//! - Ciphertext handle derivation
//! - Attestation tags and replay digests
//! - Decryption request identifiers
//! - Ledger snapshot integrity

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain for ledger snapshot hashes.
pub const LEDGER_STATE_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_STATE_V1";

/// Domain for ciphertext handle derivation.
pub const HANDLE_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_HANDLE_V1";

/// Domain for input attestations.
pub const ATTESTATION_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_ATTEST_V1";

/// Domain for decryption request identifiers.
pub const REQUEST_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_REQUEST_V1";

/// Domain for decryption callback digests.
pub const CALLBACK_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_CALLBACK_V1";

/// Deterministic hasher for ledger data.
///
/// Wraps SHA-256 with typed update helpers.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for ledger snapshots.
    pub fn for_ledger_state() -> Self {
        Self::new(LEDGER_STATE_DOMAIN)
    }

    /// Create hasher for handle derivation.
    pub fn for_handle() -> Self {
        Self::new(HANDLE_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u64(value.len() as u64);
        self.hasher.update(value.as_bytes());
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i64 value (little-endian).
    #[inline]
    pub fn update_i64(&mut self, value: i64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with an optional u64 (tagged so `None` differs from `Some(0)`).
    #[inline]
    pub fn update_opt_u64(&mut self, value: Option<u64>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u64(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Update with a 16-byte identifier.
    #[inline]
    pub fn update_id16(&mut self, id: &[u8; 16]) {
        self.hasher.update(id);
    }

    /// Update with a 32-byte value.
    #[inline]
    pub fn update_hash(&mut self, value: &[u8; 32]) {
        self.hasher.update(value);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Compare two digests without early exit.
pub fn digest_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Short hex prefix of a digest or id, for log lines.
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_hasher_determinism() {
        let make_hash = || {
            let mut hasher = StateHasher::for_ledger_state();
            hasher.update_u32(100);
            hasher.update_u64(12345);
            hasher.update_str("Real Madrid vs. Barcelona");
            hasher.update_bool(true);
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u64(1);
            h.update_u64(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u64(2);
            h.update_u64(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_domain_separation() {
        let data = [1u8, 2, 3, 4];
        assert_ne!(hash_with_domain(HANDLE_DOMAIN, &data), hash_with_domain(REQUEST_DOMAIN, &data));
    }

    #[test]
    fn test_optional_tagging() {
        let none = {
            let mut h = StateHasher::new(b"opt");
            h.update_opt_u64(None);
            h.finalize()
        };
        let zero = {
            let mut h = StateHasher::new(b"opt");
            h.update_opt_u64(Some(0));
            h.finalize()
        };
        assert_ne!(none, zero);
    }

    #[test]
    fn test_string_length_prefix() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = {
            let mut h = StateHasher::new(b"s");
            h.update_str("ab");
            h.update_str("c");
            h.finalize()
        };
        let b = {
            let mut h = StateHasher::new(b"s");
            h.update_str("a");
            h.update_str("bc");
            h.finalize()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_eq() {
        let a = hash_with_domain(b"test", b"x");
        let mut b = a;
        assert!(digest_eq(&a, &b));
        b[31] ^= 1;
        assert!(!digest_eq(&a, &b));
    }

    #[test]
    fn test_short_hex() {
        assert_eq!(short_hex(&[0xde, 0xad, 0xbe, 0xef, 0x01]), "deadbeef");
        assert_eq!(short_hex(&[0xab]), "ab");
    }
}
