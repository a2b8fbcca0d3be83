//! Ciphertext Handles
//!
//! A handle is an opaque reference to a ciphertext held by the coprocessor.
//! The ledger stores, compares and hashes handles but never learns the
//! plaintext behind one.

use std::fmt;

use crate::core::bytes::{decode_hex_array, impl_hex_serde};
use crate::core::hash::short_hex;
use crate::fhe::attestation::Attestation;

/// Opaque reference to an encrypted value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(pub [u8; 32]);

impl_hex_serde!(Handle, 32);

impl Handle {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        decode_hex_array::<32>(s).map(Self)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ct:{}", short_hex(&self.0))
    }
}

/// Client-encrypted value together with its validity attestation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncryptedInput {
    /// Ciphertext handle registered with the coprocessor
    pub handle: Handle,

    /// Proof that `handle` encrypts a value in the certified domain
    pub attestation: Attestation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_hex() {
        let h = Handle::new([7u8; 32]);
        assert_eq!(Handle::from_hex(&h.to_hex()), Some(h));
        assert_eq!(Handle::from_hex("07"), None);
        assert_eq!(h.to_string(), "ct:07070707");
    }

    #[test]
    fn test_handle_serde_formats() {
        let h = Handle::new([0x11; 32]);

        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json.len(), 64 + 2);
        assert_eq!(serde_json::from_str::<Handle>(&json).unwrap(), h);

        let bytes = bincode::serialize(&h).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bincode::deserialize::<Handle>(&bytes).unwrap(), h);
    }
}
