//! Coprocessor Interfaces
//!
//! The ledger depends on two capabilities, never on a concrete scheme:
//!
//! ```text
//! ┌─────────────────────┐  trivial_encrypt / add / mul_plain / eq_plain
//! │ HomomorphicBackend  │  (handles in, handles out, no plaintext)
//! └─────────────────────┘
//! ┌─────────────────────┐  decrypt
//! │ ThresholdDecryptor  │  (held by the oracle only)
//! └─────────────────────┘
//! ```
//!
//! Arithmetic is modular over the ciphertext plaintext space (u64).

use thiserror::Error;

use crate::fhe::Handle;

/// Errors surfaced by a coprocessor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FheError {
    /// The handle does not reference a ciphertext this coprocessor knows.
    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(Handle),

    /// The coprocessor failed to evaluate the operation.
    #[error("coprocessor failure: {0}")]
    Coprocessor(String),

    /// The plaintext exceeds the bound the input proof would certify.
    #[error("input {value} exceeds certified bound {max_value}")]
    OutOfRange {
        /// Submitted plaintext.
        value: u64,
        /// Requested bound.
        max_value: u64,
    },
}

/// Homomorphic evaluation over encrypted u64 values.
pub trait HomomorphicBackend: Send + Sync {
    /// Encrypt a public constant.
    fn trivial_encrypt(&self, value: u64) -> Result<Handle, FheError>;

    /// `lhs + rhs` (wrapping).
    fn add(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError>;

    /// `lhs * rhs` for a plaintext `rhs` (wrapping).
    fn mul_plain(&self, lhs: &Handle, rhs: u64) -> Result<Handle, FheError>;

    /// Encrypted `1` when `lhs == rhs`, else encrypted `0`.
    fn eq_plain(&self, lhs: &Handle, rhs: u64) -> Result<Handle, FheError>;

    /// Free a ciphertext nothing will read again. Unknown handles are ignored.
    fn release(&self, _handle: &Handle) -> Result<(), FheError> {
        Ok(())
    }
}

/// Access to plaintexts. Only the decryption oracle holds one.
pub trait ThresholdDecryptor: Send + Sync {
    /// Decrypt a single handle.
    fn decrypt(&self, handle: &Handle) -> Result<u64, FheError>;

    /// Decrypt several handles; all-or-nothing.
    fn decrypt_many(&self, handles: &[Handle]) -> Result<Vec<u64>, FheError> {
        handles.iter().map(|h| self.decrypt(h)).collect()
    }
}
