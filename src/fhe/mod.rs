//! Homomorphic Layer
//!
//! Ciphertext handles, coprocessor interfaces, input attestations and an
//! in-process coprocessor for local runs and tests.

pub mod attestation;
pub mod backend;
pub mod handle;
pub mod mock;

pub use attestation::{
    Attestation, AttestationContext, AttestationError, AttestationVerifier,
    KeyedAttestationVerifier, PLACE_BET_OPERATION,
};
pub use backend::{FheError, HomomorphicBackend, ThresholdDecryptor};
pub use handle::{EncryptedInput, Handle};
pub use mock::{MockBackend, MockInputEncryptor};
