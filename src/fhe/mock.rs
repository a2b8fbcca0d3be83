//! In-Process Coprocessor
//!
//! A stand-in for a real FHE coprocessor. Plaintexts live in a table keyed by
//! handle; handles are derived from the operation and its operands plus a
//! counter, never from the plaintext, so handles reveal nothing.
//!
//! Released intermediates are dropped, but every input and every superseded
//! per-outcome sum stays in the table so older snapshots remain decryptable.
//! The table therefore grows with the number of bets: sandbox use only.
//!
//! ```text
//! ┌──────────────┐ register_input ┌──────────────┐ add/mul/eq ┌──────────┐
//! │ InputEncrypt │ ─────────────► │ MockBackend  │ ◄───────── │  Ledger  │
//! └──────────────┘                │ handle→value │            └──────────┘
//!                                 └──────┬───────┘
//!                                        │ decrypt
//!                                 ┌──────▼───────┐
//!                                 │    Oracle    │
//!                                 └──────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::hash::StateHasher;
use crate::fhe::attestation::{KeyedAttestationVerifier, PLACE_BET_OPERATION};
use crate::fhe::backend::{FheError, HomomorphicBackend, ThresholdDecryptor};
use crate::fhe::{EncryptedInput, Handle};
use crate::ledger::state::{AccountId, Outcome};

#[derive(Default)]
struct MockTable {
    values: BTreeMap<Handle, u64>,
    counter: u64,
}

/// Plaintext-table coprocessor implementing both backend traits.
#[derive(Default)]
pub struct MockBackend {
    table: Mutex<MockTable>,
}

impl MockBackend {
    /// Create an empty coprocessor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ciphertexts held.
    pub fn len(&self) -> usize {
        self.lock().map(|t| t.values.len()).unwrap_or(0)
    }

    /// Whether no ciphertexts are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a client-encrypted value and return its handle.
    pub fn register_input(&self, value: u64) -> Result<Handle, FheError> {
        self.store("input", &[], value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockTable>, FheError> {
        self.table
            .lock()
            .map_err(|_| FheError::Coprocessor("ciphertext table poisoned".into()))
    }

    fn store(&self, op: &str, operands: &[&Handle], value: u64) -> Result<Handle, FheError> {
        let mut table = self.lock()?;
        table.counter += 1;

        let mut hasher = StateHasher::for_handle();
        hasher.update_str(op);
        for operand in operands {
            hasher.update_hash(operand.as_bytes());
        }
        hasher.update_u64(table.counter);
        let handle = Handle::new(hasher.finalize());

        table.values.insert(handle, value);
        Ok(handle)
    }

    fn read(&self, handle: &Handle) -> Result<u64, FheError> {
        self.lock()?
            .values
            .get(handle)
            .copied()
            .ok_or(FheError::UnknownHandle(*handle))
    }
}

impl HomomorphicBackend for MockBackend {
    fn trivial_encrypt(&self, value: u64) -> Result<Handle, FheError> {
        self.store("trivial", &[], value)
    }

    fn add(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError> {
        let value = self.read(lhs)?.wrapping_add(self.read(rhs)?);
        self.store("add", &[lhs, rhs], value)
    }

    fn mul_plain(&self, lhs: &Handle, rhs: u64) -> Result<Handle, FheError> {
        let value = self.read(lhs)?.wrapping_mul(rhs);
        self.store("mul", &[lhs], value)
    }

    fn eq_plain(&self, lhs: &Handle, rhs: u64) -> Result<Handle, FheError> {
        let value = (self.read(lhs)? == rhs) as u64;
        self.store("eq", &[lhs], value)
    }

    fn release(&self, handle: &Handle) -> Result<(), FheError> {
        self.lock()?.values.remove(handle);
        Ok(())
    }
}

impl ThresholdDecryptor for MockBackend {
    fn decrypt(&self, handle: &Handle) -> Result<u64, FheError> {
        self.read(handle)
    }
}

// =============================================================================
// INPUT ENCRYPTOR
// =============================================================================

/// Client-side helper: encrypts a value and obtains its attestation.
#[derive(Clone)]
pub struct MockInputEncryptor {
    backend: Arc<MockBackend>,
    attester: KeyedAttestationVerifier,
    ledger_id: [u8; 32],
}

impl MockInputEncryptor {
    /// Create an encryptor for one ledger instance.
    pub fn new(backend: Arc<MockBackend>, attester: KeyedAttestationVerifier, ledger_id: [u8; 32]) -> Self {
        Self { backend, attester, ledger_id }
    }

    /// Encrypt an arbitrary value with an explicit certified bound.
    ///
    /// Refuses values above `max_value`: the attestation must never vouch
    /// for a plaintext outside the range it names.
    pub fn encrypt(
        &self,
        value: u64,
        submitter: AccountId,
        operation: &str,
        max_value: u64,
    ) -> Result<EncryptedInput, FheError> {
        if value > max_value {
            return Err(FheError::OutOfRange { value, max_value });
        }
        let handle = self.backend.register_input(value)?;
        let nonce = *uuid::Uuid::new_v4().as_bytes();
        let attestation = self.attester.attest(&handle, self.ledger_id, submitter, operation, max_value, nonce);
        Ok(EncryptedInput { handle, attestation })
    }

    /// Encrypt an outcome choice for a bet by `submitter`.
    pub fn encrypt_choice(&self, outcome: Outcome, submitter: AccountId) -> Result<EncryptedInput, FheError> {
        self.encrypt(outcome as u64, submitter, PLACE_BET_OPERATION, Outcome::MAX_INDEX)
    }
}
