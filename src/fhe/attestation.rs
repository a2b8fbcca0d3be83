//! Input Attestations
//!
//! Every client ciphertext arrives with an attestation binding it to:
//! - the ledger instance it was produced for
//! - the submitting account
//! - the operation it is meant for
//! - a certified plaintext domain `[0, max_value]`
//!
//! The ledger rejects any input whose binding differs from the call it
//! arrives with, and records a replay digest so one attestation can back
//! at most one bet.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::bytes::hex_bytes;
use crate::core::hash::{digest_eq, hash_with_domain, StateHash, StateHasher, ATTESTATION_DOMAIN};
use crate::fhe::Handle;
use crate::ledger::state::AccountId;

/// Operation tag for bet placement inputs.
pub const PLACE_BET_OPERATION: &str = "place_bet";

/// Domain for replay digests (distinct from the tag domain).
const REPLAY_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_REPLAY_V1";

/// Validity proof for an encrypted input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Ledger instance the input was produced for
    #[serde(with = "hex_bytes")]
    pub ledger_id: [u8; 32],

    /// Account allowed to submit it
    pub submitter: AccountId,

    /// Operation it may be used with
    pub operation: String,

    /// Inclusive upper bound certified for the plaintext
    pub max_value: u64,

    /// Client nonce; makes every attestation unique
    #[serde(with = "hex_bytes")]
    pub nonce: [u8; 16],

    /// Coprocessor tag over all of the above and the handle
    #[serde(with = "hex_bytes")]
    pub tag: [u8; 32],
}

/// What the ledger expects an attestation to bind to.
#[derive(Clone, Copy, Debug)]
pub struct AttestationContext<'a> {
    /// This ledger's id
    pub ledger_id: &'a [u8; 32],
    /// The caller submitting the input
    pub submitter: AccountId,
    /// The operation being invoked
    pub operation: &'a str,
    /// Largest plaintext the operation accepts
    pub max_value: u64,
}

/// Why an attestation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    /// Produced for another ledger instance.
    #[error("attestation is bound to a different ledger")]
    WrongLedger,

    /// Produced for another account.
    #[error("attestation is bound to a different submitter")]
    WrongSubmitter,

    /// Produced for another operation.
    #[error("attestation is bound to operation {got:?}, expected {expected:?}")]
    WrongOperation {
        /// Operation the ledger invoked
        expected: String,
        /// Operation in the attestation
        got: String,
    },

    /// Certified domain is wider than the operation accepts.
    #[error("certified domain [0, {certified}] exceeds [0, {allowed}]")]
    DomainTooWide {
        /// Bound in the attestation
        certified: u64,
        /// Bound the operation requires
        allowed: u64,
    },

    /// Tag does not verify under the coprocessor key.
    #[error("attestation tag does not verify")]
    BadTag,

    /// Already backed an accepted call.
    #[error("attestation was already consumed")]
    Replayed,
}

/// Checks attestations on behalf of the ledger.
pub trait AttestationVerifier: Send + Sync {
    /// Verify the attestation over `handle` against `ctx`, returning its replay digest.
    fn verify(
        &self,
        handle: &Handle,
        attestation: &Attestation,
        ctx: &AttestationContext<'_>,
    ) -> Result<StateHash, AttestationError>;
}

/// Replay digest of an attestation over a handle.
pub fn replay_digest(handle: &Handle, attestation: &Attestation) -> StateHash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(handle.as_bytes());
    data.extend_from_slice(&attestation.tag);
    hash_with_domain(REPLAY_DOMAIN, &data)
}

// =============================================================================
// KEYED VERIFIER
// =============================================================================

/// Attestation scheme keyed by a secret shared with the coprocessor.
///
/// The same key issues tags (coprocessor side) and checks them (ledger side).
#[derive(Clone)]
pub struct KeyedAttestationVerifier {
    key: [u8; 32],
}

impl KeyedAttestationVerifier {
    /// Create from a raw key.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the key from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(hash_with_domain(ATTESTATION_DOMAIN, passphrase.as_bytes()))
    }

    /// Issue an attestation for `handle`.
    pub fn attest(
        &self,
        handle: &Handle,
        ledger_id: [u8; 32],
        submitter: AccountId,
        operation: &str,
        max_value: u64,
        nonce: [u8; 16],
    ) -> Attestation {
        let mut attestation = Attestation {
            ledger_id,
            submitter,
            operation: operation.to_string(),
            max_value,
            nonce,
            tag: [0u8; 32],
        };
        attestation.tag = self.tag(handle, &attestation);
        attestation
    }

    fn tag(&self, handle: &Handle, a: &Attestation) -> [u8; 32] {
        let mut hasher = StateHasher::new(ATTESTATION_DOMAIN);
        hasher.update_hash(&self.key);
        hasher.update_hash(handle.as_bytes());
        hasher.update_hash(&a.ledger_id);
        hasher.update_id16(a.submitter.as_bytes());
        hasher.update_str(&a.operation);
        hasher.update_u64(a.max_value);
        hasher.update_id16(&a.nonce);
        hasher.finalize()
    }
}

impl std::fmt::Debug for KeyedAttestationVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedAttestationVerifier").finish_non_exhaustive()
    }
}

impl AttestationVerifier for KeyedAttestationVerifier {
    fn verify(
        &self,
        handle: &Handle,
        attestation: &Attestation,
        ctx: &AttestationContext<'_>,
    ) -> Result<StateHash, AttestationError> {
        if attestation.operation != ctx.operation {
            return Err(AttestationError::WrongOperation {
                expected: ctx.operation.to_string(),
                got: attestation.operation.clone(),
            });
        }
        if !digest_eq(&attestation.ledger_id, ctx.ledger_id) {
            return Err(AttestationError::WrongLedger);
        }
        if attestation.submitter != ctx.submitter {
            return Err(AttestationError::WrongSubmitter);
        }
        if attestation.max_value > ctx.max_value {
            return Err(AttestationError::DomainTooWide {
                certified: attestation.max_value,
                allowed: ctx.max_value,
            });
        }
        if !digest_eq(&self.tag(handle, attestation), &attestation.tag) {
            return Err(AttestationError::BadTag);
        }
        Ok(replay_digest(handle, attestation))
    }
}
