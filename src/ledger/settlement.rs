//! Settlement Protocol
//!
//! Settlement is split across two calls so the ledger never blocks on
//! decryption:
//!
//! ```text
//!  settle_match(result)                         on_decryption_callback(cb)
//!  ┌────────────────────────┐                   ┌────────────────────────────┐
//!  │ issue request_id       │   DecryptionReq   │ authenticate cb            │
//!  │ pending[id] = match    │ ────────────────► │ pending.remove(id) (once)  │
//!  │ Closed → Pending       │      oracle       │ Σ totals == pool ?         │
//!  └────────────────────────┘ ◄──────────────── │ Pending → Settled          │
//!                               DecryptionCb    └────────────────────────────┘
//! ```
//!
//! Payouts are pari-mutuel: `stake * pool / winning_total`, floored. When
//! nobody backed the result every stake is refunded.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::bytes::{decode_hex_array, impl_hex_serde};
use crate::core::fixed::{fixed_from_ratio, mul_div_floor, FixedNum};
use crate::core::hash::{short_hex, StateHash, StateHasher, CALLBACK_DOMAIN, REQUEST_DOMAIN};
use crate::fhe::Handle;
use crate::ledger::error::LedgerError;
use crate::ledger::state::{Amount, Match, MatchId};

// =============================================================================
// REQUEST / CALLBACK
// =============================================================================

/// Correlation id of a decryption request. Unguessable and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestId(pub [u8; 32]);

impl_hex_serde!(RequestId, 32);

impl RequestId {
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

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", short_hex(&self.0))
    }
}

/// Ask the oracle to decrypt a match's three totals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionRequest {
    /// Correlation id
    pub request_id: RequestId,
    /// Match being settled
    pub match_id: MatchId,
    /// Per-outcome total handles, in outcome order
    pub handles: [Handle; 3],
}

/// Oracle answer to a [`DecryptionRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionCallback {
    /// Correlation id
    pub request_id: RequestId,
    /// Match being settled
    pub match_id: MatchId,
    /// Decrypted totals, in outcome order
    pub cleartexts: [u64; 3],
    /// Oracle signature over the three fields above
    pub signature: String,
}

/// Digest binding a callback's request id, match and cleartexts.
pub fn callback_digest(request_id: &RequestId, match_id: MatchId, cleartexts: &[u64; 3]) -> StateHash {
    let mut hasher = StateHasher::new(CALLBACK_DOMAIN);
    hasher.update_hash(request_id.as_bytes());
    hasher.update_u64(match_id);
    for value in cleartexts {
        hasher.update_u64(*value);
    }
    hasher.finalize()
}

/// Why a callback failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackAuthError {
    /// Signature is malformed or does not verify.
    #[error("invalid oracle signature: {0}")]
    InvalidSignature(String),

    /// Signature is valid but expired.
    #[error("oracle signature expired")]
    Expired,

    /// Signature does not cover this callback's contents.
    #[error("oracle signature does not cover this callback")]
    Mismatch,

    /// No oracle key configured.
    #[error("oracle authentication not configured")]
    NotConfigured,
}

/// Authenticates callbacks as coming from the decryption oracle.
pub trait CallbackAuthenticator: Send + Sync {
    /// Accept or reject `callback`.
    fn authenticate(&self, callback: &DecryptionCallback) -> Result<(), CallbackAuthError>;
}

// =============================================================================
// ENGINE
// =============================================================================

/// Outstanding-request bookkeeping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SettlementEngine {
    pending: BTreeMap<RequestId, MatchId>,
    issued: u64,
}

impl SettlementEngine {
    /// Create an engine with no outstanding requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a request for `m`'s totals.
    ///
    /// `entropy` must be fresh per call; the id also commits to a
    /// monotonically increasing counter so ids never repeat.
    pub fn issue(&mut self, m: &Match, entropy: [u8; 16]) -> DecryptionRequest {
        self.issued += 1;

        let mut hasher = StateHasher::new(REQUEST_DOMAIN);
        hasher.update_u64(m.id);
        hasher.update_u64(self.issued);
        hasher.update_id16(&entropy);
        let request_id = RequestId(hasher.finalize());

        self.pending.insert(request_id, m.id);
        DecryptionRequest {
            request_id,
            match_id: m.id,
            handles: m.sums,
        }
    }

    /// Match an outstanding request belongs to.
    pub fn pending_match(&self, request_id: &RequestId) -> Option<MatchId> {
        self.pending.get(request_id).copied()
    }

    /// Consume an outstanding request. Returns `None` if unknown or already consumed.
    pub fn consume(&mut self, request_id: &RequestId) -> Option<MatchId> {
        self.pending.remove(request_id)
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total requests ever issued.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Feed outstanding requests into a state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.issued);
        hasher.update_u64(self.pending.len() as u64);
        for (request_id, match_id) in &self.pending {
            hasher.update_hash(request_id.as_bytes());
            hasher.update_u64(*match_id);
        }
    }
}

/// Check that revealed totals sum exactly to the public pool.
pub fn reconcile(m: &Match, cleartexts: &[u64; 3]) -> Result<(), LedgerError> {
    let revealed: u128 = cleartexts.iter().map(|v| *v as u128).sum();
    if revealed != m.total_pool as u128 {
        return Err(LedgerError::AccountingInvariantViolated {
            match_id: m.id,
            revealed,
            pool: m.total_pool,
        });
    }
    Ok(())
}

// =============================================================================
// PAYOUTS
// =============================================================================

/// Pari-mutuel ratio `pool / winning_total`, kept as a rational.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayoutRatio {
    pool: Amount,
    winning_total: Amount,
}

impl PayoutRatio {
    /// `None` when `winning_total` is zero.
    pub fn new(pool: Amount, winning_total: Amount) -> Option<Self> {
        (winning_total > 0).then_some(Self { pool, winning_total })
    }

    /// Payout for a winning stake, floored.
    pub fn payout(&self, stake: Amount) -> Option<Amount> {
        mul_div_floor(stake, self.pool, self.winning_total)
    }

    /// Ratio as fixed-point (display only).
    pub fn as_fixed(&self) -> FixedNum {
        FixedNum::from_raw(fixed_from_ratio(self.pool, self.winning_total).unwrap_or(0))
    }
}

/// How a settled match pays out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayoutRule {
    /// Winners share the pool pro rata.
    PariMutuel(PayoutRatio),
    /// Nobody backed the result; every stake is returned.
    Refund,
}

impl PayoutRule {
    /// Rule for a settled match. `None` if not yet settled.
    pub fn for_match(m: &Match) -> Option<Self> {
        let winning_total = m.winning_total()?;
        Some(match PayoutRatio::new(m.total_pool, winning_total) {
            Some(ratio) => PayoutRule::PariMutuel(ratio),
            None => PayoutRule::Refund,
        })
    }

    /// Amount owed on one bet, given whether it backed the result.
    pub fn amount_for(&self, stake: Amount, won: bool) -> Option<Amount> {
        match self {
            PayoutRule::PariMutuel(ratio) if won => ratio.payout(stake),
            PayoutRule::PariMutuel(_) => Some(0),
            PayoutRule::Refund => Some(stake),
        }
    }
}
