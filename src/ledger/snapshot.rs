//! Ledger Snapshots
//!
//! Complete ledger state for persistence and audit, with a SHA-256 hash over
//! the canonical contents. Restoring recomputes the hash and rejects any
//! mismatch.

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::ledger::bets::ConfidentialBetLedger;
use crate::ledger::registry::MatchRegistry;
use crate::ledger::settlement::SettlementEngine;
use crate::ledger::state::Amount;

/// Current snapshot version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Serialized ledger state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Format version
    pub version: u8,
    /// Matches and the id counter
    pub registry: MatchRegistry,
    /// Bets and consumed attestations
    pub bets: ConfidentialBetLedger,
    /// Outstanding decryption requests
    pub settlement: SettlementEngine,
    /// Funds in custody
    pub funds_held: Amount,
    /// Next event sequence number
    pub next_event_seq: u64,
    /// Hash over all of the above
    pub state_hash: StateHash,
}

impl LedgerSnapshot {
    /// Serialize to bytes using bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    /// Deserialize from bytes and check version and hash.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = bincode::deserialize(data)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    /// Check version and recompute the state hash.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                got: self.version,
            });
        }
        let computed = compute_state_hash(
            &self.registry,
            &self.bets,
            &self.settlement,
            self.funds_held,
            self.next_event_seq,
        );
        if computed != self.state_hash {
            return Err(SnapshotError::HashMismatch {
                expected: self.state_hash,
                computed,
            });
        }
        Ok(())
    }
}

/// Hash the canonical ledger contents.
pub fn compute_state_hash(
    registry: &MatchRegistry,
    bets: &ConfidentialBetLedger,
    settlement: &SettlementEngine,
    funds_held: Amount,
    next_event_seq: u64,
) -> StateHash {
    let mut hasher = StateHasher::for_ledger_state();
    registry.hash_into(&mut hasher);
    bets.hash_into(&mut hasher);
    settlement.hash_into(&mut hasher);
    hasher.update_u64(funds_held);
    hasher.update_u64(next_event_seq);
    hasher.finalize()
}

/// Errors that can occur with snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Serialization failed.
    SerializationFailed(String),
    /// Deserialization failed.
    DeserializationFailed(String),
    /// Version mismatch.
    VersionMismatch {
        /// Supported version
        expected: u8,
        /// Version found
        got: u8,
    },
    /// Contents do not hash to the recorded state hash.
    HashMismatch {
        /// Recorded hash
        expected: StateHash,
        /// Recomputed hash
        computed: StateHash,
    },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationFailed(msg) => write!(f, "Serialization failed: {}", msg),
            Self::DeserializationFailed(msg) => write!(f, "Deserialization failed: {}", msg),
            Self::VersionMismatch { expected, got } => {
                write!(f, "Version mismatch: expected {}, got {}", expected, got)
            }
            Self::HashMismatch { expected, computed } => write!(
                f,
                "State hash mismatch: recorded {}, computed {}",
                hex::encode(&expected[..8]),
                hex::encode(&computed[..8])
            ),
        }
    }
}

impl std::error::Error for SnapshotError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::Handle;
    use crate::ledger::state::AccountId;

    fn sample() -> LedgerSnapshot {
        let mut registry = MatchRegistry::new();
        registry.create("A vs B".into(), AccountId::default(), Some(100), 0, Handle::default()).unwrap();
        let mut bets = ConfidentialBetLedger::new();
        bets.record(0, AccountId::default(), Handle::new([1; 32]), 5, false, 1, Some([7; 32]));
        let settlement = SettlementEngine::new();
        let state_hash = compute_state_hash(&registry, &bets, &settlement, 5, 2);
        LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            registry,
            bets,
            settlement,
            funds_held: 5,
            next_event_seq: 2,
            state_hash,
        }
    }

    #[test]
    fn test_snapshot_bytes_roundtrip() {
        let snapshot = sample();
        let bytes = snapshot.to_bytes().unwrap();
        let decoded = LedgerSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.state_hash, snapshot.state_hash);
        assert_eq!(decoded.registry.counter(), 1);
        assert!(decoded.bets.is_consumed(&[7; 32]));
    }

    #[test]
    fn test_tampered_snapshot_rejected() {
        let mut snapshot = sample();
        snapshot.funds_held += 1;
        assert!(matches!(snapshot.verify(), Err(SnapshotError::HashMismatch { .. })));
    }

    #[test]
    fn test_version_mismatch() {
        let mut snapshot = sample();
        snapshot.version = 99;
        assert_eq!(
            snapshot.verify(),
            Err(SnapshotError::VersionMismatch { expected: SNAPSHOT_VERSION, got: 99 })
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            LedgerSnapshot::from_bytes(&[1, 2, 3]),
            Err(SnapshotError::DeserializationFailed(_))
        ));
    }
}
