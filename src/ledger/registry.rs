//! Match Registry
//!
//! Owns every match and enforces the forward-only lifecycle.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::fhe::Handle;
use crate::ledger::error::LedgerError;
use crate::ledger::state::{AccountId, Match, MatchId, MatchStatus};

/// All matches, keyed by id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MatchRegistry {
    matches: BTreeMap<MatchId, Match>,
    counter: u64,
}

impl MatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of matches ever created; the next id to be issued.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Allocate the next id and insert an open match.
    pub fn create(
        &mut self,
        metadata: String,
        authority: AccountId,
        deadline: Option<i64>,
        created_at: i64,
        zero: Handle,
    ) -> Result<MatchId, LedgerError> {
        let id = self.counter;
        self.counter = id.checked_add(1).ok_or(LedgerError::Overflow("match counter"))?;
        self.matches.insert(id, Match::new(id, metadata, authority, deadline, created_at, zero));
        Ok(id)
    }

    /// Look up a match.
    pub fn get(&self, id: MatchId) -> Option<&Match> {
        self.matches.get(&id)
    }

    /// Look up a match mutably.
    pub fn get_mut(&mut self, id: MatchId) -> Option<&mut Match> {
        self.matches.get_mut(&id)
    }

    /// Look up a match that must be in `expected`.
    pub fn require(&self, id: MatchId, expected: MatchStatus) -> Result<&Match, LedgerError> {
        match self.matches.get(&id) {
            Some(m) if m.status == expected => Ok(m),
            other => Err(LedgerError::InvalidState {
                match_id: id,
                expected,
                actual: other.map(|m| m.status),
            }),
        }
    }

    /// Mutable variant of [`MatchRegistry::require`].
    pub fn require_mut(&mut self, id: MatchId, expected: MatchStatus) -> Result<&mut Match, LedgerError> {
        match self.matches.get_mut(&id) {
            Some(m) if m.status == expected => Ok(m),
            other => Err(LedgerError::InvalidState {
                match_id: id,
                expected,
                actual: other.map(|m| m.status),
            }),
        }
    }

    /// Iterate matches in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.matches.values()
    }

    /// Feed every match into a state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.counter);
        for m in self.matches.values() {
            m.hash_into(hasher);
        }
    }
}

/// Whether `caller` may close or settle `m`.
pub fn has_authority(m: &Match, caller: &AccountId, settlement_authority: Option<&AccountId>) -> bool {
    m.authority == *caller || settlement_authority == Some(caller)
}

/// Move `m` one step forward to `to`.
pub fn advance(m: &mut Match, to: MatchStatus) -> Result<(), LedgerError> {
    if m.status.next() != Some(to) {
        return Err(LedgerError::InvalidState {
            match_id: m.id,
            expected: to,
            actual: Some(m.status),
        });
    }
    m.status = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_match() -> (MatchRegistry, MatchId, AccountId) {
        let mut reg = MatchRegistry::new();
        let owner = AccountId::from_subject("owner");
        let id = reg.create("A vs B".into(), owner, None, 0, Handle::default()).unwrap();
        (reg, id, owner)
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut reg = MatchRegistry::new();
        let owner = AccountId::default();
        assert_eq!(reg.counter(), 0);
        assert_eq!(reg.create("a".into(), owner, None, 0, Handle::default()).unwrap(), 0);
        assert_eq!(reg.create("b".into(), owner, None, 0, Handle::default()).unwrap(), 1);
        assert_eq!(reg.counter(), 2);
        assert_eq!(reg.get(1).unwrap().metadata, "b");
    }

    #[test]
    fn test_require_status() {
        let (reg, id, _) = registry_with_match();
        assert!(reg.require(id, MatchStatus::Open).is_ok());
        assert_eq!(
            reg.require(id, MatchStatus::Closed).unwrap_err(),
            LedgerError::InvalidState { match_id: id, expected: MatchStatus::Closed, actual: Some(MatchStatus::Open) }
        );
        assert_eq!(
            reg.require(99, MatchStatus::Open).unwrap_err(),
            LedgerError::InvalidState { match_id: 99, expected: MatchStatus::Open, actual: None }
        );
    }

    #[test]
    fn test_advance_is_single_step() {
        let (mut reg, id, _) = registry_with_match();
        let m = reg.get_mut(id).unwrap();
        assert!(advance(m, MatchStatus::PendingSettlement).is_err());
        assert!(advance(m, MatchStatus::Closed).is_ok());
        assert!(advance(m, MatchStatus::Closed).is_err());
        assert!(advance(m, MatchStatus::Open).is_err());
        assert!(advance(m, MatchStatus::PendingSettlement).is_ok());
        assert!(advance(m, MatchStatus::Settled).is_ok());
        assert!(advance(m, MatchStatus::Settled).is_err());
    }

    #[test]
    fn test_authority() {
        let (reg, id, owner) = registry_with_match();
        let m = reg.get(id).unwrap();
        let other = AccountId::from_subject("other");
        let settler = AccountId::from_subject("settler");
        assert!(has_authority(m, &owner, None));
        assert!(!has_authority(m, &other, None));
        assert!(has_authority(m, &settler, Some(&settler)));
        assert!(!has_authority(m, &other, Some(&settler)));
    }
}
