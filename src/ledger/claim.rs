//! Claim Processing
//!
//! A claim pays a bettor everything owed on one settled match in a single
//! transfer. Bets are marked claimed only after the transfer succeeds, and
//! a claimed bet never pays again.

use thiserror::Error;

use crate::fhe::{FheError, Handle};
use crate::ledger::bets::ConfidentialBetLedger;
use crate::ledger::error::LedgerError;
use crate::ledger::settlement::PayoutRule;
use crate::ledger::state::{AccountId, Amount, Match, MatchId, MatchStatus, Outcome};

/// Why a choice could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Decryption failed.
    #[error(transparent)]
    Decryption(#[from] FheError),

    /// Plaintext is not a valid outcome index.
    #[error("decrypted choice {0} is outside the outcome domain")]
    OutOfDomain(u64),

    /// Resolver refuses to reveal this handle.
    #[error("resolution not permitted: {0}")]
    NotPermitted(String),
}

/// Reveals a bet's chosen outcome after settlement.
///
/// Only consulted for bets on settled matches.
pub trait ChoiceResolver: Send + Sync {
    /// Outcome behind `choice` for a bet on `match_id`.
    fn resolve_choice(&self, match_id: MatchId, choice: &Handle) -> Result<Outcome, ResolveError>;
}

/// What a claim will pay and which bets it settles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimPlan {
    /// Match
    pub match_id: MatchId,
    /// Claimant
    pub bettor: AccountId,
    /// Unclaimed bets covered by this claim
    pub bet_indices: Vec<u32>,
    /// Total payout (may be zero)
    pub amount: Amount,
    /// How many of the covered bets backed the result
    pub winning_bets: u32,
}

/// Computes claims against a settled match.
pub struct ClaimProcessor;

impl ClaimProcessor {
    /// Plan `bettor`'s claim on `m` without changing anything.
    pub fn plan(
        m: &Match,
        bets: &ConfidentialBetLedger,
        bettor: &AccountId,
        resolver: &dyn ChoiceResolver,
    ) -> Result<ClaimPlan, LedgerError> {
        if m.status != MatchStatus::Settled {
            return Err(LedgerError::InvalidState {
                match_id: m.id,
                expected: MatchStatus::Settled,
                actual: Some(m.status),
            });
        }
        let rule = PayoutRule::for_match(m).ok_or(LedgerError::InvalidState {
            match_id: m.id,
            expected: MatchStatus::Settled,
            actual: Some(m.status),
        })?;
        // A settled match always carries its result
        let result = m.result.ok_or(LedgerError::InvalidState {
            match_id: m.id,
            expected: MatchStatus::Settled,
            actual: Some(m.status),
        })?;

        let mut any = false;
        let mut plan = ClaimPlan {
            match_id: m.id,
            bettor: *bettor,
            bet_indices: Vec::new(),
            amount: 0,
            winning_bets: 0,
        };

        for bet in bets.bets_of(m.id, bettor) {
            any = true;
            if bet.claimed {
                continue;
            }

            let won = match rule {
                PayoutRule::Refund => false,
                PayoutRule::PariMutuel(_) => {
                    let choice = resolver
                        .resolve_choice(m.id, &bet.choice)
                        .map_err(|e| LedgerError::ChoiceUnresolved { match_id: m.id, reason: e.to_string() })?;
                    choice == result
                }
            };

            let owed = rule.amount_for(bet.stake, won).ok_or(LedgerError::Overflow("payout"))?;
            plan.amount = plan.amount.checked_add(owed).ok_or(LedgerError::Overflow("payout"))?;
            plan.winning_bets += won as u32;
            plan.bet_indices.push(bet.index);
        }

        if !any {
            return Err(LedgerError::NoSuchBet { match_id: m.id });
        }
        if plan.bet_indices.is_empty() {
            return Err(LedgerError::AlreadyClaimed { match_id: m.id });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Resolver backed by a fixed handle → outcome table.
    struct TableResolver(BTreeMap<Handle, Outcome>);

    impl ChoiceResolver for TableResolver {
        fn resolve_choice(&self, _match_id: MatchId, choice: &Handle) -> Result<Outcome, ResolveError> {
            self.0.get(choice).copied().ok_or(ResolveError::Decryption(FheError::UnknownHandle(*choice)))
        }
    }

    fn h(n: u8) -> Handle {
        Handle::new([n; 32])
    }

    fn settled(pool: Amount, result: Outcome, totals: [Amount; 3]) -> Match {
        let mut m = Match::new(1, "A vs B".into(), AccountId::default(), None, 0, Handle::default());
        m.status = MatchStatus::Settled;
        m.total_pool = pool;
        m.result = Some(result);
        m.totals = Some(totals);
        m
    }

    fn setup() -> (ConfidentialBetLedger, TableResolver, AccountId, AccountId) {
        let alice = AccountId::from_subject("alice");
        let bob = AccountId::from_subject("bob");
        let mut bets = ConfidentialBetLedger::new();
        bets.record(1, alice, h(1), 3, false, 0, None);
        bets.record(1, bob, h(2), 1, false, 0, None);
        bets.record(1, alice, h(3), 2, false, 0, None);
        let resolver = TableResolver(BTreeMap::from([
            (h(1), Outcome::Home),
            (h(2), Outcome::Draw),
            (h(3), Outcome::Away),
        ]));
        (bets, resolver, alice, bob)
    }

    #[test]
    fn test_plan_mixed_bets() {
        let (bets, resolver, alice, bob) = setup();
        let m = settled(6, Outcome::Home, [3, 1, 2]);

        let plan = ClaimProcessor::plan(&m, &bets, &alice, &resolver).unwrap();
        assert_eq!(plan.amount, 6);
        assert_eq!(plan.bet_indices, vec![0, 2]);
        assert_eq!(plan.winning_bets, 1);

        let plan = ClaimProcessor::plan(&m, &bets, &bob, &resolver).unwrap();
        assert_eq!(plan.amount, 0);
        assert_eq!(plan.bet_indices, vec![1]);
    }

    #[test]
    fn test_plan_refund_skips_resolver() {
        let (bets, _, alice, _) = setup();
        let m = settled(6, Outcome::Draw, [6, 0, 0]);
        let empty = TableResolver(BTreeMap::new());
        let plan = ClaimProcessor::plan(&m, &bets, &alice, &empty).unwrap();
        assert_eq!(plan.amount, 5);
    }

    #[test]
    fn test_plan_errors() {
        let (mut bets, resolver, alice, _) = setup();
        let m = settled(6, Outcome::Home, [3, 1, 2]);
        let stranger = AccountId::from_subject("carol");

        assert_eq!(
            ClaimProcessor::plan(&m, &bets, &stranger, &resolver),
            Err(LedgerError::NoSuchBet { match_id: 1 })
        );

        bets.mark_claimed(1, &[0, 2]);
        assert_eq!(
            ClaimProcessor::plan(&m, &bets, &alice, &resolver),
            Err(LedgerError::AlreadyClaimed { match_id: 1 })
        );

        let mut open = m.clone();
        open.status = MatchStatus::Closed;
        assert!(matches!(
            ClaimProcessor::plan(&open, &bets, &alice, &resolver),
            Err(LedgerError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_plan_resolver_failure() {
        let (bets, _, alice, _) = setup();
        let m = settled(6, Outcome::Home, [3, 1, 2]);
        let empty = TableResolver(BTreeMap::new());
        assert!(matches!(
            ClaimProcessor::plan(&m, &bets, &alice, &empty),
            Err(LedgerError::ChoiceUnresolved { match_id: 1, .. })
        ));
    }
}
