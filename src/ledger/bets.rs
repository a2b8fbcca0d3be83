//! Confidential Bet Ledger
//!
//! Stores bets and folds each stake into the per-outcome encrypted sums.
//!
//! The accumulation never branches on the chosen outcome:
//!
//! ```text
//! for o in {Home, Draw, Away}:
//!     sum[o] ← sum[o] + stake · [choice == o]
//! ```
//!
//! Every bet touches all three sums with the same sequence of operations, so
//! nothing observable (handles produced, operations issued) depends on the
//! choice.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::fhe::{FheError, Handle, HomomorphicBackend};
use crate::ledger::state::{AccountId, Amount, Bet, MatchId, Outcome};

/// Bets per match plus consumed attestation digests.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfidentialBetLedger {
    bets: BTreeMap<MatchId, Vec<Bet>>,
    consumed: BTreeSet<StateHash>,
}

impl ConfidentialBetLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// All bets on a match, in placement order.
    pub fn bets_for(&self, match_id: MatchId) -> &[Bet] {
        self.bets.get(&match_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bets placed by `bettor` on a match.
    pub fn bets_of(&self, match_id: MatchId, bettor: &AccountId) -> impl Iterator<Item = &Bet> + '_ {
        let bettor = *bettor;
        self.bets_for(match_id).iter().filter(move |b| b.bettor == bettor)
    }

    /// Whether an attestation digest already backed a bet.
    pub fn is_consumed(&self, digest: &StateHash) -> bool {
        self.consumed.contains(digest)
    }

    /// Append a bet and consume its attestation digest. Returns the bet index.
    pub fn record(
        &mut self,
        match_id: MatchId,
        bettor: AccountId,
        choice: Handle,
        stake: Amount,
        demo: bool,
        placed_at: i64,
        digest: Option<StateHash>,
    ) -> u32 {
        let list = self.bets.entry(match_id).or_default();
        let index = list.len() as u32;
        list.push(Bet {
            match_id,
            index,
            bettor,
            choice,
            stake,
            claimed: false,
            demo,
            placed_at,
        });
        if let Some(digest) = digest {
            self.consumed.insert(digest);
        }
        index
    }

    /// Flip `claimed` on the given bets. Claimed bets never flip back.
    pub fn mark_claimed(&mut self, match_id: MatchId, indices: &[u32]) {
        if let Some(list) = self.bets.get_mut(&match_id) {
            for &i in indices {
                if let Some(bet) = list.get_mut(i as usize) {
                    bet.claimed = true;
                }
            }
        }
    }

    /// Feed every bet and consumed digest into a state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        for (match_id, list) in &self.bets {
            hasher.update_u64(*match_id);
            hasher.update_u64(list.len() as u64);
            for bet in list {
                bet.hash_into(hasher);
            }
        }
        hasher.update_u64(self.consumed.len() as u64);
        for digest in &self.consumed {
            hasher.update_hash(digest);
        }
    }
}

/// Add `stake` to the sum selected by an encrypted `choice`.
///
/// Issues the same operations for every choice value. Intermediates are
/// released; only the three new sums survive.
pub fn accumulate_confidential(
    fhe: &dyn HomomorphicBackend,
    sums: &[Handle; 3],
    choice: &Handle,
    stake: Amount,
) -> Result<[Handle; 3], FheError> {
    let mut next = *sums;
    for outcome in Outcome::ALL {
        let selected = fhe.eq_plain(choice, outcome as u64)?;
        let contribution = fhe.mul_plain(&selected, stake)?;
        next[outcome.index()] = fhe.add(&sums[outcome.index()], &contribution)?;
        fhe.release(&selected)?;
        fhe.release(&contribution)?;
    }
    Ok(next)
}

/// Add `stake` to the sum of a plaintext `choice`.
///
/// Demo path only: still rewrites all three sums so the handle pattern
/// matches the confidential path.
pub fn accumulate_plain(
    fhe: &dyn HomomorphicBackend,
    sums: &[Handle; 3],
    choice: Outcome,
    stake: Amount,
) -> Result<[Handle; 3], FheError> {
    let mut next = *sums;
    for outcome in Outcome::ALL {
        let amount = if outcome == choice { stake } else { 0 };
        let contribution = fhe.trivial_encrypt(amount)?;
        next[outcome.index()] = fhe.add(&sums[outcome.index()], &contribution)?;
        fhe.release(&contribution)?;
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::{MockBackend, ThresholdDecryptor};
    use proptest::prelude::*;

    fn zero_sums(fhe: &MockBackend) -> [Handle; 3] {
        let zero = fhe.trivial_encrypt(0).unwrap();
        [zero; 3]
    }

    fn reveal(fhe: &MockBackend, sums: &[Handle; 3]) -> [u64; 3] {
        [
            fhe.decrypt(&sums[0]).unwrap(),
            fhe.decrypt(&sums[1]).unwrap(),
            fhe.decrypt(&sums[2]).unwrap(),
        ]
    }

    #[test]
    fn test_accumulate_confidential() {
        let fhe = MockBackend::new();
        let mut sums = zero_sums(&fhe);

        for (choice, stake) in [(0u64, 3), (1, 1), (2, 2), (0, 5)] {
            let c = fhe.register_input(choice).unwrap();
            sums = accumulate_confidential(&fhe, &sums, &c, stake).unwrap();
        }
        assert_eq!(reveal(&fhe, &sums), [8, 1, 2]);
    }

    #[test]
    fn test_accumulate_rewrites_every_sum() {
        let fhe = MockBackend::new();
        let sums = zero_sums(&fhe);
        let c = fhe.register_input(1).unwrap();
        let next = accumulate_confidential(&fhe, &sums, &c, 7).unwrap();
        for i in 0..3 {
            assert_ne!(next[i], sums[i]);
        }
    }

    #[test]
    fn test_accumulate_same_op_count_for_each_choice() {
        let counts: Vec<usize> = (0..3u64)
            .map(|choice| {
                let fhe = MockBackend::new();
                let sums = zero_sums(&fhe);
                let c = fhe.register_input(choice).unwrap();
                let before = fhe.len();
                accumulate_confidential(&fhe, &sums, &c, 10).unwrap();
                fhe.len() - before
            })
            .collect();
        // Three new sums per bet, whatever the choice
        assert_eq!(counts, vec![3, 3, 3]);
    }

    #[test]
    fn test_accumulate_plain() {
        let fhe = MockBackend::new();
        let sums = zero_sums(&fhe);
        let next = accumulate_plain(&fhe, &sums, Outcome::Away, 4).unwrap();
        assert_eq!(reveal(&fhe, &next), [0, 0, 4]);
    }

    #[test]
    fn test_record_and_claim() {
        let mut ledger = ConfidentialBetLedger::new();
        let alice = AccountId::from_subject("alice");
        let bob = AccountId::from_subject("bob");

        assert_eq!(ledger.record(1, alice, Handle::default(), 5, false, 0, Some([1u8; 32])), 0);
        assert_eq!(ledger.record(1, bob, Handle::default(), 6, false, 0, Some([2u8; 32])), 1);
        assert_eq!(ledger.record(1, alice, Handle::default(), 7, true, 0, None), 2);

        assert_eq!(ledger.bets_for(1).len(), 3);
        assert_eq!(ledger.bets_for(2).len(), 0);
        assert_eq!(ledger.bets_of(1, &alice).count(), 2);
        assert!(ledger.is_consumed(&[1u8; 32]));
        assert!(!ledger.is_consumed(&[3u8; 32]));

        ledger.mark_claimed(1, &[0, 2]);
        let claimed: Vec<bool> = ledger.bets_for(1).iter().map(|b| b.claimed).collect();
        assert_eq!(claimed, vec![true, false, true]);
    }

    proptest! {
        #[test]
        fn prop_sums_match_plaintext_totals(bets in proptest::collection::vec((0u64..3, 1u64..1_000_000), 0..40)) {
            let fhe = MockBackend::new();
            let mut sums = zero_sums(&fhe);
            let mut expected = [0u64; 3];

            for (choice, stake) in &bets {
                let c = fhe.register_input(*choice).unwrap();
                sums = accumulate_confidential(&fhe, &sums, &c, *stake).unwrap();
                expected[*choice as usize] += stake;
            }

            let revealed = reveal(&fhe, &sums);
            prop_assert_eq!(revealed, expected);
            prop_assert_eq!(revealed.iter().sum::<u64>(), bets.iter().map(|(_, s)| s).sum::<u64>());
        }
    }
}
