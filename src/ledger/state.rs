//! Ledger State Definitions
//!
//! Accounts, outcomes, matches and bets.
//! Uses BTreeMap-friendly `Ord` ids for deterministic iteration order.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::bytes::impl_hex_serde;
use crate::core::hash::{hash_with_domain, short_hex, StateHasher};
use crate::fhe::Handle;
use crate::core::fixed::FixedNum;
use crate::ledger::settlement::{PayoutRule, RequestId};

/// Match identifier. Allocated sequentially starting at 0.
pub type MatchId = u64;

/// Stake and payout amounts, in base units.
pub type Amount = u64;

/// Domain used to derive account ids from external subjects.
const ACCOUNT_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_ACCOUNT_V1";

// =============================================================================
// ACCOUNT ID
// =============================================================================

/// Opaque principal identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AccountId(pub [u8; 16]);

impl_hex_serde!(AccountId, 16);

impl AccountId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Derive a stable id from an external subject (token `sub`, wallet address).
    pub fn from_subject(subject: &str) -> Self {
        let digest = hash_with_domain(ACCOUNT_DOMAIN, subject.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }

    /// Parse either a UUID or a free-form subject.
    pub fn parse(s: &str) -> Self {
        Self::from_uuid_str(s).unwrap_or_else(|| Self::from_subject(s))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acct:{}", short_hex(&self.0))
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// 1X2 outcome of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Outcome {
    /// "1": the home side wins
    Home = 0,
    /// "X": draw
    Draw = 1,
    /// "2": the away side wins
    Away = 2,
}

impl Outcome {
    /// All outcomes in index order.
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];

    /// Largest valid outcome index.
    pub const MAX_INDEX: u64 = 2;

    /// Index into per-outcome arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Get outcome from index (0-2).
    pub fn from_index(index: u64) -> Option<Outcome> {
        match index {
            0 => Some(Outcome::Home),
            1 => Some(Outcome::Draw),
            2 => Some(Outcome::Away),
            _ => None,
        }
    }

    /// Conventional 1X2 symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Outcome::Home => "1",
            Outcome::Draw => "X",
            Outcome::Away => "2",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// =============================================================================
// MATCH STATUS
// =============================================================================

/// Match lifecycle phase.
///
/// ```text
/// Open ──close──► Closed ──settle──► PendingSettlement ──callback──► Settled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
#[derive(Default)]
pub enum MatchStatus {
    /// Accepting bets
    #[default]
    Open = 0,
    /// Betting closed, awaiting a result
    Closed = 1,
    /// Result declared, decryption in flight
    PendingSettlement = 2,
    /// Totals revealed, claims allowed
    Settled = 3,
}

impl MatchStatus {
    /// The only status this one may advance to.
    pub fn next(self) -> Option<MatchStatus> {
        match self {
            MatchStatus::Open => Some(MatchStatus::Closed),
            MatchStatus::Closed => Some(MatchStatus::PendingSettlement),
            MatchStatus::PendingSettlement => Some(MatchStatus::Settled),
            MatchStatus::Settled => None,
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            MatchStatus::Open => "open",
            MatchStatus::Closed => "closed",
            MatchStatus::PendingSettlement => "pending_settlement",
            MatchStatus::Settled => "settled",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// MATCH
// =============================================================================

/// A single 1X2 market.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Match {
    /// Sequential id, from 0
    pub id: MatchId,

    /// Free-form description, e.g. "Home vs Away"
    pub metadata: String,

    /// Creator; may close and settle
    pub authority: AccountId,

    /// Lifecycle phase
    pub status: MatchStatus,

    /// Creation time (unix seconds)
    pub created_at: i64,

    /// Betting deadline (unix seconds), if one was given
    pub deadline: Option<i64>,

    /// Sum of all stakes, public
    pub total_pool: Amount,

    /// Number of bets accepted
    pub bet_count: u32,

    /// Encrypted running stake total per outcome
    pub sums: [Handle; 3],

    /// Declared result (set when settlement is requested)
    pub result: Option<Outcome>,

    /// Revealed per-outcome totals (set once settled)
    pub totals: Option<[Amount; 3]>,

    /// Outstanding decryption request
    pub pending_request: Option<RequestId>,

    /// Set when a callback failed reconciliation; settlement needs review
    pub settlement_halted: bool,

    /// Total paid out through claims
    pub paid_out: Amount,
}

impl Match {
    /// Create an open match with all accumulators at `zero`.
    pub fn new(
        id: MatchId,
        metadata: String,
        authority: AccountId,
        deadline: Option<i64>,
        created_at: i64,
        zero: Handle,
    ) -> Self {
        Self {
            id,
            metadata,
            authority,
            status: MatchStatus::Open,
            created_at,
            deadline,
            total_pool: 0,
            bet_count: 0,
            sums: [zero; 3],
            result: None,
            totals: None,
            pending_request: None,
            settlement_halted: false,
            paid_out: 0,
        }
    }

    /// Whether betting is past its deadline at `now`.
    #[inline]
    pub fn deadline_passed(&self, now: i64) -> bool {
        self.deadline.map_or(false, |d| now >= d)
    }

    /// Total stake on the declared result, once revealed.
    pub fn winning_total(&self) -> Option<Amount> {
        match (self.result, self.totals) {
            (Some(result), Some(totals)) => Some(totals[result.index()]),
            _ => None,
        }
    }

    /// Public projection of this match.
    pub fn view(&self) -> MatchView {
        MatchView {
            id: self.id,
            metadata: self.metadata.clone(),
            authority: self.authority,
            status: self.status,
            deadline: self.deadline,
            total_pool: self.total_pool,
            bet_count: self.bet_count,
            result: self.result,
            totals: self.totals,
            paid_out: self.paid_out,
            settlement_halted: self.settlement_halted,
            payout_ratio: match (self.status, PayoutRule::for_match(self)) {
                (MatchStatus::Settled, Some(PayoutRule::PariMutuel(ratio))) => Some(ratio.as_fixed()),
                _ => None,
            },
        }
    }

    /// Feed this match into a state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.id);
        hasher.update_str(&self.metadata);
        hasher.update_id16(self.authority.as_bytes());
        hasher.update_u8(self.status as u8);
        hasher.update_i64(self.created_at);
        hasher.update_opt_u64(self.deadline.map(|d| d as u64));
        hasher.update_u64(self.total_pool);
        hasher.update_u32(self.bet_count);
        for sum in &self.sums {
            hasher.update_hash(sum.as_bytes());
        }
        hasher.update_opt_u64(self.result.map(|r| r as u64));
        match self.totals {
            Some(totals) => {
                hasher.update_u8(1);
                for total in totals {
                    hasher.update_u64(total);
                }
            }
            None => hasher.update_u8(0),
        }
        match &self.pending_request {
            Some(request_id) => {
                hasher.update_u8(1);
                hasher.update_hash(request_id.as_bytes());
            }
            None => hasher.update_u8(0),
        }
        hasher.update_bool(self.settlement_halted);
        hasher.update_u64(self.paid_out);
    }
}

/// Public view of a match. Never carries ciphertext handles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchView {
    /// Match id
    pub id: MatchId,
    /// Description
    pub metadata: String,
    /// Creator
    pub authority: AccountId,
    /// Lifecycle phase
    pub status: MatchStatus,
    /// Betting deadline (unix seconds)
    pub deadline: Option<i64>,
    /// Sum of all stakes
    pub total_pool: Amount,
    /// Bets accepted
    pub bet_count: u32,
    /// Declared result
    pub result: Option<Outcome>,
    /// Revealed per-outcome totals
    pub totals: Option<[Amount; 3]>,
    /// Paid out so far
    pub paid_out: Amount,
    /// Settlement halted on an accounting mismatch
    pub settlement_halted: bool,
    /// Pool per unit of winning stake, once settled. `None` on refund.
    pub payout_ratio: Option<FixedNum>,
}

// =============================================================================
// BET
// =============================================================================

/// One accepted wager. The chosen outcome stays encrypted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bet {
    /// Market this bet belongs to
    pub match_id: MatchId,

    /// Position within the match's bet list
    pub index: u32,

    /// Who placed it
    pub bettor: AccountId,

    /// Encrypted outcome selector
    pub choice: Handle,

    /// Public stake
    pub stake: Amount,

    /// Paid (or refunded) through a claim
    pub claimed: bool,

    /// Placed through the plaintext demo path
    pub demo: bool,

    /// Placement time (unix seconds)
    pub placed_at: i64,
}

impl Bet {
    /// Feed this bet into a state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.match_id);
        hasher.update_u32(self.index);
        hasher.update_id16(self.bettor.as_bytes());
        hasher.update_hash(self.choice.as_bytes());
        hasher.update_u64(self.stake);
        hasher.update_bool(self.claimed);
        hasher.update_bool(self.demo);
        hasher.update_i64(self.placed_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_uuid_roundtrip() {
        let s = "550e8400-e29b-41d4-a716-446655440000";
        let id = AccountId::from_uuid_str(s).unwrap();
        assert_eq!(id.to_uuid_string(), s);
        assert_eq!(AccountId::parse(s), id);
    }

    #[test]
    fn test_account_id_from_subject() {
        let a = AccountId::from_subject("0xA11CE");
        let b = AccountId::from_subject("0xA11CE");
        let c = AccountId::from_subject("0xB0B");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(AccountId::parse("0xA11CE"), a);
    }

    #[test]
    fn test_account_id_json_is_hex() {
        let id = AccountId::new([0xab; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(16)));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_outcome_from_index() {
        assert_eq!(Outcome::from_index(0), Some(Outcome::Home));
        assert_eq!(Outcome::from_index(1), Some(Outcome::Draw));
        assert_eq!(Outcome::from_index(2), Some(Outcome::Away));
        assert_eq!(Outcome::from_index(3), None);
        for (i, o) in Outcome::ALL.iter().enumerate() {
            assert_eq!(o.index(), i);
        }
        assert_eq!(Outcome::Draw.to_string(), "X");
    }

    #[test]
    fn test_status_progression() {
        assert_eq!(MatchStatus::Open.next(), Some(MatchStatus::Closed));
        assert_eq!(MatchStatus::Closed.next(), Some(MatchStatus::PendingSettlement));
        assert_eq!(MatchStatus::PendingSettlement.next(), Some(MatchStatus::Settled));
        assert_eq!(MatchStatus::Settled.next(), None);
        assert!(MatchStatus::Open < MatchStatus::Settled);
    }

    #[test]
    fn test_deadline_passed() {
        let mut m = Match::new(1, "A vs B".into(), AccountId::default(), None, 0, Handle::default());
        assert!(!m.deadline_passed(i64::MAX));
        m.deadline = Some(100);
        assert!(!m.deadline_passed(99));
        assert!(m.deadline_passed(100));
    }

    #[test]
    fn test_winning_total() {
        let mut m = Match::new(1, "A vs B".into(), AccountId::default(), None, 0, Handle::default());
        assert_eq!(m.winning_total(), None);
        m.result = Some(Outcome::Away);
        m.totals = Some([1, 2, 3]);
        assert_eq!(m.winning_total(), Some(3));
    }

    #[test]
    fn test_match_hash_changes_with_state() {
        let m = Match::new(1, "A vs B".into(), AccountId::default(), None, 0, Handle::default());
        let hash = |m: &Match| {
            let mut h = StateHasher::for_ledger_state();
            m.hash_into(&mut h);
            h.finalize()
        };
        let mut closed = m.clone();
        closed.status = MatchStatus::Closed;
        assert_eq!(hash(&m), hash(&m.clone()));
        assert_ne!(hash(&m), hash(&closed));
    }
}
