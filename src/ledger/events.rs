//! Ledger Events
//!
//! One event per successful state-changing operation, in commit order.
//! Events never carry a bet's chosen outcome.

use serde::{Serialize, Deserialize};

use crate::ledger::settlement::RequestId;
use crate::ledger::state::{AccountId, Amount, MatchId, Outcome};

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEventData {
    /// A match was opened for betting
    MatchCreated {
        /// New match id
        match_id: MatchId,
        /// Creator
        authority: AccountId,
        /// Description
        metadata: String,
        /// Betting deadline, if any
        deadline: Option<i64>,
    },

    /// A bet was accepted. The chosen outcome is not part of the event.
    BetPlaced {
        /// Match
        match_id: MatchId,
        /// Bettor
        bettor: AccountId,
        /// Position in the match's bet list
        bet_index: u32,
        /// Stake
        stake: Amount,
        /// Pool after this bet
        total_pool: Amount,
        /// Placed through the plaintext demo path
        demo: bool,
    },

    /// Betting was closed
    MatchClosed {
        /// Match
        match_id: MatchId,
        /// Final pool
        total_pool: Amount,
        /// Final bet count
        bet_count: u32,
    },

    /// Result declared; per-outcome totals sent for decryption
    SettlementRequested {
        /// Match
        match_id: MatchId,
        /// Correlation id of the decryption request
        request_id: RequestId,
        /// Declared result
        result: Outcome,
    },

    /// Totals revealed and reconciled; claims open
    SettlementFinalized {
        /// Match
        match_id: MatchId,
        /// Declared result
        result: Outcome,
        /// Revealed per-outcome totals
        totals: [Amount; 3],
        /// Pool
        total_pool: Amount,
    },

    /// A bettor was paid (zero amounts included)
    ClaimPaid {
        /// Match
        match_id: MatchId,
        /// Bettor
        bettor: AccountId,
        /// Amount paid
        amount: Amount,
        /// Bets marked claimed by this payment
        bets_settled: u32,
    },
}

/// A ledger event with ordering and timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Ledger-wide sequence number (strictly increasing)
    pub seq: u64,

    /// Unix seconds at commit
    pub timestamp: i64,

    /// Event data
    pub data: LedgerEventData,
}

impl LedgerEvent {
    /// Create a new event.
    pub fn new(seq: u64, timestamp: i64, data: LedgerEventData) -> Self {
        Self { seq, timestamp, data }
    }

    /// Match this event belongs to.
    pub fn match_id(&self) -> MatchId {
        match &self.data {
            LedgerEventData::MatchCreated { match_id, .. }
            | LedgerEventData::BetPlaced { match_id, .. }
            | LedgerEventData::MatchClosed { match_id, .. }
            | LedgerEventData::SettlementRequested { match_id, .. }
            | LedgerEventData::SettlementFinalized { match_id, .. }
            | LedgerEventData::ClaimPaid { match_id, .. } => *match_id,
        }
    }

    /// Short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match &self.data {
            LedgerEventData::MatchCreated { .. } => "match_created",
            LedgerEventData::BetPlaced { .. } => "bet_placed",
            LedgerEventData::MatchClosed { .. } => "match_closed",
            LedgerEventData::SettlementRequested { .. } => "settlement_requested",
            LedgerEventData::SettlementFinalized { .. } => "settlement_finalized",
            LedgerEventData::ClaimPaid { .. } => "claim_paid",
        }
    }
}

impl PartialOrd for LedgerEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LedgerEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seq.cmp(&other.seq)
    }
}
