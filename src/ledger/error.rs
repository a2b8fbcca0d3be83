//! Ledger errors.
//!
//! Every failed operation leaves ledger state exactly as it was, with one
//! exception: [`LedgerError::AccountingInvariantViolated`] consumes the
//! offending decryption request and halts the match's settlement.

use thiserror::Error;

use crate::fhe::{AttestationError, FheError};
use crate::ledger::settlement::{CallbackAuthError, RequestId};
use crate::ledger::state::{AccountId, Amount, MatchId, MatchStatus};
use crate::ledger::vault::TransferError;

/// Errors returned by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Match is missing or in the wrong lifecycle phase.
    #[error("match {match_id} is {}, operation requires {expected}", status_label(.actual))]
    InvalidState {
        /// Match id
        match_id: MatchId,
        /// Phase the operation requires
        expected: MatchStatus,
        /// Phase found (`None` when the match does not exist)
        actual: Option<MatchStatus>,
    },

    /// Caller lacks authority over the match.
    #[error("{caller} may not {action} match {match_id}")]
    Unauthorized {
        /// Caller
        caller: AccountId,
        /// Match id
        match_id: MatchId,
        /// Attempted action
        action: &'static str,
    },

    /// Encrypted input failed attestation.
    #[error("attestation rejected: {0}")]
    AttestationInvalid(#[from] AttestationError),

    /// Declared result is not 0, 1 or 2.
    #[error("result {0} is not a valid outcome")]
    InvalidResult(u32),

    /// Plaintext choice is not 0, 1 or 2.
    #[error("choice {0} is not a valid outcome")]
    InvalidChoice(u32),

    /// Stake of zero.
    #[error("stake must be positive")]
    ZeroStake,

    /// Every bet of the caller on this match was already claimed.
    #[error("all bets on match {match_id} already claimed")]
    AlreadyClaimed {
        /// Match id
        match_id: MatchId,
    },

    /// Caller has no bets on this match.
    #[error("no bets on match {match_id}")]
    NoSuchBet {
        /// Match id
        match_id: MatchId,
    },

    /// Callback does not answer an outstanding request.
    #[error("decryption request {request_id} is unknown or already answered")]
    UnknownOrStaleRequest {
        /// Request id carried by the callback
        request_id: RequestId,
    },

    /// Callback did not authenticate as the decryption oracle.
    #[error("callback rejected: {0}")]
    CallbackRejected(#[from] CallbackAuthError),

    /// Revealed totals do not sum to the public pool.
    #[error("match {match_id}: revealed totals sum to {revealed}, pool is {pool}")]
    AccountingInvariantViolated {
        /// Match id
        match_id: MatchId,
        /// Sum of revealed totals
        revealed: u128,
        /// Public pool
        pool: Amount,
    },

    /// Moving funds failed.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    /// Betting deadline has passed.
    #[error("match {match_id} stopped taking bets at {deadline}")]
    DeadlinePassed {
        /// Match id
        match_id: MatchId,
        /// Deadline (unix seconds)
        deadline: i64,
    },

    /// Plaintext-choice bets are switched off.
    #[error("demo bets are disabled")]
    DemoBetsDisabled,

    /// A public amount or counter would overflow.
    #[error("{0} would overflow")]
    Overflow(&'static str),

    /// Homomorphic evaluation failed.
    #[error("coprocessor: {0}")]
    Backend(#[from] FheError),

    /// A bet's choice could not be resolved at claim time.
    #[error("match {match_id}: choice unresolved: {reason}")]
    ChoiceUnresolved {
        /// Match id
        match_id: MatchId,
        /// Resolver failure
        reason: String,
    },
}

impl LedgerError {
    /// Fatal errors need operator review; every other error is a plain rejection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::AccountingInvariantViolated { .. })
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidState { .. } => "invalid_state",
            LedgerError::Unauthorized { .. } => "unauthorized",
            LedgerError::AttestationInvalid(_) => "attestation_invalid",
            LedgerError::InvalidResult(_) => "invalid_result",
            LedgerError::InvalidChoice(_) => "invalid_choice",
            LedgerError::ZeroStake => "zero_stake",
            LedgerError::AlreadyClaimed { .. } => "already_claimed",
            LedgerError::NoSuchBet { .. } => "no_such_bet",
            LedgerError::UnknownOrStaleRequest { .. } => "unknown_or_stale_request",
            LedgerError::CallbackRejected(_) => "unauthorized",
            LedgerError::AccountingInvariantViolated { .. } => "accounting_invariant_violated",
            LedgerError::TransferFailed(_) => "transfer_failed",
            LedgerError::DeadlinePassed { .. } => "deadline_passed",
            LedgerError::DemoBetsDisabled => "demo_bets_disabled",
            LedgerError::Overflow(_) => "overflow",
            LedgerError::Backend(_) => "backend",
            LedgerError::ChoiceUnresolved { .. } => "choice_unresolved",
        }
    }
}

fn status_label(status: &Option<MatchStatus>) -> &'static str {
    match status {
        Some(s) => s.label(),
        None => "missing",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_display() {
        let err = LedgerError::InvalidState {
            match_id: 4,
            expected: MatchStatus::Open,
            actual: Some(MatchStatus::Closed),
        };
        assert_eq!(err.to_string(), "match 4 is closed, operation requires open");

        let missing = LedgerError::InvalidState { match_id: 9, expected: MatchStatus::Closed, actual: None };
        assert_eq!(missing.to_string(), "match 9 is missing, operation requires closed");
    }

    #[test]
    fn test_fatal_classification() {
        let fatal = LedgerError::AccountingInvariantViolated { match_id: 1, revealed: 3, pool: 2 };
        assert!(fatal.is_fatal());
        assert!(!LedgerError::ZeroStake.is_fatal());
        assert_eq!(fatal.code(), "accounting_invariant_violated");
    }

    #[test]
    fn test_from_conversions() {
        let err: LedgerError = AttestationError::Replayed.into();
        assert_eq!(err.code(), "attestation_invalid");
        let err: LedgerError = TransferError::Rejected("x".into()).into();
        assert_eq!(err.code(), "transfer_failed");
    }
}
