//! Match Book
//!
//! The single mutation path for the ledger. Composes the registry, the bet
//! ledger, the settlement engine and the claim processor with the external
//! collaborators.
//!
//! ```text
//! ┌──────────────────────────── MatchBook ─────────────────────────────┐
//! │ MatchRegistry ─► ConfidentialBetLedger ─► SettlementEngine ─► Claim │
//! └──────┬──────────────┬──────────────┬──────────────┬────────────────┘
//!        │              │              │              │
//!   HomomorphicBackend  AttestationVerifier  CallbackAuthenticator  FundsTransfer
//! ```
//!
//! Every operation validates and computes first, then commits. A failed
//! operation leaves the book untouched.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::core::fixed::units_to_float;
use crate::core::hash::{short_hex, StateHash};
use crate::fhe::{
    AttestationContext, AttestationError, AttestationVerifier, EncryptedInput, Handle,
    HomomorphicBackend, PLACE_BET_OPERATION,
};
use crate::ledger::bets::{accumulate_confidential, accumulate_plain, ConfidentialBetLedger};
use crate::ledger::claim::{ChoiceResolver, ClaimProcessor};
use crate::ledger::clock::Clock;
use crate::ledger::config::LedgerConfig;
use crate::ledger::error::LedgerError;
use crate::ledger::events::{LedgerEvent, LedgerEventData};
use crate::ledger::registry::{advance, has_authority, MatchRegistry};
use crate::ledger::settlement::{
    reconcile, CallbackAuthenticator, DecryptionCallback, DecryptionRequest, PayoutRule,
    SettlementEngine,
};
use crate::ledger::snapshot::{compute_state_hash, LedgerSnapshot, SnapshotError, SNAPSHOT_VERSION};
use crate::ledger::state::{AccountId, Amount, Bet, Match, MatchId, MatchStatus, MatchView, Outcome};
use crate::ledger::vault::FundsTransfer;

/// External collaborators of the book.
#[derive(Clone)]
pub struct LedgerDeps {
    /// Homomorphic evaluation
    pub fhe: Arc<dyn HomomorphicBackend>,
    /// Input attestation checks
    pub attestations: Arc<dyn AttestationVerifier>,
    /// Oracle callback authentication
    pub callbacks: Arc<dyn CallbackAuthenticator>,
    /// Stake custody and payouts
    pub vault: Arc<dyn FundsTransfer>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// A bet validated and computed but not yet committed.
struct BetDraft {
    match_id: MatchId,
    bettor: AccountId,
    choice: Handle,
    stake: Amount,
    sums: [Handle; 3],
    demo: bool,
    placed_at: i64,
    digest: Option<StateHash>,
}

/// The ledger.
pub struct MatchBook {
    config: LedgerConfig,
    deps: LedgerDeps,
    registry: MatchRegistry,
    bets: ConfidentialBetLedger,
    settlement: SettlementEngine,
    funds_held: Amount,
    next_event_seq: u64,
    pending_events: Vec<LedgerEvent>,
}

impl MatchBook {
    /// Create an empty book.
    pub fn new(config: LedgerConfig, deps: LedgerDeps) -> Self {
        Self {
            config,
            deps,
            registry: MatchRegistry::new(),
            bets: ConfidentialBetLedger::new(),
            settlement: SettlementEngine::new(),
            funds_held: 0,
            next_event_seq: 0,
            pending_events: Vec::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // =========================================================================
    // MATCH LIFECYCLE
    // =========================================================================

    /// Open a new match. `deadline` is unix seconds, 0 for none.
    #[instrument(skip(self, metadata), fields(caller = %caller))]
    pub fn create_match(
        &mut self,
        caller: AccountId,
        metadata: impl Into<String>,
        deadline: u64,
    ) -> Result<MatchId, LedgerError> {
        let metadata = metadata.into();
        let deadline = match deadline {
            0 => None,
            d => Some(i64::try_from(d).map_err(|_| LedgerError::Overflow("deadline"))?),
        };
        let zero = self.deps.fhe.trivial_encrypt(0)?;
        let now = self.deps.clock.now();

        let match_id = self.registry.create(metadata.clone(), caller, deadline, now, zero)?;

        info!("Match {} created by {}: {}", match_id, caller, metadata);
        self.push_event(LedgerEventData::MatchCreated {
            match_id,
            authority: caller,
            metadata,
            deadline,
        });
        Ok(match_id)
    }

    /// Stop accepting bets.
    #[instrument(skip(self), fields(caller = %caller))]
    pub fn close_match(&mut self, caller: AccountId, match_id: MatchId) -> Result<(), LedgerError> {
        let settlement_authority = self.config.settlement_authority;
        let m = self.registry.get_mut(match_id).ok_or(LedgerError::InvalidState {
            match_id,
            expected: MatchStatus::Open,
            actual: None,
        })?;
        if !has_authority(m, &caller, settlement_authority.as_ref()) {
            warn!("{} tried to close match {} without authority", caller, match_id);
            return Err(LedgerError::Unauthorized { caller, match_id, action: "close" });
        }
        advance(m, MatchStatus::Closed)?;

        let (total_pool, bet_count) = (m.total_pool, m.bet_count);
        info!("Match {} closed: {} bets, pool {:.4}", match_id, bet_count, units_to_float(total_pool));
        self.push_event(LedgerEventData::MatchClosed { match_id, total_pool, bet_count });
        Ok(())
    }

    // =========================================================================
    // BETTING
    // =========================================================================

    /// Place a bet with an encrypted choice.
    #[instrument(skip(self, input), fields(caller = %caller))]
    pub fn place_bet(
        &mut self,
        caller: AccountId,
        match_id: MatchId,
        input: &EncryptedInput,
        stake: Amount,
    ) -> Result<u32, LedgerError> {
        let now = self.deps.clock.now();
        let sums = self.open_sums(match_id, now)?;
        if stake == 0 {
            return Err(LedgerError::ZeroStake);
        }

        let ctx = AttestationContext {
            ledger_id: &self.config.ledger_id,
            submitter: caller,
            operation: PLACE_BET_OPERATION,
            max_value: Outcome::MAX_INDEX,
        };
        let digest = self
            .deps
            .attestations
            .verify(&input.handle, &input.attestation, &ctx)
            .map_err(|e| {
                debug!("Attestation from {} rejected: {}", caller, e);
                e
            })?;
        if self.bets.is_consumed(&digest) {
            debug!("Replayed attestation {} from {}", short_hex(&digest), caller);
            return Err(AttestationError::Replayed.into());
        }

        let sums = accumulate_confidential(self.deps.fhe.as_ref(), &sums, &input.handle, stake)?;
        self.commit_bet(BetDraft {
            match_id,
            bettor: caller,
            choice: input.handle,
            stake,
            sums,
            demo: false,
            placed_at: now,
            digest: Some(digest),
        })
    }

    /// Place a bet with a plaintext choice. Demo only.
    #[instrument(skip(self), fields(caller = %caller))]
    pub fn place_bet_mock(
        &mut self,
        caller: AccountId,
        match_id: MatchId,
        plain_choice: u32,
        stake: Amount,
    ) -> Result<u32, LedgerError> {
        if !self.config.demo_bets_enabled {
            return Err(LedgerError::DemoBetsDisabled);
        }
        let now = self.deps.clock.now();
        let sums = self.open_sums(match_id, now)?;
        let choice = Outcome::from_index(plain_choice as u64).ok_or(LedgerError::InvalidChoice(plain_choice))?;
        if stake == 0 {
            return Err(LedgerError::ZeroStake);
        }

        let sums = accumulate_plain(self.deps.fhe.as_ref(), &sums, choice, stake)?;
        let choice_handle = self.deps.fhe.trivial_encrypt(choice as u64)?;
        self.commit_bet(BetDraft {
            match_id,
            bettor: caller,
            choice: choice_handle,
            stake,
            sums,
            demo: true,
            placed_at: now,
            digest: None,
        })
    }

    /// Current sums of a match that is open for betting at `now`.
    fn open_sums(&self, match_id: MatchId, now: i64) -> Result<[Handle; 3], LedgerError> {
        let m = self.registry.require(match_id, MatchStatus::Open)?;
        if self.config.enforce_deadline && m.deadline_passed(now) {
            return Err(LedgerError::DeadlinePassed {
                match_id,
                deadline: m.deadline.unwrap_or_default(),
            });
        }
        Ok(m.sums)
    }

    fn commit_bet(&mut self, draft: BetDraft) -> Result<u32, LedgerError> {
        let m = self.registry.require(draft.match_id, MatchStatus::Open)?;
        let total_pool = m.total_pool.checked_add(draft.stake).ok_or(LedgerError::Overflow("pool"))?;
        let bet_count = m.bet_count.checked_add(1).ok_or(LedgerError::Overflow("bet count"))?;
        let funds_held = self.funds_held.checked_add(draft.stake).ok_or(LedgerError::Overflow("funds held"))?;

        self.deps.vault.collect(&draft.bettor, draft.stake).map_err(|e| {
            warn!("Stake collection from {} failed: {}", draft.bettor, e);
            e
        })?;

        let m = self.registry.require_mut(draft.match_id, MatchStatus::Open)?;
        m.sums = draft.sums;
        m.total_pool = total_pool;
        m.bet_count = bet_count;
        self.funds_held = funds_held;

        let bet_index = self.bets.record(
            draft.match_id,
            draft.bettor,
            draft.choice,
            draft.stake,
            draft.demo,
            draft.placed_at,
            draft.digest,
        );

        debug!(
            "Bet {} on match {} by {}: stake {:.4}, pool {:.4}",
            bet_index,
            draft.match_id,
            draft.bettor,
            units_to_float(draft.stake),
            units_to_float(total_pool)
        );
        self.push_event(LedgerEventData::BetPlaced {
            match_id: draft.match_id,
            bettor: draft.bettor,
            bet_index,
            stake: draft.stake,
            total_pool,
            demo: draft.demo,
        });
        Ok(bet_index)
    }

    // =========================================================================
    // SETTLEMENT
    // =========================================================================

    /// Checks [`MatchBook::settle_match`] would pass, without applying it.
    pub fn check_settle(&self, caller: AccountId, match_id: MatchId, result: u32) -> Result<Outcome, LedgerError> {
        let m = self.registry.get(match_id).ok_or(LedgerError::InvalidState {
            match_id,
            expected: MatchStatus::Closed,
            actual: None,
        })?;
        if !has_authority(m, &caller, self.config.settlement_authority.as_ref()) {
            warn!("{} tried to settle match {} without authority", caller, match_id);
            return Err(LedgerError::Unauthorized { caller, match_id, action: "settle" });
        }
        let result = Outcome::from_index(result as u64).ok_or(LedgerError::InvalidResult(result))?;
        if m.status != MatchStatus::Closed {
            return Err(LedgerError::InvalidState {
                match_id,
                expected: MatchStatus::Closed,
                actual: Some(m.status),
            });
        }
        Ok(result)
    }

    /// Declare the result and request decryption of the totals.
    ///
    /// The returned request must be delivered to the decryption oracle.
    #[instrument(skip(self), fields(caller = %caller))]
    pub fn settle_match(
        &mut self,
        caller: AccountId,
        match_id: MatchId,
        result: u32,
    ) -> Result<DecryptionRequest, LedgerError> {
        let result = self.check_settle(caller, match_id, result)?;
        let m = self.registry.require(match_id, MatchStatus::Closed)?;

        let entropy = *uuid::Uuid::new_v4().as_bytes();
        let request = self.settlement.issue(m, entropy);

        let m = self.registry.require_mut(match_id, MatchStatus::Closed)?;
        advance(m, MatchStatus::PendingSettlement)?;
        m.result = Some(result);
        m.pending_request = Some(request.request_id);

        info!("Match {} settling as {}, decryption {} requested", match_id, result, request.request_id);
        self.push_event(LedgerEventData::SettlementRequested {
            match_id,
            request_id: request.request_id,
            result,
        });
        Ok(request)
    }

    /// Apply an oracle callback. Returns the revealed totals.
    #[instrument(skip(self, callback), fields(request = %callback.request_id, match_id = callback.match_id))]
    pub fn on_decryption_callback(&mut self, callback: &DecryptionCallback) -> Result<[Amount; 3], LedgerError> {
        self.deps.callbacks.authenticate(callback).map_err(|e| {
            warn!("Rejected callback for {}: {}", callback.request_id, e);
            e
        })?;

        let stale = LedgerError::UnknownOrStaleRequest { request_id: callback.request_id };
        if self.settlement.pending_match(&callback.request_id) != Some(callback.match_id) {
            debug!("Stale or unknown callback {}", callback.request_id);
            return Err(stale);
        }
        let m = self
            .registry
            .require(callback.match_id, MatchStatus::PendingSettlement)
            .map_err(|_| stale.clone())?;
        if m.pending_request != Some(callback.request_id) {
            return Err(stale);
        }

        let reconciled = reconcile(m, &callback.cleartexts);
        self.settlement.consume(&callback.request_id);

        let m = self.registry.require_mut(callback.match_id, MatchStatus::PendingSettlement)?;
        m.pending_request = None;
        if let Err(e) = reconciled {
            m.settlement_halted = true;
            error!("Settlement of match {} halted: {}", callback.match_id, e);
            return Err(e);
        }

        advance(m, MatchStatus::Settled)?;
        m.totals = Some(callback.cleartexts);
        let (match_id, total_pool) = (m.id, m.total_pool);
        let result = m.result.ok_or(LedgerError::InvalidState {
            match_id,
            expected: MatchStatus::PendingSettlement,
            actual: Some(MatchStatus::Settled),
        })?;

        let payout = match PayoutRule::for_match(m) {
            Some(PayoutRule::PariMutuel(ratio)) => ratio.as_fixed().to_string(),
            _ => "refund".to_string(),
        };
        info!(
            "Match {} settled as {}: totals {:?}, pool {:.4}, payout {}",
            match_id, result, callback.cleartexts, units_to_float(total_pool), payout
        );
        self.push_event(LedgerEventData::SettlementFinalized {
            match_id,
            result,
            totals: callback.cleartexts,
            total_pool,
        });
        Ok(callback.cleartexts)
    }

    // =========================================================================
    // CLAIMS
    // =========================================================================

    /// Pay out all of the caller's unclaimed bets on a settled match.
    #[instrument(skip(self, resolver), fields(caller = %caller))]
    pub fn claim(
        &mut self,
        caller: AccountId,
        match_id: MatchId,
        resolver: &dyn ChoiceResolver,
    ) -> Result<Amount, LedgerError> {
        let m = self.registry.require(match_id, MatchStatus::Settled)?;
        let plan = ClaimProcessor::plan(m, &self.bets, &caller, resolver)?;
        let funds_held = self.funds_held.checked_sub(plan.amount).ok_or(LedgerError::Overflow("funds held"))?;
        let paid_out = m.paid_out.checked_add(plan.amount).ok_or(LedgerError::Overflow("paid out"))?;

        if plan.amount > 0 {
            self.deps.vault.pay(&caller, plan.amount).map_err(|e| {
                warn!("Payout of {} to {} failed: {}", plan.amount, caller, e);
                e
            })?;
        }

        self.bets.mark_claimed(match_id, &plan.bet_indices);
        self.funds_held = funds_held;
        let m = self.registry.require_mut(match_id, MatchStatus::Settled)?;
        m.paid_out = paid_out;

        info!(
            "Claim on match {} by {}: {} bets, {} winning, paid {:.4}",
            match_id,
            caller,
            plan.bet_indices.len(),
            plan.winning_bets,
            units_to_float(plan.amount)
        );
        self.push_event(LedgerEventData::ClaimPaid {
            match_id,
            bettor: caller,
            amount: plan.amount,
            bets_settled: plan.bet_indices.len() as u32,
        });
        Ok(plan.amount)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Number of matches ever created.
    pub fn match_counter(&self) -> u64 {
        self.registry.counter()
    }

    /// Full match record (includes handles).
    pub fn get_match(&self, match_id: MatchId) -> Option<&Match> {
        self.registry.get(match_id)
    }

    /// Public view of a match.
    pub fn match_view(&self, match_id: MatchId) -> Option<MatchView> {
        self.registry.get(match_id).map(Match::view)
    }

    /// All bets on a match.
    pub fn bets_for(&self, match_id: MatchId) -> &[Bet] {
        self.bets.bets_for(match_id)
    }

    /// Bets by one account on a match.
    pub fn bets_of(&self, match_id: MatchId, account: &AccountId) -> Vec<&Bet> {
        self.bets.bets_of(match_id, account).collect()
    }

    /// Funds in custody.
    pub fn funds_held(&self) -> Amount {
        self.funds_held
    }

    /// Outstanding decryption requests.
    pub fn pending_requests(&self) -> usize {
        self.settlement.pending_count()
    }

    /// Upper bound on what the book still owes.
    ///
    /// Unsettled matches owe at most their pool; settled matches owe the
    /// payouts of their unclaimed bets.
    pub fn outstanding_liability(&self, resolver: &dyn ChoiceResolver) -> Result<Amount, LedgerError> {
        let mut owed: Amount = 0;
        for m in self.registry.iter() {
            let match_owed = match PayoutRule::for_match(m).filter(|_| m.status == MatchStatus::Settled) {
                None => m.total_pool,
                Some(rule) => {
                    let mut sum: Amount = 0;
                    for bet in self.bets.bets_for(m.id).iter().filter(|b| !b.claimed) {
                        let won = match rule {
                            PayoutRule::Refund => false,
                            PayoutRule::PariMutuel(_) => {
                                let choice = resolver.resolve_choice(m.id, &bet.choice).map_err(|e| {
                                    LedgerError::ChoiceUnresolved { match_id: m.id, reason: e.to_string() }
                                })?;
                                Some(choice) == m.result
                            }
                        };
                        let amount = rule.amount_for(bet.stake, won).ok_or(LedgerError::Overflow("payout"))?;
                        sum = sum.checked_add(amount).ok_or(LedgerError::Overflow("liability"))?;
                    }
                    sum
                }
            };
            owed = owed.checked_add(match_owed).ok_or(LedgerError::Overflow("liability"))?;
        }
        Ok(owed)
    }

    // =========================================================================
    // EVENTS & PERSISTENCE
    // =========================================================================

    /// Drain events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn push_event(&mut self, data: LedgerEventData) {
        let event = LedgerEvent::new(self.next_event_seq, self.deps.clock.now(), data);
        self.next_event_seq += 1;
        self.pending_events.push(event);
    }

    /// Hash of the full ledger state.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(&self.registry, &self.bets, &self.settlement, self.funds_held, self.next_event_seq)
    }

    /// Capture the full ledger state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            registry: self.registry.clone(),
            bets: self.bets.clone(),
            settlement: self.settlement.clone(),
            funds_held: self.funds_held,
            next_event_seq: self.next_event_seq,
            state_hash: self.compute_hash(),
        }
    }

    /// Rebuild a book from a verified snapshot.
    pub fn restore(config: LedgerConfig, deps: LedgerDeps, snapshot: LedgerSnapshot) -> Result<Self, SnapshotError> {
        snapshot.verify()?;
        info!(
            "Restored ledger: {} matches, funds held {:.4}, state {}",
            snapshot.registry.counter(),
            units_to_float(snapshot.funds_held),
            short_hex(&snapshot.state_hash)
        );
        Ok(Self {
            config,
            deps,
            registry: snapshot.registry,
            bets: snapshot.bets,
            settlement: snapshot.settlement,
            funds_held: snapshot.funds_held,
            next_event_seq: snapshot.next_event_seq,
            pending_events: Vec::new(),
        })
    }
}
