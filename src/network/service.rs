//! Ledger Service
//!
//! Async front of the [`MatchBook`]. One writer at a time; decryption
//! requests go to the oracle over a channel and its callbacks come back on
//! another.
//!
//! ```text
//!  clients ──► LedgerService ──write lock──► MatchBook
//!                  │   ▲                          │ events
//!     reserve+send │   │ apply_callback           ▼
//!                  ▼   │                    broadcast::Sender
//!             DecryptionOracle task
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::hash::StateHash;
use crate::fhe::EncryptedInput;
use crate::ledger::claim::ChoiceResolver;
use crate::ledger::error::LedgerError;
use crate::ledger::events::LedgerEvent;
use crate::ledger::settlement::{DecryptionCallback, DecryptionRequest};
use crate::ledger::snapshot::LedgerSnapshot;
use crate::ledger::state::{AccountId, Amount, Bet, MatchId, MatchView};
use crate::ledger::MatchBook;
use crate::oracle::DecryptionOracle;

/// Broadcast buffer for ledger events.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default depth of the oracle request queue.
pub const ORACLE_QUEUE_CAPACITY: usize = 64;

/// Service errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The ledger rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The oracle request queue is closed.
    #[error("decryption oracle unavailable")]
    OracleUnavailable,
}

impl ServiceError {
    /// Stable snake_case code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Ledger(e) => e.code(),
            ServiceError::OracleUnavailable => "oracle_unavailable",
        }
    }
}

/// Background tasks started by [`LedgerService::start`].
pub struct ServiceTasks {
    /// Oracle worker
    pub oracle: JoinHandle<()>,
    /// Callback applier
    pub callbacks: JoinHandle<()>,
}

/// Serialised access to one ledger.
pub struct LedgerService {
    book: RwLock<MatchBook>,
    resolver: Arc<dyn ChoiceResolver>,
    requests: mpsc::Sender<DecryptionRequest>,
    events: broadcast::Sender<LedgerEvent>,
}

impl LedgerService {
    /// Wrap a book. Settlement requests are sent on `requests`.
    pub fn new(
        book: MatchBook,
        resolver: Arc<dyn ChoiceResolver>,
        requests: mpsc::Sender<DecryptionRequest>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            book: RwLock::new(book),
            resolver,
            requests,
            events,
        }
    }

    /// Spawn the oracle and the callback loop around `book`.
    pub fn start(book: MatchBook, oracle: DecryptionOracle, queue_capacity: usize) -> (Arc<Self>, ServiceTasks) {
        let resolver: Arc<dyn ChoiceResolver> = Arc::new(oracle.clone());
        let (request_tx, callback_rx, oracle_task) = oracle.spawn(queue_capacity);

        let service = Arc::new(Self::new(book, resolver, request_tx));
        let callbacks = tokio::spawn(service.clone().run_callbacks(callback_rx));

        info!("Ledger service started");
        (service, ServiceTasks { oracle: oracle_task, callbacks })
    }

    /// Subscribe to ledger events.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// See [`MatchBook::create_match`].
    pub async fn create_match(&self, caller: AccountId, metadata: String, deadline: u64) -> Result<MatchId, ServiceError> {
        let mut book = self.book.write().await;
        let result = book.create_match(caller, metadata, deadline);
        self.publish(&mut book);
        Ok(result?)
    }

    /// See [`MatchBook::place_bet`].
    pub async fn place_bet(
        &self,
        caller: AccountId,
        match_id: MatchId,
        input: &EncryptedInput,
        stake: Amount,
    ) -> Result<u32, ServiceError> {
        let mut book = self.book.write().await;
        let result = book.place_bet(caller, match_id, input, stake);
        self.publish(&mut book);
        Ok(result?)
    }

    /// See [`MatchBook::place_bet_mock`].
    pub async fn place_bet_mock(
        &self,
        caller: AccountId,
        match_id: MatchId,
        choice: u32,
        stake: Amount,
    ) -> Result<u32, ServiceError> {
        let mut book = self.book.write().await;
        let result = book.place_bet_mock(caller, match_id, choice, stake);
        self.publish(&mut book);
        Ok(result?)
    }

    /// See [`MatchBook::close_match`].
    pub async fn close_match(&self, caller: AccountId, match_id: MatchId) -> Result<(), ServiceError> {
        let mut book = self.book.write().await;
        let result = book.close_match(caller, match_id);
        self.publish(&mut book);
        Ok(result?)
    }

    /// Settle a match and hand its request to the oracle.
    ///
    /// The request is validated before queue capacity is reserved, and
    /// capacity is reserved before the book is touched, so a match never
    /// enters `PendingSettlement` without its request being enqueued.
    pub async fn settle_match(
        &self,
        caller: AccountId,
        match_id: MatchId,
        result: u32,
    ) -> Result<DecryptionRequest, ServiceError> {
        self.book.read().await.check_settle(caller, match_id, result)?;

        let permit = self.requests.reserve().await.map_err(|_| {
            error!("Oracle queue closed, refusing to settle match {}", match_id);
            ServiceError::OracleUnavailable
        })?;

        let mut book = self.book.write().await;
        let request = book.settle_match(caller, match_id, result);
        self.publish(&mut book);
        let request = request?;

        permit.send(request.clone());
        debug!("Queued {} for match {}", request.request_id, match_id);
        Ok(request)
    }

    /// See [`MatchBook::claim`].
    pub async fn claim(&self, caller: AccountId, match_id: MatchId) -> Result<Amount, ServiceError> {
        let mut book = self.book.write().await;
        let result = book.claim(caller, match_id, self.resolver.as_ref());
        self.publish(&mut book);
        Ok(result?)
    }

    /// Apply one oracle callback.
    pub async fn apply_callback(&self, callback: &DecryptionCallback) -> Result<[Amount; 3], ServiceError> {
        let mut book = self.book.write().await;
        let result = book.on_decryption_callback(callback);
        self.publish(&mut book);
        Ok(result?)
    }

    /// Apply callbacks until the oracle stops.
    pub async fn run_callbacks(self: Arc<Self>, mut callbacks: mpsc::Receiver<DecryptionCallback>) {
        while let Some(callback) = callbacks.recv().await {
            match self.apply_callback(&callback).await {
                Ok(totals) => debug!("Callback {} applied: {:?}", callback.request_id, totals),
                Err(ServiceError::Ledger(e)) if e.is_fatal() => {
                    error!("Fatal callback {} for match {}: {}", callback.request_id, callback.match_id, e);
                }
                Err(e) => warn!("Callback {} rejected: {}", callback.request_id, e),
            }
        }
        info!("Callback loop stopped");
    }

    fn publish(&self, book: &mut MatchBook) {
        for event in book.take_events() {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Number of matches created.
    pub async fn match_counter(&self) -> u64 {
        self.book.read().await.match_counter()
    }

    /// Public view of a match.
    pub async fn match_view(&self, match_id: MatchId) -> Option<MatchView> {
        self.book.read().await.match_view(match_id)
    }

    /// Bets by one account on a match.
    pub async fn bets_of(&self, match_id: MatchId, account: &AccountId) -> Vec<Bet> {
        self.book.read().await.bets_of(match_id, account).into_iter().cloned().collect()
    }

    /// Funds in custody.
    pub async fn funds_held(&self) -> Amount {
        self.book.read().await.funds_held()
    }

    /// Outstanding decryption requests.
    pub async fn pending_requests(&self) -> usize {
        self.book.read().await.pending_requests()
    }

    /// Hash of the full ledger state.
    pub async fn state_hash(&self) -> StateHash {
        self.book.read().await.compute_hash()
    }

    /// Capture the ledger state.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.book.read().await.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::UNIT;
    use crate::ledger::events::LedgerEventData;
    use crate::ledger::state::{MatchStatus, Outcome};
    use crate::sandbox::Sandbox;
    use std::time::Duration;

    fn acct(name: &str) -> AccountId {
        AccountId::from_subject(name)
    }

    async fn wait_for_settlement(rx: &mut broadcast::Receiver<LedgerEvent>, match_id: MatchId) -> [Amount; 3] {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("settlement timed out")
                .expect("event channel closed");
            if let LedgerEventData::SettlementFinalized { match_id: id, totals, .. } = event.data {
                if id == match_id {
                    return totals;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_settlement_round_trip() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut events = service.subscribe();
        let owner = acct("owner");

        let id = service.create_match(owner, "A vs B".into(), 0).await.unwrap();
        for (name, outcome) in [("alice", Outcome::Home), ("bob", Outcome::Away)] {
            let input = sb.encryptor.encrypt_choice(outcome, acct(name)).unwrap();
            service.place_bet(acct(name), id, &input, UNIT).await.unwrap();
        }
        service.close_match(owner, id).await.unwrap();
        service.settle_match(owner, id, 0).await.unwrap();

        assert_eq!(wait_for_settlement(&mut events, id).await, [UNIT, 0, UNIT]);
        assert_eq!(service.match_view(id).await.unwrap().status, MatchStatus::Settled);
        assert_eq!(service.pending_requests().await, 0);

        assert_eq!(service.claim(acct("alice"), id).await.unwrap(), 2 * UNIT);
        assert_eq!(service.claim(acct("bob"), id).await.unwrap(), 0);
        assert_eq!(service.funds_held().await, 0);
    }

    #[tokio::test]
    async fn test_events_broadcast_in_order() {
        let sb = Sandbox::new().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let service = LedgerService::new(sb.book(), Arc::new(sb.oracle.clone()), tx);
        let mut events = service.subscribe();

        service.create_match(acct("owner"), "m".into(), 0).await.unwrap();
        service.place_bet_mock(acct("alice"), 0, 1, UNIT).await.unwrap();
        assert!(service.place_bet_mock(acct("alice"), 9, 1, UNIT).await.is_err());

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.kind(), "match_created");
        assert_eq!(second.kind(), "bet_placed");
        assert!(second.seq > first.seq);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_settle_without_oracle_leaves_match_closed() {
        let sb = Sandbox::new().unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let service = LedgerService::new(sb.book(), Arc::new(sb.oracle.clone()), tx);
        let owner = acct("owner");

        let id = service.create_match(owner, "m".into(), 0).await.unwrap();
        service.close_match(owner, id).await.unwrap();
        assert_eq!(service.settle_match(owner, id, 0).await, Err(ServiceError::OracleUnavailable));
        assert_eq!(service.match_view(id).await.unwrap().status, MatchStatus::Closed);
    }

    #[tokio::test]
    async fn test_rejected_settle_sends_nothing() {
        let sb = Sandbox::new().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let service = LedgerService::new(sb.book(), Arc::new(sb.oracle.clone()), tx);
        let owner = acct("owner");
        let id = service.create_match(owner, "m".into(), 0).await.unwrap();

        let err = service.settle_match(owner, id, 0).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        assert!(rx.try_recv().is_err());

        // Permit was released: a valid settlement still goes through
        service.close_match(owner, id).await.unwrap();
        let request = service.settle_match(owner, id, 0).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_duplicate_callback_rejected() {
        let sb = Sandbox::new().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let service = LedgerService::new(sb.book(), Arc::new(sb.oracle.clone()), tx);
        let owner = acct("owner");
        let id = service.create_match(owner, "m".into(), 0).await.unwrap();
        service.close_match(owner, id).await.unwrap();
        service.settle_match(owner, id, 2).await.unwrap();

        let callback = sb.oracle.fulfil(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(service.apply_callback(&callback).await.unwrap(), [0, 0, 0]);
        let err = service.apply_callback(&callback).await.unwrap_err();
        assert_eq!(err.code(), "unknown_or_stale_request");
    }

    #[tokio::test]
    async fn test_concurrent_bets_serialise() {
        let sb = Sandbox::new().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let service = Arc::new(LedgerService::new(sb.book(), Arc::new(sb.oracle.clone()), tx));
        let id = service.create_match(acct("owner"), "m".into(), 0).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.place_bet_mock(acct(&format!("b{}", i)), id, i % 3, UNIT).await
            }));
        }
        let mut indices = Vec::new();
        for handle in handles {
            indices.push(handle.await.unwrap().unwrap());
        }
        indices.sort_unstable();
        assert_eq!(indices, (0..16).collect::<Vec<_>>());
        assert_eq!(service.match_view(id).await.unwrap().total_pool, 16 * UNIT);
    }

    #[tokio::test]
    async fn test_invalid_settle_does_not_wait_for_queue() {
        let sb = Sandbox::new().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let service = LedgerService::new(sb.book(), Arc::new(sb.oracle.clone()), tx);
        let owner = acct("owner");

        // Fill the only queue slot
        let first = service.create_match(owner, "first".into(), 0).await.unwrap();
        service.close_match(owner, first).await.unwrap();
        service.settle_match(owner, first, 0).await.unwrap();

        let open = service.create_match(owner, "open".into(), 0).await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(1), service.settle_match(owner, open, 0))
            .await
            .expect("invalid settle blocked on a full queue")
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[tokio::test]
    async fn test_invalid_settle_reports_ledger_error_when_oracle_gone() {
        let sb = Sandbox::new().unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let service = LedgerService::new(sb.book(), Arc::new(sb.oracle.clone()), tx);
        let owner = acct("owner");
        let id = service.create_match(owner, "m".into(), 0).await.unwrap();

        let err = service.settle_match(owner, id, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::Ledger(LedgerError::InvalidState { .. })));
        let err = service.settle_match(acct("mallory"), id, 0).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }
}
