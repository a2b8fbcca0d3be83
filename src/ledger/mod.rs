//! Confidential Betting Ledger
//!
//! Match lifecycle, encrypted per-outcome accounting, asynchronous
//! settlement and exactly-once claims.

pub mod bets;
pub mod book;
pub mod claim;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod settlement;
pub mod snapshot;
pub mod state;
pub mod vault;

// Re-export commonly used types
pub use book::{LedgerDeps, MatchBook};
pub use claim::{ChoiceResolver, ClaimPlan, ClaimProcessor, ResolveError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use events::{LedgerEvent, LedgerEventData};
pub use settlement::{
    CallbackAuthError, CallbackAuthenticator, DecryptionCallback, DecryptionRequest,
    PayoutRatio, PayoutRule, RequestId,
};
pub use snapshot::{LedgerSnapshot, SnapshotError};
pub use state::{AccountId, Amount, Bet, Match, MatchId, MatchStatus, MatchView, Outcome};
pub use vault::{FundsTransfer, InMemoryVault, TransferError};
