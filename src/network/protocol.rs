//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Control messages are JSON (`type`-tagged, snake_case). A confidential
//! bet may also be sent as a binary frame: a bincode-encoded
//! [`PlaceBetFrame`].

use serde::{Deserialize, Serialize};

use crate::fhe::EncryptedInput;
use crate::ledger::error::LedgerError;
use crate::ledger::events::LedgerEvent;
use crate::ledger::settlement::RequestId;
use crate::ledger::state::{AccountId, Amount, MatchId, MatchView};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with an identity-provider JWT.
    Auth(AuthRequest),

    /// Open a new match. `deadline` is unix seconds, 0 for none.
    CreateMatch {
        /// Human-readable description
        metadata: String,
        /// Betting deadline
        #[serde(default)]
        deadline: u64,
    },

    /// Place a confidential bet.
    PlaceBet(PlaceBetFrame),

    /// Encrypt a choice with the server's in-process coprocessor (sandbox
    /// servers only). The returned input is bound to the caller.
    EncryptChoice {
        /// 0 = home, 1 = draw, 2 = away
        choice: u32,
    },

    /// Place a plaintext bet (demo ledgers only).
    PlaceBetMock {
        /// Target match
        match_id: MatchId,
        /// 0 = home, 1 = draw, 2 = away
        choice: u32,
        /// Stake in base units
        stake: Amount,
    },

    /// Stop accepting bets.
    CloseMatch {
        /// Target match
        match_id: MatchId,
    },

    /// Declare the result and start settlement.
    SettleMatch {
        /// Target match
        match_id: MatchId,
        /// 0 = home, 1 = draw, 2 = away
        result: u32,
    },

    /// Collect winnings on a settled match.
    Claim {
        /// Target match
        match_id: MatchId,
    },

    /// Number of matches created.
    MatchCounter,

    /// Public view of one match.
    GetMatch {
        /// Target match
        match_id: MatchId,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Whether the message needs an authenticated connection.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            ClientMessage::Auth(_)
                | ClientMessage::MatchCounter
                | ClientMessage::GetMatch { .. }
                | ClientMessage::Ping { .. }
        )
    }
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT from the identity provider.
    pub token: String,
    /// Client version for compatibility check.
    pub client_version: String,
}

/// A confidential bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceBetFrame {
    /// Target match
    pub match_id: MatchId,
    /// Encrypted choice with its attestation
    pub input: EncryptedInput,
    /// Stake in base units
    pub stake: Amount,
}

impl PlaceBetFrame {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Encrypted choice, ready for `place_bet`.
    EncryptedChoice {
        /// Handle and attestation
        input: EncryptedInput,
    },

    /// Match opened.
    MatchCreated {
        /// New match id
        match_id: MatchId,
    },

    /// Bet recorded.
    BetAccepted {
        /// Match
        match_id: MatchId,
        /// Index of the bet within the match
        bet_index: u32,
    },

    /// Match closed for betting.
    MatchClosed {
        /// Match
        match_id: MatchId,
    },

    /// Settlement started; totals will follow as an event.
    SettlementRequested {
        /// Match
        match_id: MatchId,
        /// Decryption request id
        request_id: RequestId,
    },

    /// Claim paid.
    ClaimResult {
        /// Match
        match_id: MatchId,
        /// Amount transferred
        amount: Amount,
    },

    /// Number of matches created.
    MatchCounter {
        /// Count
        count: u64,
    },

    /// Public match view.
    MatchInfo(MatchView),

    /// Ledger event broadcast.
    Event(LedgerEvent),

    /// Pong response.
    Pong {
        /// Client timestamp
        timestamp: u64,
        /// Server unix millis
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Ledger account bound to the connection.
    pub account: Option<AccountId>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Stable snake_case code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Protocol-level error codes. Ledger rejections use [`LedgerError::code`].
pub mod codes {
    /// Token rejected.
    pub const AUTH_FAILED: &str = "auth_failed";
    /// Operation needs authentication.
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    /// Unparseable message.
    pub const INVALID_MESSAGE: &str = "invalid_message";
    /// Match does not exist.
    pub const MATCH_NOT_FOUND: &str = "match_not_found";
    /// Oracle request queue unavailable.
    pub const ORACLE_UNAVAILABLE: &str = "oracle_unavailable";
    /// Connection limit reached.
    pub const SERVER_OVERLOADED: &str = "server_overloaded";
    /// Server offers no input encryption.
    pub const ENCRYPTION_UNAVAILABLE: &str = "encryption_unavailable";
    /// Plaintext outside the certified domain.
    pub const INVALID_INPUT: &str = "invalid_input";
}

impl ServerError {
    /// Error with a code and message.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<&LedgerError> for ServerError {
    fn from(err: &LedgerError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Error message from a code and text.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }
}
