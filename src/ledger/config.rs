//! Ledger configuration.

use tracing::warn;

use crate::core::bytes::decode_hex_array;
use crate::core::hash::hash_with_domain;
use crate::ledger::state::AccountId;

/// Domain for deriving a ledger id from its name.
const LEDGER_ID_DOMAIN: &[u8] = b"CONFIDENTIAL_1X2_LEDGER_V1";

/// Name used when neither `LEDGER_ID` nor `LEDGER_NAME` is set.
pub const DEFAULT_LEDGER_NAME: &str = "confidential-1x2";

/// Ledger configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Instance id that input attestations must be bound to.
    pub ledger_id: [u8; 32],
    /// Account allowed to close and settle any match, besides its creator.
    pub settlement_authority: Option<AccountId>,
    /// Accept plaintext-choice bets.
    pub demo_bets_enabled: bool,
    /// Reject bets at or after a match's deadline.
    pub enforce_deadline: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_id: ledger_id_from_name(DEFAULT_LEDGER_NAME),
            settlement_authority: None,
            demo_bets_enabled: false,
            enforce_deadline: true,
        }
    }
}

impl LedgerConfig {
    /// Create config from environment variables.
    ///
    /// - `LEDGER_ID`: 32-byte hex id, or
    /// - `LEDGER_NAME`: name the id is derived from
    /// - `LEDGER_SETTLEMENT_AUTHORITY`: UUID or subject
    /// - `LEDGER_DEMO_BETS`: `true`/`1` to accept plaintext bets
    /// - `LEDGER_ENFORCE_DEADLINE`: `false`/`0` to ignore deadlines
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ledger_id = match std::env::var("LEDGER_ID") {
            Ok(raw) => decode_hex_array::<32>(&raw).unwrap_or_else(|| {
                warn!("LEDGER_ID is not 32 hex bytes, deriving from LEDGER_NAME");
                ledger_id_from_env_name()
            }),
            Err(_) => ledger_id_from_env_name(),
        };

        Self {
            ledger_id,
            settlement_authority: std::env::var("LEDGER_SETTLEMENT_AUTHORITY")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| AccountId::parse(&v)),
            demo_bets_enabled: std::env::var("LEDGER_DEMO_BETS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.demo_bets_enabled),
            enforce_deadline: std::env::var("LEDGER_ENFORCE_DEADLINE")
                .map(|v| !(v == "false" || v == "0"))
                .unwrap_or(defaults.enforce_deadline),
        }
    }

    /// Config for a named ledger instance with demo bets on.
    pub fn for_demo(name: &str) -> Self {
        Self {
            ledger_id: ledger_id_from_name(name),
            demo_bets_enabled: true,
            ..Self::default()
        }
    }
}

/// Derive a ledger id from a human-readable name.
pub fn ledger_id_from_name(name: &str) -> [u8; 32] {
    hash_with_domain(LEDGER_ID_DOMAIN, name.as_bytes())
}

fn ledger_id_from_env_name() -> [u8; 32] {
    let name = std::env::var("LEDGER_NAME").unwrap_or_else(|_| DEFAULT_LEDGER_NAME.to_string());
    ledger_id_from_name(&name)
}
