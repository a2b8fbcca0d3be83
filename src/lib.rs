//! # Confidential 1X2 Ledger
//!
//! Betting ledger for home/draw/away markets where each bettor's choice
//! stays encrypted. Stakes are public; per-outcome totals are accumulated
//! homomorphically and revealed once, at settlement, by threshold
//! decryption.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CONFIDENTIAL 1X2 LEDGER                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── fixed.rs    - Q32.32 fixed point, floor mul-div         │
//! │  ├── hash.rs     - Domain-separated SHA-256                  │
//! │  └── bytes.rs    - Hex serde for fixed-size ids              │
//! │                                                              │
//! │  fhe/            - Homomorphic layer                         │
//! │  ├── handle.rs   - Ciphertext handles, encrypted inputs      │
//! │  ├── backend.rs  - Coprocessor and decryptor traits          │
//! │  ├── attestation.rs - Input proofs                           │
//! │  └── mock.rs     - In-process coprocessor                    │
//! │                                                              │
//! │  ledger/         - Ledger logic (synchronous)                │
//! │  ├── registry.rs - Matches and lifecycle                     │
//! │  ├── bets.rs     - Encrypted accumulation                    │
//! │  ├── settlement.rs - Decryption requests, payout ratio      │
//! │  ├── claim.rs    - Exactly-once payouts                      │
//! │  ├── book.rs     - MatchBook, the single mutation path       │
//! │  └── snapshot.rs - Hashed persistence                        │
//! │                                                              │
//! │  oracle/         - Threshold decryption and signed callbacks │
//! │                                                              │
//! │  network/        - Async service and WebSocket server        │
//! │  ├── service.rs  - Serialised access, oracle channels        │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - Client JWT validation                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Confidentiality
//!
//! The ledger never sees a plaintext choice on the confidential path:
//! - Accumulation is branch-free: `sum[o] += stake * (choice == o)`
//! - Only the three totals are ever decrypted during settlement
//! - Events and views carry stakes and totals, never choice handles
//!
//! Individual choices are decrypted only at claim time, for the claimant.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod fhe;
pub mod ledger;
pub mod network;
pub mod oracle;
pub mod sandbox;

// Re-export commonly used types
pub use crate::core::fixed::{FixedNum, UNIT};
pub use fhe::{EncryptedInput, Handle};
pub use ledger::{
    AccountId, Amount, LedgerConfig, LedgerError, LedgerEvent, MatchBook, MatchId, MatchStatus,
    MatchView, Outcome,
};
pub use network::{LedgerServer, LedgerService, ServerConfig};
pub use oracle::{DecryptionOracle, OracleConfig};
pub use sandbox::Sandbox;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
