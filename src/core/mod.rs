//! Core deterministic primitives.
//!
//! Integer-only payout arithmetic and domain-separated hashing shared by
//! the ledger, the homomorphic layer and the oracle.

pub mod bytes;
pub mod fixed;
pub mod hash;

// Re-export core types
pub use fixed::{Fixed, FixedNum, FIXED_ONE, FIXED_SCALE, UNIT};
pub use hash::{StateHash, StateHasher};
