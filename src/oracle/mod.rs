//! Decryption Oracle
//!
//! Asynchronous threshold decryption with signed callbacks.

pub mod relay;
pub mod token;

pub use relay::{DecryptionOracle, OracleError};
pub use token::{CallbackClaims, CallbackSigner, JwtCallbackAuthenticator, OracleConfig};
