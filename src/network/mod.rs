//! Network Layer
//!
//! Async service around the ledger and its WebSocket front.

pub mod auth;
pub mod protocol;
pub mod server;
pub mod service;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{AuthRequest, AuthResult, ClientMessage, PlaceBetFrame, ServerError, ServerMessage};
pub use server::{LedgerServer, LedgerServerError, ServerConfig};
pub use service::{LedgerService, ServiceError, ServiceTasks};
