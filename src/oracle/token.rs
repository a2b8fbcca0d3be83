//! Callback Tokens
//!
//! The oracle signs each decryption callback with an HS256 JWT whose claims
//! bind the request id and a digest of the match id and cleartexts. The
//! ledger accepts a callback only if the token verifies and covers exactly
//! what the callback carries.

use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::core::hash::digest_eq;
use crate::core::bytes::decode_hex_array;
use crate::ledger::settlement::{
    callback_digest, CallbackAuthError, CallbackAuthenticator, DecryptionCallback, RequestId,
};
use crate::ledger::state::MatchId;

/// Issuer used when none is configured.
pub const DEFAULT_ORACLE_ISSUER: &str = "confidential-1x2-oracle";

/// Oracle configuration.
#[derive(Clone, Debug)]
pub struct OracleConfig {
    /// HS256 secret shared by the oracle and the ledger.
    pub secret: Option<String>,
    /// Issuer claim written by the oracle and required by the ledger.
    pub issuer: String,
    /// Simulated decryption latency.
    pub latency: Duration,
    /// Lifetime of a callback token.
    pub token_ttl: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: DEFAULT_ORACLE_ISSUER.to_string(),
            latency: Duration::from_millis(0),
            token_ttl: Duration::from_secs(300),
        }
    }
}

impl OracleConfig {
    /// Create config from environment variables.
    ///
    /// `ORACLE_SECRET`, `ORACLE_ISSUER`, `ORACLE_LATENCY_MS`, `ORACLE_TOKEN_TTL_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret: std::env::var("ORACLE_SECRET").ok(),
            issuer: std::env::var("ORACLE_ISSUER").unwrap_or(defaults.issuer),
            latency: std::env::var("ORACLE_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.latency),
            token_ttl: std::env::var("ORACLE_TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_ttl),
        }
    }

    /// Config with a secret set.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Self::default()
        }
    }
}

/// Claims carried by a callback token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackClaims {
    /// Issuer (the oracle).
    pub iss: String,
    /// Request id, hex.
    pub rid: String,
    /// Match id.
    pub mid: MatchId,
    /// Callback digest, hex.
    pub dig: String,
    /// Issued at (unix seconds).
    pub iat: u64,
    /// Expiry (unix seconds).
    pub exp: u64,
}

/// Signs callbacks on the oracle side.
#[derive(Clone)]
pub struct CallbackSigner {
    key: EncodingKey,
    issuer: String,
    ttl: Duration,
}

impl CallbackSigner {
    /// Build from config. Fails if no secret is configured.
    pub fn from_config(config: &OracleConfig) -> Result<Self, CallbackAuthError> {
        let secret = config.secret.as_ref().ok_or(CallbackAuthError::NotConfigured)?;
        Ok(Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            issuer: config.issuer.clone(),
            ttl: config.token_ttl,
        })
    }

    /// Sign a callback for `request_id` carrying `cleartexts`.
    pub fn sign(
        &self,
        request_id: &RequestId,
        match_id: MatchId,
        cleartexts: &[u64; 3],
    ) -> Result<String, CallbackAuthError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let claims = CallbackClaims {
            iss: self.issuer.clone(),
            rid: request_id.to_hex(),
            mid: match_id,
            dig: hex::encode(callback_digest(request_id, match_id, cleartexts)),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| CallbackAuthError::InvalidSignature(e.to_string()))
    }
}

/// Ledger-side verification of callback tokens.
#[derive(Clone)]
pub struct JwtCallbackAuthenticator {
    key: Option<DecodingKey>,
    issuer: String,
}

impl JwtCallbackAuthenticator {
    /// Build from config. Without a secret every callback is rejected.
    pub fn from_config(config: &OracleConfig) -> Self {
        Self {
            key: config.secret.as_ref().map(|s| DecodingKey::from_secret(s.as_bytes())),
            issuer: config.issuer.clone(),
        }
    }
}

impl CallbackAuthenticator for JwtCallbackAuthenticator {
    fn authenticate(&self, callback: &DecryptionCallback) -> Result<(), CallbackAuthError> {
        let key = self.key.as_ref().ok_or(CallbackAuthError::NotConfigured)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;
        validation.leeway = 0;

        let claims = decode::<CallbackClaims>(&callback.signature, key, &validation)
            .map_err(map_jwt_error)?
            .claims;

        let expected = callback_digest(&callback.request_id, callback.match_id, &callback.cleartexts);
        let signed = decode_hex_array::<32>(&claims.dig).ok_or(CallbackAuthError::Mismatch)?;
        if claims.rid != callback.request_id.to_hex()
            || claims.mid != callback.match_id
            || !digest_eq(&signed, &expected)
        {
            return Err(CallbackAuthError::Mismatch);
        }
        Ok(())
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CallbackAuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => CallbackAuthError::Expired,
        _ => CallbackAuthError::InvalidSignature(err.to_string()),
    }
}
