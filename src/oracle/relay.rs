//! Decryption Oracle
//!
//! Services decryption requests off the ledger's critical path:
//!
//! ```text
//!  ledger ──DecryptionRequest──► [mpsc] ──► oracle task
//!                                              │ decrypt_many(handles)
//!                                              │ sign(request_id, match, cleartexts)
//!  ledger ◄──DecryptionCallback── [mpsc] ◄─────┘
//! ```
//!
//! The oracle also resolves individual bet choices at claim time.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::fhe::{FheError, Handle, ThresholdDecryptor};
use crate::ledger::claim::{ChoiceResolver, ResolveError};
use crate::ledger::settlement::{CallbackAuthError, DecryptionCallback, DecryptionRequest};
use crate::ledger::state::{MatchId, Outcome};
use crate::oracle::token::{CallbackSigner, OracleConfig};

/// Oracle failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Decryption failed.
    #[error("decryption failed: {0}")]
    Decryption(#[from] FheError),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(#[from] CallbackAuthError),

    /// Coprocessor returned the wrong number of plaintexts.
    #[error("expected 3 plaintexts, got {0}")]
    Arity(usize),
}

/// Threshold-decryption oracle.
#[derive(Clone)]
pub struct DecryptionOracle {
    decryptor: Arc<dyn ThresholdDecryptor>,
    signer: CallbackSigner,
    latency: Duration,
}

impl DecryptionOracle {
    /// Create an oracle. Fails if no signing secret is configured.
    pub fn new(decryptor: Arc<dyn ThresholdDecryptor>, config: &OracleConfig) -> Result<Self, OracleError> {
        Ok(Self {
            decryptor,
            signer: CallbackSigner::from_config(config)?,
            latency: config.latency,
        })
    }

    /// Decrypt and sign one request.
    pub fn fulfil(&self, request: &DecryptionRequest) -> Result<DecryptionCallback, OracleError> {
        let plain = self.decryptor.decrypt_many(&request.handles)?;
        let cleartexts: [u64; 3] = plain.as_slice().try_into().map_err(|_| OracleError::Arity(plain.len()))?;
        let signature = self.signer.sign(&request.request_id, request.match_id, &cleartexts)?;
        Ok(DecryptionCallback {
            request_id: request.request_id,
            match_id: request.match_id,
            cleartexts,
            signature,
        })
    }

    /// Run until the request channel closes or the ledger stops listening.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<DecryptionRequest>,
        callbacks: mpsc::Sender<DecryptionCallback>,
    ) {
        info!("Decryption oracle started (latency {:?})", self.latency);

        while let Some(request) = requests.recv().await {
            debug!("Decrypting totals of match {} for {}", request.match_id, request.request_id);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            match self.fulfil(&request) {
                Ok(callback) => {
                    if callbacks.send(callback).await.is_err() {
                        warn!("Callback channel closed, stopping oracle");
                        break;
                    }
                }
                Err(e) => {
                    // Request stays pending on the ledger
                    error!("Failed to fulfil {} for match {}: {}", request.request_id, request.match_id, e);
                }
            }
        }

        info!("Decryption oracle stopped");
    }

    /// Spawn [`DecryptionOracle::run`] with fresh channels.
    ///
    /// Returns the request sender and the callback receiver.
    pub fn spawn(
        self,
        capacity: usize,
    ) -> (
        mpsc::Sender<DecryptionRequest>,
        mpsc::Receiver<DecryptionCallback>,
        tokio::task::JoinHandle<()>,
    ) {
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (callback_tx, callback_rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(self.run(request_rx, callback_tx));
        (request_tx, callback_rx, handle)
    }
}

impl ChoiceResolver for DecryptionOracle {
    fn resolve_choice(&self, match_id: MatchId, choice: &Handle) -> Result<Outcome, ResolveError> {
        let value = self.decryptor.decrypt(choice)?;
        debug!("Resolved choice {} on match {}", choice, match_id);
        Outcome::from_index(value).ok_or(ResolveError::OutOfDomain(value))
    }
}
