//! Local Sandbox
//!
//! Wires a [`MatchBook`] to in-process collaborators: the mock coprocessor,
//! a keyed attestation scheme, a JWT-signing oracle, an in-memory vault and a
//! manual clock. Used by the demo binary, benchmarks and tests.

use std::sync::Arc;

use crate::fhe::{FheError, KeyedAttestationVerifier, MockBackend, MockInputEncryptor};
use crate::ledger::{
    DecryptionRequest, InMemoryVault, LedgerConfig, LedgerDeps, LedgerError, ManualClock, MatchBook,
};
use crate::oracle::{DecryptionOracle, JwtCallbackAuthenticator, OracleConfig, OracleError};

/// Clock start for sandboxes (2023-11-14T22:13:20Z).
pub const SANDBOX_EPOCH: i64 = 1_700_000_000;

/// In-process collaborators for one ledger instance.
pub struct Sandbox {
    /// Ledger configuration
    pub config: LedgerConfig,
    /// Coprocessor
    pub fhe: Arc<MockBackend>,
    /// Client-side encryption
    pub encryptor: MockInputEncryptor,
    /// Attestation key shared by encryptor and ledger
    pub attestations: KeyedAttestationVerifier,
    /// Decryption oracle
    pub oracle: DecryptionOracle,
    /// Oracle configuration
    pub oracle_config: OracleConfig,
    /// Funds custody
    pub vault: Arc<InMemoryVault>,
    /// Time source
    pub clock: Arc<ManualClock>,
}

impl Sandbox {
    /// Sandbox with demo bets on and fixed development secrets.
    pub fn new() -> Result<Self, OracleError> {
        Self::with_parts(
            LedgerConfig::for_demo("sandbox"),
            KeyedAttestationVerifier::from_passphrase("sandbox-coprocessor"),
            OracleConfig::with_secret("sandbox-oracle-secret-0123456789"),
            InMemoryVault::new(),
        )
    }

    /// Sandbox from explicit parts.
    pub fn with_parts(
        config: LedgerConfig,
        attestations: KeyedAttestationVerifier,
        oracle_config: OracleConfig,
        vault: InMemoryVault,
    ) -> Result<Self, OracleError> {
        let fhe = Arc::new(MockBackend::new());
        let encryptor = MockInputEncryptor::new(fhe.clone(), attestations.clone(), config.ledger_id);
        let oracle = DecryptionOracle::new(fhe.clone(), &oracle_config)?;
        Ok(Self {
            config,
            fhe,
            encryptor,
            attestations,
            oracle,
            oracle_config,
            vault: Arc::new(vault),
            clock: Arc::new(ManualClock::new(SANDBOX_EPOCH)),
        })
    }

    /// Collaborators for a book.
    pub fn deps(&self) -> LedgerDeps {
        LedgerDeps {
            fhe: self.fhe.clone(),
            attestations: Arc::new(self.attestations.clone()),
            callbacks: Arc::new(JwtCallbackAuthenticator::from_config(&self.oracle_config)),
            vault: self.vault.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Fresh book wired to this sandbox.
    pub fn book(&self) -> MatchBook {
        MatchBook::new(self.config.clone(), self.deps())
    }

    /// Fulfil a request through the oracle and apply the callback immediately.
    pub fn settle_now(&self, book: &mut MatchBook, request: &DecryptionRequest) -> Result<[u64; 3], LedgerError> {
        let callback = self
            .oracle
            .fulfil(request)
            .map_err(|e| LedgerError::Backend(FheError::Coprocessor(e.to_string())))?;
        book.on_decryption_callback(&callback)
    }
}
