//! Confidential 1X2 Ledger Server
//!
//! Serves the ledger over WebSocket, backed by the in-process coprocessor
//! and decryption oracle. `--demo` runs a three-bettor match end to end
//! and exits.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use confidential_1x2::{
    core::fixed::units_to_float,
    fhe::KeyedAttestationVerifier,
    ledger::{events::LedgerEventData, InMemoryVault, LedgerConfig, SystemClock},
    network::{service::ORACLE_QUEUE_CAPACITY, LedgerServer, LedgerService, ServerConfig},
    oracle::OracleConfig,
    AccountId, MatchBook, Outcome, Sandbox, UNIT, VERSION,
};

/// Attestation passphrase used when `COPROCESSOR_KEY` is unset.
const DEV_COPROCESSOR_KEY: &str = "confidential-1x2-dev-coprocessor";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Confidential 1X2 Ledger v{}", VERSION);

    match std::env::args().nth(1).as_deref() {
        Some("--demo") => demo().await,
        None => serve().await,
        Some(other) => bail!("unknown argument {:?} (expected --demo)", other),
    }
}

async fn serve() -> Result<()> {
    let ledger_config = LedgerConfig::from_env();
    let server_config = ServerConfig::from_env();

    let mut oracle_config = OracleConfig::from_env();
    if oracle_config.secret.is_none() {
        warn!("ORACLE_SECRET not set, using an ephemeral callback secret");
        oracle_config.secret = Some(uuid::Uuid::new_v4().simple().to_string());
    }

    let passphrase = std::env::var("COPROCESSOR_KEY").unwrap_or_else(|_| {
        warn!("COPROCESSOR_KEY not set, using the development attestation key");
        DEV_COPROCESSOR_KEY.to_string()
    });

    info!(
        "Ledger {} (demo bets: {}, deadlines: {})",
        hex::encode(&ledger_config.ledger_id[..8]),
        ledger_config.demo_bets_enabled,
        ledger_config.enforce_deadline
    );

    let sandbox = Sandbox::with_parts(
        ledger_config.clone(),
        KeyedAttestationVerifier::from_passphrase(&passphrase),
        oracle_config,
        InMemoryVault::new(),
    )
    .context("failed to start decryption oracle")?;

    let mut deps = sandbox.deps();
    deps.clock = Arc::new(SystemClock);
    let book = MatchBook::new(ledger_config, deps);

    let (service, _tasks) = LedgerService::start(book, sandbox.oracle.clone(), ORACLE_QUEUE_CAPACITY);
    let sandbox_encryption = server_config.sandbox_encryption;
    let mut server = LedgerServer::new(server_config, service);
    if sandbox_encryption {
        info!("Serving encrypt_choice from the in-process coprocessor");
        server = server.with_input_encryptor(sandbox.encryptor.clone());
    } else {
        warn!("SERVER_SANDBOX_ENCRYPTION off: remote clients cannot encrypt for the in-process coprocessor, so place_bet will fail");
    }
    let server = Arc::new(server);

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}

/// Three bettors, one unit each on home/draw/away; home wins.
async fn demo() -> Result<()> {
    info!("=== Starting Demo Match ===");

    let sandbox = Sandbox::new().context("failed to build sandbox")?;
    let (service, _tasks) = LedgerService::start(sandbox.book(), sandbox.oracle.clone(), ORACLE_QUEUE_CAPACITY);
    let mut events = service.subscribe();

    let owner = AccountId::from_subject("demo-owner");
    let bettors = [
        (AccountId::from_subject("home-fan"), Outcome::Home),
        (AccountId::from_subject("draw-fan"), Outcome::Draw),
        (AccountId::from_subject("away-fan"), Outcome::Away),
    ];

    let match_id = service.create_match(owner, "Home FC vs Away United".to_string(), 0).await?;
    info!("Match {} created", match_id);

    for (bettor, outcome) in &bettors {
        let input = sandbox.encryptor.encrypt_choice(*outcome, *bettor)?;
        let index = service.place_bet(*bettor, match_id, &input, UNIT).await?;
        info!("{} placed bet {} with an encrypted choice", bettor, index);
    }

    service.close_match(owner, match_id).await?;
    let request = service.settle_match(owner, match_id, Outcome::Home.index() as u32).await?;
    info!("Settlement requested: {}", request.request_id);

    let totals = loop {
        let event = events.recv().await.context("event stream closed")?;
        if let LedgerEventData::SettlementFinalized { match_id: id, totals, .. } = event.data {
            if id == match_id {
                break totals;
            }
        }
    };
    info!(
        "Totals revealed: home {:.2}, draw {:.2}, away {:.2}",
        units_to_float(totals[0]),
        units_to_float(totals[1]),
        units_to_float(totals[2])
    );

    for (bettor, outcome) in &bettors {
        let paid = service.claim(*bettor, match_id).await?;
        info!("{} ({}) claimed {:.2}", bettor, outcome, units_to_float(paid));
    }

    match service.claim(bettors[0].0, match_id).await {
        Err(e) => info!("Second claim rejected: {}", e),
        Ok(_) => bail!("second claim was paid"),
    }

    info!("Funds held after claims: {:.2}", units_to_float(service.funds_held().await));
    info!("Final state hash: {}", hex::encode(service.state_hash().await));
    Ok(())
}
