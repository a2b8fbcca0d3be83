//! WebSocket Ledger Server
//!
//! Async WebSocket front for a [`LedgerService`]. Each connection
//! authenticates with a JWT, issues ledger operations and receives every
//! ledger event as it is committed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::fhe::attestation::PLACE_BET_OPERATION;
use crate::fhe::{FheError, MockInputEncryptor};
use crate::ledger::state::{AccountId, Outcome};
use crate::network::auth::{validate_token, AuthConfig};
use crate::network::protocol::{
    codes, AuthRequest, AuthResult, ClientMessage, PlaceBetFrame, ServerMessage,
};
use crate::network::service::{LedgerService, ServiceError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Disconnect clients silent for this long.
    pub idle_timeout: Duration,
    /// Client token validation.
    pub auth: AuthConfig,
    /// Serve `encrypt_choice` from the in-process coprocessor.
    pub sandbox_encryption: bool,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            auth: AuthConfig::default(),
            sandbox_encryption: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// `SERVER_BIND_ADDR`, `SERVER_MAX_CONNECTIONS`, `SERVER_IDLE_TIMEOUT_SECS`,
    /// `SERVER_SANDBOX_ENCRYPTION` plus the `AUTH_*` variables of
    /// [`AuthConfig::from_env`].
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("SERVER_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("SERVER_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            idle_timeout: std::env::var("SERVER_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            auth: AuthConfig::from_env(),
            sandbox_encryption: std::env::var("SERVER_SANDBOX_ENCRYPTION")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.sandbox_encryption),
            version: defaults.version,
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Account bound by the last successful auth.
    account: Option<AccountId>,
    /// Connection time.
    connected_at: Instant,
}

/// The ledger server.
pub struct LedgerServer {
    config: ServerConfig,
    service: Arc<LedgerService>,
    encryptor: Option<MockInputEncryptor>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LedgerServer {
    /// Create a server in front of `service`.
    pub fn new(config: ServerConfig, service: Arc<LedgerService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        if !config.auth.is_configured() {
            warn!("Client authentication not configured: every mutating request will be refused");
        }
        Self {
            config,
            service,
            encryptor: None,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Answer `encrypt_choice` with `encryptor`.
    ///
    /// The coprocessor sees every plaintext choice it encrypts; only for
    /// sandbox deployments whose coprocessor is in-process anyway.
    pub fn with_input_encryptor(mut self, encryptor: MockInputEncryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Run the server until [`LedgerServer::shutdown`].
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), LedgerServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Ledger server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if !self.admit(addr).await {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Register a connection slot, checked and taken under one lock.
    async fn admit(&self, addr: SocketAddr) -> bool {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_connections {
            return false;
        }
        clients.insert(addr, ConnectedClient {
            account: None,
            connected_at: Instant::now(),
        });
        true
    }

    /// Handle a new WebSocket connection. The slot was taken by `admit`.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let service = self.service.clone();
        let config = self.config.clone();
        let encryptor = self.encryptor.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let served =
                Self::serve_client(stream, addr, &clients, &service, &config, encryptor.as_ref(), shutdown_rx).await;
            if let Err(e) = served {
                error!("Connection {} failed: {}", addr, e);
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                info!("Client {} cleaned up after {:?}", addr, client.connected_at.elapsed());
            }
        });
    }

    async fn serve_client(
        stream: TcpStream,
        addr: SocketAddr,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        service: &Arc<LedgerService>,
        config: &ServerConfig,
        encryptor: Option<&MockInputEncryptor>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), LedgerServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

        // Outbound writer
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        // Ledger event forwarding
        let mut events = service.subscribe();
        let event_tx = msg_tx.clone();
        let event_task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event_tx.send(ServerMessage::Event(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagging, {} events dropped", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut account: Option<AccountId> = None;

        loop {
            tokio::select! {
                msg = tokio::time::timeout(config.idle_timeout, ws_receiver.next()) => {
                    let client_msg = match msg {
                        Err(_) => {
                            info!("Client {} idle, disconnecting", addr);
                            break;
                        }
                        Ok(Some(Ok(Message::Text(text)))) => match ClientMessage::from_json(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                let _ = msg_tx
                                    .send(ServerMessage::error(codes::INVALID_MESSAGE, "Invalid message format"))
                                    .await;
                                continue;
                            }
                        },
                        Ok(Some(Ok(Message::Binary(data)))) => match PlaceBetFrame::from_bytes(&data) {
                            Ok(frame) => ClientMessage::PlaceBet(frame),
                            Err(e) => {
                                debug!("Invalid binary frame from {}: {}", addr, e);
                                let _ = msg_tx
                                    .send(ServerMessage::error(codes::INVALID_MESSAGE, "Invalid bet frame"))
                                    .await;
                                continue;
                            }
                        },
                        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Ok(Some(Err(e))) => {
                            error!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        Ok(Some(Ok(_))) => continue,
                    };

                    let reply = Self::handle_client_message(service, config, encryptor, &mut account, client_msg).await;
                    if let ServerMessage::AuthResult(_) = reply {
                        if let Some(client) = clients.write().await.get_mut(&addr) {
                            client.account = account;
                        }
                    }
                    if msg_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = msg_tx.send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    }).await;
                    break;
                }
            }
        }

        event_task.abort();
        drop(msg_tx);
        // Let queued replies flush
        let _ = sender_task.await;
        Ok(())
    }

    /// Handle a client message and produce the reply.
    async fn handle_client_message(
        service: &LedgerService,
        config: &ServerConfig,
        encryptor: Option<&MockInputEncryptor>,
        account: &mut Option<AccountId>,
        msg: ClientMessage,
    ) -> ServerMessage {
        match Self::dispatch(service, config, encryptor, account, msg).await {
            Ok(reply) | Err(reply) => reply,
        }
    }

    async fn dispatch(
        service: &LedgerService,
        config: &ServerConfig,
        encryptor: Option<&MockInputEncryptor>,
        account: &mut Option<AccountId>,
        msg: ClientMessage,
    ) -> Result<ServerMessage, ServerMessage> {
        let reply = match msg {
            ClientMessage::Auth(auth) => {
                let reply = Self::handle_auth(auth, config);
                // Any failed auth leaves the connection anonymous
                *account = match &reply {
                    ServerMessage::AuthResult(AuthResult { success: true, account: Some(id), .. }) => Some(*id),
                    _ => None,
                };
                reply
            }
            ClientMessage::EncryptChoice { choice } => {
                let submitter = require_account(account)?;
                let encryptor = encryptor.ok_or_else(|| {
                    ServerMessage::error(codes::ENCRYPTION_UNAVAILABLE, "Server does not encrypt inputs")
                })?;
                let input = encryptor
                    .encrypt(u64::from(choice), submitter, PLACE_BET_OPERATION, Outcome::MAX_INDEX)
                    .map_err(|e| match e {
                        FheError::OutOfRange { .. } => ServerMessage::error(codes::INVALID_INPUT, e.to_string()),
                        other => {
                            error!("Input encryption failed: {}", other);
                            ServerMessage::error(codes::ENCRYPTION_UNAVAILABLE, other.to_string())
                        }
                    })?;
                ServerMessage::EncryptedChoice { input }
            }
            ClientMessage::CreateMatch { metadata, deadline } => {
                let match_id = service.create_match(require_account(account)?, metadata, deadline).await.map_err(reject)?;
                ServerMessage::MatchCreated { match_id }
            }
            ClientMessage::PlaceBet(frame) => {
                let bet_index = service
                    .place_bet(require_account(account)?, frame.match_id, &frame.input, frame.stake)
                    .await
                    .map_err(reject)?;
                ServerMessage::BetAccepted { match_id: frame.match_id, bet_index }
            }
            ClientMessage::PlaceBetMock { match_id, choice, stake } => {
                let bet_index = service.place_bet_mock(require_account(account)?, match_id, choice, stake).await.map_err(reject)?;
                ServerMessage::BetAccepted { match_id, bet_index }
            }
            ClientMessage::CloseMatch { match_id } => {
                service.close_match(require_account(account)?, match_id).await.map_err(reject)?;
                ServerMessage::MatchClosed { match_id }
            }
            ClientMessage::SettleMatch { match_id, result } => {
                let request = service.settle_match(require_account(account)?, match_id, result).await.map_err(reject)?;
                ServerMessage::SettlementRequested { match_id, request_id: request.request_id }
            }
            ClientMessage::Claim { match_id } => {
                let amount = service.claim(require_account(account)?, match_id).await.map_err(reject)?;
                ServerMessage::ClaimResult { match_id, amount }
            }
            ClientMessage::MatchCounter => ServerMessage::MatchCounter {
                count: service.match_counter().await,
            },
            ClientMessage::GetMatch { match_id } => match service.match_view(match_id).await {
                Some(view) => ServerMessage::MatchInfo(view),
                None => {
                    return Err(ServerMessage::error(
                        codes::MATCH_NOT_FOUND,
                        format!("match {} does not exist", match_id),
                    ))
                }
            },
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            },
        };
        Ok(reply)
    }

    /// Validate a token and build the auth reply.
    fn handle_auth(auth: AuthRequest, config: &ServerConfig) -> ServerMessage {
        let result = match validate_token(&auth.token, &config.auth) {
            Ok(claims) => {
                let account = claims.account_id();
                debug!("Authenticated {} (client {})", account, auth.client_version);
                AuthResult {
                    success: true,
                    account: Some(account),
                    error: None,
                    server_version: config.version.clone(),
                }
            }
            Err(e) => {
                warn!("Authentication failed: {}", e);
                AuthResult {
                    success: false,
                    account: None,
                    error: Some(e.to_string()),
                    server_version: config.version.clone(),
                }
            }
        };
        ServerMessage::AuthResult(result)
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get authenticated connection count.
    pub async fn authenticated_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.account.is_some()).count()
    }
}

fn require_account(account: &Option<AccountId>) -> Result<AccountId, ServerMessage> {
    account.ok_or_else(|| ServerMessage::error(codes::NOT_AUTHENTICATED, "Must authenticate first"))
}

fn reject(err: ServiceError) -> ServerMessage {
    debug!("Operation rejected: {}", err);
    ServerMessage::error(err.code(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::UNIT;
    use crate::ledger::state::{MatchStatus, Outcome};
    use crate::network::auth::TokenClaims;
    use crate::network::protocol::ServerError;
    use crate::sandbox::Sandbox;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    const SECRET: &str = "server-test-secret-256-bits-long";

    fn config() -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            auth: AuthConfig::with_secret(SECRET),
            ..Default::default()
        }
    }

    fn auth_message(sub: &str) -> ClientMessage {
        let now = chrono::Utc::now().timestamp() as u64;
        let claims = TokenClaims { sub: sub.into(), exp: now + 600, iat: now, iss: None, aud: None };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        ClientMessage::Auth(AuthRequest { token, client_version: "test".into() })
    }

    async fn send(service: &LedgerService, account: &mut Option<AccountId>, msg: ClientMessage) -> ServerMessage {
        LedgerServer::handle_client_message(service, &config(), None, account, msg).await
    }

    fn code_of(reply: &ServerMessage) -> Option<&str> {
        match reply {
            ServerMessage::Error(ServerError { code, .. }) => Some(code),
            _ => None,
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(!config.auth.is_configured());
        assert!(!config.sandbox_encryption);
    }

    #[tokio::test]
    async fn test_server_creation_and_shutdown() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let server = LedgerServer::new(config(), service);
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.authenticated_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_mutations_require_auth() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut account = None;

        let create = ClientMessage::CreateMatch { metadata: "A vs B".into(), deadline: 0 };
        let reply = send(&service, &mut account, create).await;
        assert_eq!(code_of(&reply), Some(codes::NOT_AUTHENTICATED));

        let reply = send(&service, &mut account, ClientMessage::MatchCounter).await;
        assert_eq!(reply, ServerMessage::MatchCounter { count: 0 });
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut account = None;
        let msg = ClientMessage::Auth(AuthRequest { token: "garbage".into(), client_version: "test".into() });

        let reply = send(&service, &mut account, msg).await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: false, .. })));
        assert!(account.is_none());
    }

    #[tokio::test]
    async fn test_failed_reauth_drops_identity() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut account = None;

        send(&service, &mut account, auth_message("alice")).await;
        assert_eq!(account, Some(AccountId::from_subject("alice")));

        let garbage = ClientMessage::Auth(AuthRequest { token: "garbage".into(), client_version: "test".into() });
        let reply = send(&service, &mut account, garbage).await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: false, .. })));
        assert!(account.is_none());

        let create = ClientMessage::CreateMatch { metadata: "A vs B".into(), deadline: 0 };
        let reply = send(&service, &mut account, create).await;
        assert_eq!(code_of(&reply), Some(codes::NOT_AUTHENTICATED));
        assert_eq!(service.match_counter().await, 0);
    }

    #[tokio::test]
    async fn test_confidential_bet_with_server_encryption() {
        // The server's own coprocessor, reached only through messages
        let sb = Sandbox::new().unwrap();
        let encryptor = sb.encryptor.clone();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let cfg = config();
        let mut owner = None;
        let mut alice = None;
        let mut bob = None;
        for (account, name) in [(&mut owner, "owner"), (&mut alice, "alice"), (&mut bob, "bob")] {
            LedgerServer::handle_client_message(&service, &cfg, Some(&encryptor), account, auth_message(name)).await;
        }

        let create = ClientMessage::CreateMatch { metadata: "A vs B".into(), deadline: 0 };
        LedgerServer::handle_client_message(&service, &cfg, Some(&encryptor), &mut owner, create).await;

        let reply = LedgerServer::handle_client_message(
            &service,
            &cfg,
            Some(&encryptor),
            &mut alice,
            ClientMessage::EncryptChoice { choice: 2 },
        )
        .await;
        let input = match reply {
            ServerMessage::EncryptedChoice { input } => input,
            other => panic!("unexpected reply {:?}", other),
        };
        assert_eq!(input.attestation.submitter, AccountId::from_subject("alice"));

        // Bound to alice: bob cannot replay it
        let frame = PlaceBetFrame { match_id: 0, input: input.clone(), stake: UNIT };
        let reply = send(&service, &mut bob, ClientMessage::PlaceBet(frame.clone())).await;
        assert!(code_of(&reply).is_some());

        let bytes = frame.to_bytes().unwrap();
        let frame = PlaceBetFrame::from_bytes(&bytes).unwrap();
        let reply = send(&service, &mut alice, ClientMessage::PlaceBet(frame)).await;
        assert_eq!(reply, ServerMessage::BetAccepted { match_id: 0, bet_index: 0 });

        let reply = LedgerServer::handle_client_message(
            &service,
            &cfg,
            Some(&encryptor),
            &mut alice,
            ClientMessage::EncryptChoice { choice: 7 },
        )
        .await;
        assert_eq!(code_of(&reply), Some(codes::INVALID_INPUT));
    }

    #[tokio::test]
    async fn test_encryption_unavailable_without_encryptor() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut account = None;

        let reply = send(&service, &mut account, ClientMessage::EncryptChoice { choice: 0 }).await;
        assert_eq!(code_of(&reply), Some(codes::NOT_AUTHENTICATED));

        send(&service, &mut account, auth_message("alice")).await;
        let reply = send(&service, &mut account, ClientMessage::EncryptChoice { choice: 0 }).await;
        assert_eq!(code_of(&reply), Some(codes::ENCRYPTION_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_connection_limit_counts_admitted_slots() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let server = LedgerServer::new(ServerConfig { max_connections: 2, ..config() }, service);

        assert!(server.admit(SocketAddr::from(([127, 0, 0, 1], 5001))).await);
        assert!(server.admit(SocketAddr::from(([127, 0, 0, 1], 5002))).await);
        assert!(!server.admit(SocketAddr::from(([127, 0, 0, 1], 5003))).await);
        assert_eq!(server.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_full_lifecycle_over_messages() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut events = service.subscribe();

        let mut owner = None;
        let mut alice = None;
        let reply = send(&service, &mut owner, auth_message("owner")).await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: true, .. })));
        send(&service, &mut alice, auth_message("alice")).await;
        let alice_id = alice.unwrap();
        assert_eq!(alice_id, AccountId::from_subject("alice"));

        let create = ClientMessage::CreateMatch { metadata: "A vs B".into(), deadline: 0 };
        let reply = send(&service, &mut owner, create).await;
        assert_eq!(reply, ServerMessage::MatchCreated { match_id: 0 });

        let input = sb.encryptor.encrypt_choice(Outcome::Draw, alice_id).unwrap();
        let frame = PlaceBetFrame { match_id: 0, input, stake: UNIT };
        let reply = send(&service, &mut alice, ClientMessage::PlaceBet(frame)).await;
        assert_eq!(reply, ServerMessage::BetAccepted { match_id: 0, bet_index: 0 });

        // Only the creator may close
        let reply = send(&service, &mut alice, ClientMessage::CloseMatch { match_id: 0 }).await;
        assert_eq!(code_of(&reply), Some("unauthorized"));
        send(&service, &mut owner, ClientMessage::CloseMatch { match_id: 0 }).await;

        let reply = send(&service, &mut owner, ClientMessage::SettleMatch { match_id: 0, result: 1 }).await;
        assert!(matches!(reply, ServerMessage::SettlementRequested { match_id: 0, .. }));

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
            if event.kind() == "settlement_finalized" {
                break;
            }
        }

        let reply = send(&service, &mut owner, ClientMessage::GetMatch { match_id: 0 }).await;
        match reply {
            ServerMessage::MatchInfo(view) => {
                assert_eq!(view.status, MatchStatus::Settled);
                assert_eq!(view.totals, Some([0, UNIT, 0]));
                assert_eq!(view.payout_ratio.map(|r| r.to_string()), Some("1.0000".to_string()));
            }
            other => panic!("unexpected reply {:?}", other),
        }

        let reply = send(&service, &mut alice, ClientMessage::Claim { match_id: 0 }).await;
        assert_eq!(reply, ServerMessage::ClaimResult { match_id: 0, amount: UNIT });
        let reply = send(&service, &mut alice, ClientMessage::Claim { match_id: 0 }).await;
        assert_eq!(code_of(&reply), Some("already_claimed"));
    }

    #[tokio::test]
    async fn test_get_missing_match() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut account = None;
        let reply = send(&service, &mut account, ClientMessage::GetMatch { match_id: 5 }).await;
        assert_eq!(code_of(&reply), Some(codes::MATCH_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_ping() {
        let sb = Sandbox::new().unwrap();
        let (service, _tasks) = LedgerService::start(sb.book(), sb.oracle.clone(), 4);
        let mut account = None;
        let reply = send(&service, &mut account, ClientMessage::Ping { timestamp: 42 }).await;
        assert!(matches!(reply, ServerMessage::Pong { timestamp: 42, server_time } if server_time > 0));
    }
}
