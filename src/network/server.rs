//! WebSocket Gateway
//!
//! Async WebSocket server for players and spectators. Each connection gets a
//! bounded outbound queue drained by its own writer task; the engine's hub
//! enqueues broadcasts onto the same queue.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{env_lookup, parse_secs, parse_var, ConfigError};
use crate::engine::{ActionError, Engine, PlayerSession};
use crate::game::state::{Address, GameId};
use crate::network::auth::{authenticate, AuthConfig};
use crate::network::hub::{Kick, SubscriberId};
use crate::network::protocol::{ClientMessage, Inbound, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for longer are closed.
    pub idle_timeout: Duration,
    /// Outbound messages buffered per connection before it is dropped.
    pub queue_depth: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            queue_depth: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Defaults overridden by `lookup`.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Ok(Self {
            bind_addr: parse_var(&lookup, "CA_BIND_ADDR", d.bind_addr)?,
            max_connections: parse_var(&lookup, "CA_MAX_CONNECTIONS", d.max_connections)?,
            idle_timeout: parse_secs(&lookup, "CA_IDLE_TIMEOUT_SECS", d.idle_timeout)?,
            queue_depth: parse_var(&lookup, "CA_QUEUE_DEPTH", d.queue_depth)?.max(1),
            version: d.version,
        })
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Connected client state.
struct ConnectedClient {
    /// Authenticated seat, if any.
    session: Option<PlayerSession>,
    /// Game watched.
    game_id: Option<GameId>,
    /// Last inbound frame.
    last_activity: Instant,
    /// Fired by the cleanup loop to close an idle connection.
    reap: Option<oneshot::Sender<()>>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// Per-connection state owned by the connection task.
struct Connection {
    addr: SocketAddr,
    session: Option<PlayerSession>,
    joined: Option<(GameId, SubscriberId)>,
    /// Fires if the hub drops this connection's subscription.
    kicked: Option<oneshot::Receiver<Kick>>,
    sender: mpsc::Sender<ServerMessage>,
    /// Set when a direct reply did not fit in the outbound queue.
    fell_behind: bool,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Token validation settings.
    auth: Arc<AuthConfig>,
    /// Orchestration engine.
    engine: Arc<Engine>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, auth: AuthConfig, engine: Arc<Engine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        if !auth.is_configured() {
            warn!("No token key configured; accepting bare addresses (development mode)");
        }
        Self {
            config,
            auth: Arc::new(auth),
            engine,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Receiver for the shutdown signal, for background tasks.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Bind and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(version = %self.config.version, "Gateway listening on {}", listener.local_addr()?);

        let cleanup_clients = self.clients.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("{}, rejecting {}", GameServerError::ConnectionLimitReached, addr);
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

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let engine = self.engine.clone();
        let auth = self.auth.clone();
        let queue_depth = self.config.queue_depth;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(queue_depth);
            let (reap_tx, mut reap_rx) = oneshot::channel::<()>();

            clients.write().await.insert(addr, ConnectedClient {
                session: None,
                game_id: None,
                last_activity: Instant::now(),
                reap: Some(reap_tx),
            });

            // Writer task: the only place that touches the socket sink
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
                let _ = ws_sender.close().await;
            });

            let mut conn = Connection {
                addr,
                session: None,
                joined: None,
                kicked: None,
                sender: msg_tx,
                fell_behind: false,
            };

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::touch(&clients, addr).await;
                                match ClientMessage::decode(&text) {
                                    Inbound::Message(client_msg) => {
                                        Self::handle_client_message(&mut conn, client_msg, &engine, &auth, &clients).await;
                                    }
                                    Inbound::Unknown => {
                                        debug!("Dropped unknown message from {}", addr);
                                    }
                                    Inbound::Invalid(reason) => {
                                        debug!("Invalid message from {}: {}", addr, reason);
                                        conn.send(ServerMessage::error("invalid-message"));
                                    }
                                }
                                if conn.fell_behind {
                                    info!("Client {} fell behind; closing", addr);
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                Self::touch(&clients, addr).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    kicked = wait_kicked(&mut conn.kicked) => {
                        match kicked {
                            Ok(Kick::FellBehind) => {
                                info!("Client {} fell behind; closing", addr);
                                break;
                            }
                            Ok(Kick::GameClosed) => {
                                conn.joined = None;
                                info!("Game of client {} was unloaded; closing", addr);
                                break;
                            }
                            // Subscription ended without a kick
                            Err(_) => conn.kicked = None,
                        }
                    }
                    _ = &mut reap_rx => {
                        info!("Closing idle client {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            if let Some((game_id, subscriber)) = conn.joined.take() {
                engine.leave(game_id, subscriber);
            }
            drop(conn);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Writer for {} did not finish in time", addr);
            }
            clients.write().await.remove(&addr);

            info!("Client {} cleaned up", addr);
        });
    }

    async fn touch(clients: &Clients, addr: SocketAddr) {
        if let Some(client) = clients.write().await.get_mut(&addr) {
            client.last_activity = Instant::now();
        }
    }

    /// Handle a client message.
    async fn handle_client_message(
        conn: &mut Connection,
        msg: ClientMessage,
        engine: &Arc<Engine>,
        auth: &AuthConfig,
        clients: &Clients,
    ) {
        match msg {
            ClientMessage::Auth(req) => {
                let address = match authenticate(req.token.as_deref(), req.address.as_deref(), req.game_id, auth) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!("Authentication failed for {}: {}", conn.addr, e);
                        conn.send(ServerMessage::error(e.code()));
                        return;
                    }
                };
                Self::handle_join(conn, req.game_id, Some(address), engine, clients).await;
            }
            ClientMessage::Subscribe(req) => {
                Self::handle_join(conn, req.game_id, None, engine, clients).await;
            }
            ClientMessage::Checkin(req) => {
                let Some(session) = conn.require_session() else { return };
                let result = match req.location() {
                    Ok(location) => engine.check_in(session, location).await,
                    Err(_) => Err(ActionError::InvalidLocation),
                };
                conn.report(result);
            }
            ClientMessage::HeartbeatScan(req) => {
                let Some(session) = conn.require_session() else { return };
                let result = engine.heartbeat_scan(session, req.scanned_player_number).await;
                conn.report(result);
            }
            ClientMessage::LocationUpdate(req) => {
                let Some(session) = conn.require_session() else { return };
                let result = match req.location() {
                    Ok(point) => engine.update_location(session, point).await,
                    Err(_) => Err(ActionError::InvalidLocation),
                };
                conn.report(result);
            }
            ClientMessage::KillClaim(req) => {
                let Some(session) = conn.require_session() else { return };
                let result = engine.claim_kill(session, req.target_player_number).await;
                conn.report(result);
            }
            ClientMessage::Ping => {}
        }
    }

    /// Subscribe a connection to a game, replacing any previous subscription.
    async fn handle_join(
        conn: &mut Connection,
        game_id: GameId,
        player: Option<Address>,
        engine: &Arc<Engine>,
        clients: &Clients,
    ) {
        if let Some((previous, subscriber)) = conn.joined.take() {
            engine.leave(previous, subscriber);
        }
        conn.session = None;

        let (kick_tx, kick_rx) = oneshot::channel();
        match engine.join(game_id, player, conn.sender.clone(), Some(kick_tx)).await {
            Ok(joined) => {
                conn.session = joined.session;
                conn.joined = Some((game_id, joined.subscriber));
                conn.kicked = Some(kick_rx);
                if let Some(client) = clients.write().await.get_mut(&conn.addr) {
                    client.session = joined.session;
                    client.game_id = Some(game_id);
                }
                match joined.session {
                    Some(s) => info!("Client {} authenticated as player {} of game {}", conn.addr, s.number, game_id),
                    None => info!("Client {} watching game {}", conn.addr, game_id),
                }
            }
            Err(e) => {
                debug!("Join of game {} refused for {}: {}", game_id, conn.addr, e);
                conn.send(e.to_message());
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(clients: Clients, idle_timeout: Duration) {
        let mut interval = interval(idle_timeout.min(Duration::from_secs(60)).max(Duration::from_millis(10)));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let mut clients = clients.write().await;
            for (addr, client) in clients.iter_mut() {
                if now.duration_since(client.last_activity) > idle_timeout {
                    if let Some(reap) = client.reap.take() {
                        let _ = reap.send(());
                        info!(
                            game_id = ?client.game_id,
                            player = ?client.session.map(|s| s.number),
                            "Reaping idle client {}", addr
                        );
                    }
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Resolves when the hub kicks the connection; never while unsubscribed.
async fn wait_kicked(rx: &mut Option<oneshot::Receiver<Kick>>) -> Result<Kick, oneshot::error::RecvError> {
    match rx {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

impl Connection {
    /// Queue a direct reply. Same policy as hub broadcasts: a full queue
    /// marks the connection for closing instead of waiting.
    fn send(&mut self, message: ServerMessage) {
        if let Err(e) = self.sender.try_send(message) {
            debug!("Reply to {} dropped: {}", self.addr, e);
            self.fell_behind = true;
        }
    }

    fn require_session(&mut self) -> Option<PlayerSession> {
        if self.session.is_none() {
            self.send(ServerMessage::error("not-authenticated"));
        }
        self.session
    }

    fn report(&mut self, result: Result<(), ActionError>) {
        if let Err(e) = result {
            debug!("Action from {} refused: {}", self.addr, e);
            self.send(e.to_message());
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::harness::Harness;
    use crate::game::state::fixtures::game_with_players;
    use tokio_tungstenite::connect_async;

    type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    async fn start(h: &Harness, config: ServerConfig) -> (Arc<GameServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(config, AuthConfig::default(), h.engine.clone()));
        let running = server.clone();
        tokio::spawn(async move { running.serve(listener).await });
        (server, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, text: &str) {
        ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
            if let Message::Text(text) = frame {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_dev_auth_then_leaderboard() {
        let h = Harness::new();
        h.engine.registry().insert(game_with_players(5, 3)).await;
        let (_server, addr) = start(&h, ServerConfig::default()).await;
        let mut ws = connect(addr).await;

        let wallet = crate::game::state::fixtures::addr(2).to_hex();
        send(&mut ws, &format!(r#"{{"type":"auth","address":"{wallet}","gameId":5}}"#)).await;
        match recv(&mut ws).await {
            ServerMessage::AuthSuccess(info) => assert_eq!(info.player_number, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(recv(&mut ws).await.type_name(), "leaderboard:update");
    }

    #[tokio::test]
    async fn test_unknown_dropped_invalid_reported() {
        let h = Harness::new();
        h.engine.registry().insert(game_with_players(5, 3)).await;
        let (_server, addr) = start(&h, ServerConfig::default()).await;
        let mut ws = connect(addr).await;

        send(&mut ws, r#"{"type":"dance"}"#).await;
        send(&mut ws, r#"{"type":"kill:claim","targetPlayerNumber":"x"}"#).await;
        assert_eq!(recv(&mut ws).await, ServerMessage::error("invalid-message"));

        // Connection still usable
        send(&mut ws, r#"{"type":"kill:claim","targetPlayerNumber":1}"#).await;
        assert_eq!(recv(&mut ws).await, ServerMessage::error("not-authenticated"));
        send(&mut ws, r#"{"type":"subscribe","gameId":5}"#).await;
        assert_eq!(recv(&mut ws).await.type_name(), "leaderboard:update");
    }

    #[tokio::test]
    async fn test_spectator_receives_broadcasts() {
        let h = Harness::new();
        let handle = h.engine.registry().insert(game_with_players(5, 3)).await;
        let (_server, addr) = start(&h, ServerConfig::default()).await;
        let mut ws = connect(addr).await;
        send(&mut ws, r#"{"type":"subscribe","gameId":5}"#).await;
        recv(&mut ws).await;

        h.engine.mutate(&handle, |g, now| g.cancel(now)).await.unwrap();
        assert_eq!(recv(&mut ws).await.type_name(), "game:cancelled");
    }

    #[tokio::test]
    async fn test_idle_connection_reaped() {
        let h = Harness::new();
        let config = ServerConfig { idle_timeout: Duration::from_millis(50), ..Default::default() };
        let (server, addr) = start(&h, config).await;
        let mut ws = connect(addr).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    _ => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_unloaded_game_closes_socket() {
        let h = Harness::new();
        h.engine.registry().insert(game_with_players(5, 3)).await;
        let (server, addr) = start(&h, ServerConfig::default()).await;
        let mut ws = connect(addr).await;
        send(&mut ws, r#"{"type":"subscribe","gameId":5}"#).await;
        recv(&mut ws).await;

        h.engine.registry().remove(5).await;
        h.engine.hub().close_game(5);
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    _ => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_reply_queue_marks_connection() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut conn = Connection {
            addr: "127.0.0.1:1".parse().unwrap(),
            session: None,
            joined: None,
            kicked: None,
            sender: tx,
            fell_behind: false,
        };
        assert!(conn.require_session().is_none());
        assert!(!conn.fell_behind);
        conn.report(Err(ActionError::InvalidLocation));
        assert!(conn.fell_behind);
        assert_eq!(rx.recv().await, Some(ServerMessage::error("not-authenticated")));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(|name| match name {
            "CA_BIND_ADDR" => Some("127.0.0.1:9000".to_string()),
            "CA_QUEUE_DEPTH" => Some("8".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.queue_depth, 8);

        let err = ServerConfig::from_lookup(|name| (name == "CA_MAX_CONNECTIONS").then(|| "lots".to_string())).unwrap_err();
        assert_eq!(err.var, "CA_MAX_CONNECTIONS");
    }
}
