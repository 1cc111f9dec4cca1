//! WebSocket Game Server
//!
//! Accepts WebSocket connections and feeds every binary frame through the
//! event transceiver, then the RPC transceiver. Both share one router.
//! Drives the simulation from a [`Ticker`] and broadcasts the world to
//! every joined client after each tick.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc::UnboundedReceiver};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::codec::{read_header, CodecError, Encoding};
use crate::game::area::Area;
use crate::game::combat::CombatConfig;
use crate::game::persistence::{character_records, Persistence, PersistenceError};
use crate::game::simulation::Simulation;
use crate::game::state::GameState;
use crate::game::tick_metrics::{tick_metrics_middleware, AtomicGauge, Gauge, SummaryHistogram, TickMetrics};
use crate::game::ticker::{tick_handler, TickHandler, Ticker, TickerOptions};
use crate::network::auth::TokenResolver;
use crate::network::handlers::{game_router, leave_world, CharacterDefaults, SessionContext, World};
use crate::network::rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
use crate::network::router::RouterNode;
use crate::network::rpc::{RpcTransceiver, RPC_CALL_HEADER, RPC_RESPONSE_HEADER};
use crate::network::session::{ClientId, Session};
use crate::network::transceiver::{BinaryEventTransceiver, EventMessage, EVENT_PROTOCOL_HEADER};
use crate::network::transport::{ChannelTransport, Transport};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Seed of the simulation RNG.
    pub rng_seed: u64,
    /// Per-connection event budget.
    pub rate_limit: RateLimitConfig,
    /// Time between character saves.
    pub persist_interval: Duration,
    /// Header of event messages.
    pub event_header: u32,
    /// Header of RPC calls.
    pub rpc_call_header: u32,
    /// Header of RPC responses.
    pub rpc_response_header: u32,
    /// Combat tuning.
    pub combat: CombatConfig,
    /// New character stats.
    pub character: CharacterDefaults,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            tick_interval: Duration::from_millis(50),
            rng_seed: 0x7469_636b,
            rate_limit: RateLimitConfig::default(),
            persist_interval: Duration::from_secs(30),
            event_header: EVENT_PROTOCOL_HEADER,
            rpc_call_header: RPC_CALL_HEADER,
            rpc_response_header: RPC_RESPONSE_HEADER,
            combat: CombatConfig::default(),
            character: CharacterDefaults::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Read `TICKWIRE_BIND_ADDR`, `TICKWIRE_MAX_CONNECTIONS`,
    /// `TICKWIRE_TICK_INTERVAL_MS`, `TICKWIRE_RNG_SEED`, `TICKWIRE_RATE_LIMIT`
    /// and `TICKWIRE_PERSIST_INTERVAL_SECS`, keeping defaults for unset ones.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ServerConfig::from_env`], reading variables from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GameServerError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = parse_var(&var, "TICKWIRE_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var(&var, "TICKWIRE_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(ms) = parse_var::<u64>(&var, "TICKWIRE_TICK_INTERVAL_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(seed) = parse_var(&var, "TICKWIRE_RNG_SEED")? {
            config.rng_seed = seed;
        }
        if let Some(limit) = var("TICKWIRE_RATE_LIMIT") {
            config.rate_limit = RateLimitConfig::parse(&limit)?;
        }
        if let Some(secs) = parse_var::<u64>(&var, "TICKWIRE_PERSIST_INTERVAL_SECS")? {
            config.persist_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), GameServerError> {
        if self.tick_interval.is_zero() {
            return Err(GameServerError::Config("tick interval must be positive".into()));
        }
        if self.persist_interval.is_zero() {
            return Err(GameServerError::Config("persist interval must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(GameServerError::Config("max connections must be positive".into()));
        }

        let headers = [self.event_header, self.rpc_call_header, self.rpc_response_header];
        for header in headers {
            Encoding::<()>::new(header)?;
        }
        if headers[0] == headers[1] || headers[0] == headers[2] || headers[1] == headers[2] {
            return Err(GameServerError::Config(format!("protocol headers must differ: {headers:?}")));
        }
        Ok(())
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, GameServerError>
where
    T: FromStr,
    T::Err: Display,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| GameServerError::Config(format!("{name}={value}: {e}")))
        })
        .transpose()
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

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid protocol header.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invalid rate limit.
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Storage failure.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// In-process server metrics.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Configured tick interval per tick, in milliseconds.
    pub tick_interval: Arc<SummaryHistogram>,
    /// Tick processing time, in milliseconds.
    pub tick_duration: Arc<SummaryHistogram>,
    /// NPCs in the world after the last tick.
    pub npc_count: Arc<AtomicGauge>,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Shared services.
    world: Arc<World>,
    /// Routes of every connection.
    router: Arc<RouterNode<SessionContext>>,
    /// Per-connection event budget.
    limiter: Arc<RateLimiter<ClientId>>,
    /// Tick scheduler.
    ticker: Ticker,
    /// Tick and world metrics.
    metrics: Arc<ServerMetrics>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        area: Area,
        persistence: Arc<dyn Persistence>,
        tokens: Arc<dyn TokenResolver>,
    ) -> Result<Self, GameServerError> {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        let world = Arc::new(World {
            state: GameState::new().into_shared(),
            area: Arc::new(area),
            clients: Default::default(),
            persistence,
            tokens,
            character: config.character.clone(),
        });
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let metrics = Arc::new(ServerMetrics::default());
        let ticker = Ticker::new(TickerOptions {
            middleware: Some(tick_metrics_middleware(
                TickMetrics {
                    interval: metrics.tick_interval.clone(),
                    duration: metrics.tick_duration.clone(),
                },
                config.tick_interval,
            )),
        });

        Ok(Self {
            router: Arc::new(game_router(limiter.clone())),
            config,
            world,
            limiter,
            ticker,
            metrics,
            shutdown_tx,
        })
    }

    /// Shared services.
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Tick and world metrics.
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Bind and run until [`GameServer::shutdown`].
    #[instrument(skip(self), fields(bind_addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run on an already bound listener until [`GameServer::shutdown`].
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.start_simulation().await?;
        info!(
            addr = %listener.local_addr()?,
            version = %self.config.version,
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "Game server listening"
        );

        let persist_world = self.world.clone();
        let persist_metrics = self.metrics.clone();
        let persist_limiter = self.limiter.clone();
        let persist_every = self.config.persist_interval;
        let persist_handle = tokio::spawn(async move {
            Self::run_persistence_loop(persist_world, persist_metrics, persist_limiter, persist_every).await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.world.clients.len() >= self.config.max_connections {
                                warn!(%addr, error = %GameServerError::ConnectionLimitReached, "rejecting connection");
                                continue;
                            }

                            debug!(%addr, "new connection");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.ticker.stop();
        persist_handle.abort();
        match Self::save_all(&self.world).await {
            Ok(saved) => info!(saved, "characters saved"),
            Err(e) => error!(error = %e, "final save failed"),
        }
        Ok(())
    }

    async fn start_simulation(&self) -> Result<(), GameServerError> {
        let spawns = self.world.persistence.get_all_spawns_and_their_npcs().await?;
        info!(
            area = %self.world.area.id,
            spawns = spawns.len(),
            routes = self.router.handler_paths().len(),
            "starting simulation"
        );
        for path in self.router.handler_paths() {
            debug!(path = %path.join("."), "route");
        }

        let simulation = Simulation::new(
            self.world.state.clone(),
            self.world.area.clone(),
            spawns,
            self.config.combat.clone(),
            self.config.rng_seed,
        );
        self.ticker.subscribe(simulation.into_tick_handler());
        self.ticker
            .subscribe(state_broadcaster(self.world.clone(), self.metrics.npc_count.clone()));
        self.ticker.start(self.config.tick_interval);
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let world = self.world.clone();
        let router = self.router.clone();
        let limiter = self.limiter.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(%addr, error = %e, "WebSocket handshake failed");
                    return;
                }
            };

            let (event_encoding, rpc) = match (
                Encoding::<EventMessage>::new(config.event_header),
                RpcTransceiver::with_headers(config.rpc_call_header, config.rpc_response_header),
            ) {
                (Ok(encoding), Ok(rpc)) => (encoding, rpc),
                (Err(e), _) | (_, Err(e)) => {
                    error!(%addr, error = %e, "invalid protocol headers");
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (transport, mut outbound) = ChannelTransport::new();
            let transport: Arc<dyn Transport> = Arc::new(transport);

            let client_id = world.clients.next_client_id();
            let session = Arc::new(Session::new(client_id, addr, event_encoding.clone(), transport.clone()));
            let events = BinaryEventTransceiver::new(event_encoding).with_receiver(router.clone());
            let rpc = rpc.with_sender(transport).with_receiver(router);
            world.clients.insert(session.clone());
            info!(client = client_id, %addr, "client connected");

            let mut sender_task = tokio::spawn(async move {
                write_outbound(outbound, ws_sender).await;
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let context = || SessionContext::new(session.clone(), world.clone());
                                if events.handle_message(&data, context).await.is_some() {
                                    continue;
                                }
                                if rpc.handle_message(&data, context).await.is_some() {
                                    continue;
                                }
                                warn!(
                                    client = client_id,
                                    size = data.len(),
                                    header = ?read_header(&data),
                                    "unsupported binary message"
                                );
                            }
                            Some(Ok(Message::Text(_))) => {
                                warn!(client = client_id, "text frames are not supported");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(client = client_id, "client disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(client = client_id, error = %e, "WebSocket error");
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            world.clients.remove(client_id);
            limiter.reset(&client_id);
            if let Err(e) = leave_world(&session, &world).await {
                error!(client = client_id, error = %e, "failed to save character");
            }

            // The writer ends once every sender of the outbound queue is gone
            drop((events, rpc, session));
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut sender_task).await.is_err() {
                warn!(client = client_id, "outbound queue did not drain, dropping it");
                sender_task.abort();
            }
            info!(client = client_id, %addr, "client cleaned up");
        });
    }

    /// Persist every character in the world.
    pub async fn save_all(world: &World) -> Result<usize, PersistenceError> {
        let records = character_records(&world.state.lock());
        let saved = records.len();
        if saved > 0 {
            world.persistence.persist(records).await?;
        }
        Ok(saved)
    }

    /// Periodically save characters and report tick timings.
    async fn run_persistence_loop(
        world: Arc<World>,
        metrics: Arc<ServerMetrics>,
        limiter: Arc<RateLimiter<ClientId>>,
        every: Duration,
    ) {
        let mut interval = interval_at(Instant::now() + every, every);

        loop {
            interval.tick().await;

            if let Err(e) = Self::save_all(&world).await {
                error!(error = %e, "periodic save failed");
            }
            limiter.prune();

            let duration = metrics.tick_duration.take();
            info!(
                ticks = duration.count,
                mean_ms = duration.mean(),
                max_ms = duration.max,
                npcs = metrics.npc_count.get(),
                clients = world.clients.len(),
                rate_limited_keys = limiter.tracked_keys(),
                "tick report"
            );
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.world.clients.len()
    }
}

/// How long a closing connection may spend flushing queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Forward queued frames to the socket until the queue closes, then close the
/// socket. Returns the sink.
async fn write_outbound<S>(mut outbound: UnboundedReceiver<Vec<u8>>, mut sink: S) -> S
where
    S: Sink<Message> + Unpin,
{
    while let Some(bytes) = outbound.recv().await {
        if sink.send(Message::Binary(bytes)).await.is_err() {
            return sink;
        }
    }
    let _ = sink.close().await;
    sink
}

/// Tick subscriber that sends the world to every joined session.
fn state_broadcaster(world: Arc<World>, npc_count: Arc<dyn Gauge>) -> TickHandler {
    tick_handler(move |_| {
        let snapshot = {
            let state = world.state.lock();
            npc_count.set(state.npc_count() as f64);
            state.snapshot()
        };
        world
            .clients
            .broadcast_where(&["world", "state"], &snapshot, |session| session.character().is_some());
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::persistence::InMemoryPersistence;
    use crate::game::spawner::{NpcDefinition, NpcSpawn};
    use crate::game::state::{NpcType, WorldSnapshot};
    use crate::network::auth::{StaticTokenResolver, UserIdentity};
    use crate::network::rpc::{RpcCall, RpcResponse};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_writer_flushes_queued_frames_after_senders_drop() {
        let (transport, outbound) = ChannelTransport::new();
        transport.send(vec![1]).unwrap();
        transport.send(vec![2, 2]).unwrap();
        drop(transport);

        let sent = write_outbound(outbound, Vec::<Message>::new()).await;
        assert_eq!(sent, vec![Message::Binary(vec![1]), Message::Binary(vec![2, 2])]);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert!(config.rate_limit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TICKWIRE_BIND_ADDR", "127.0.0.1:9001"),
            ("TICKWIRE_TICK_INTERVAL_MS", "100"),
            ("TICKWIRE_RNG_SEED", "99"),
            ("TICKWIRE_RATE_LIMIT", "off"),
            ("TICKWIRE_MAX_CONNECTIONS", ""),
        ]
        .into_iter()
        .collect();

        let config = ServerConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.rng_seed, 99);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.max_connections, 1000);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad = |name: &'static str, value: &'static str| {
            ServerConfig::from_lookup(move |n| (n == name).then(|| value.to_string())).unwrap_err()
        };
        assert!(matches!(bad("TICKWIRE_TICK_INTERVAL_MS", "0"), GameServerError::Config(_)));
        assert!(matches!(bad("TICKWIRE_MAX_CONNECTIONS", "many"), GameServerError::Config(_)));
        assert!(matches!(bad("TICKWIRE_RATE_LIMIT", "fast"), GameServerError::RateLimit(_)));

        let clash = ServerConfig {
            rpc_call_header: EVENT_PROTOCOL_HEADER,
            ..Default::default()
        };
        assert!(matches!(clash.validate(), Err(GameServerError::Config(_))));
        let too_big = ServerConfig {
            event_header: 70_000,
            ..Default::default()
        };
        assert!(matches!(too_big.validate(), Err(GameServerError::Codec(_))));
    }

    fn server(persistence: Arc<InMemoryPersistence>) -> Arc<GameServer> {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            tick_interval: Duration::from_millis(20),
            rate_limit: RateLimitConfig::disabled(),
            ..Default::default()
        };
        let area = Area::grid("test", 12, 12, &[]).unwrap();
        let tokens = Arc::new(StaticTokenResolver::new().with_token("alice-token", "alice"));
        Arc::new(GameServer::new(config, area, persistence, tokens).unwrap())
    }

    #[tokio::test]
    async fn test_server_creation_and_shutdown_without_run() {
        let server = server(Arc::new(InMemoryPersistence::new()));
        assert_eq!(server.connection_count(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_client_session_over_websocket() {
        let persistence = Arc::new(
            InMemoryPersistence::new()
                .with_npc(NpcDefinition {
                    id: 1,
                    name: "sheep".into(),
                    npc_type: NpcType::Pacifist,
                    speed: 1.0,
                    max_health: 5.0,
                    attack_damage: 0.0,
                    attack_range: 1.0,
                    attack_speed: 1.0,
                    aggro_range: 1.0,
                })
                .with_spawn(NpcSpawn {
                    id: 1,
                    npc_id: 1,
                    count: 2,
                    coords: None,
                    random_radius: None,
                    npc_type: None,
                    patrol: None,
                }),
        );
        let server = server(persistence.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let (mut write, mut read) = ws.split();

        // Authenticate over RPC
        let call = RpcCall {
            id: 1,
            path: vec!["world".into(), "auth".into()],
            input: bincode::serialize("alice-token").unwrap(),
        };
        let bytes = Encoding::<RpcCall>::new(RPC_CALL_HEADER).unwrap().encode(&call).unwrap();
        write.send(Message::Binary(bytes)).await.unwrap();

        let responses = Encoding::<RpcResponse>::new(RPC_RESPONSE_HEADER).unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(Ok(Message::Binary(data))) = read.next().await {
                    if let Some(Ok(response)) = responses.decode(&data) {
                        return response;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(response.id, 1);
        let identity: UserIdentity = bincode::deserialize(&response.result.unwrap()).unwrap();
        assert_eq!(identity.subject, "alice");

        // Join with a plain event, then wait for world state
        let events = Encoding::<EventMessage>::new(EVENT_PROTOCOL_HEADER).unwrap();
        let join = events.encode(&EventMessage::new(&["world", "join"], &()).unwrap()).unwrap();
        write.send(Message::Binary(join)).await.unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(Ok(Message::Binary(data))) = read.next().await {
                    if let Some(Ok(message)) = events.decode(&data) {
                        if message.path == ["world", "state"] {
                            return message.decode_input::<WorldSnapshot>().unwrap();
                        }
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshot.actors.iter().filter(|a| a.is_character()).count(), 1);
        assert_eq!(snapshot.actors.iter().filter(|a| a.is_npc()).count(), 2);
        assert_eq!(server.connection_count(), 1);
        assert_eq!(server.metrics().npc_count.get(), 2.0);

        server.shutdown();
        running.await.unwrap().unwrap();

        // The connection task saves on its way out as well; wait for either
        let saved = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = persistence.load_character(identity.user_id).await.unwrap() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(saved.name, "alice");
    }
}
