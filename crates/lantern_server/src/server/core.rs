//! Core Lantern server implementation.
//!
//! This module contains the main `LanternServer` struct: the telnet and
//! WebSocket listeners, the per-connection tasks they spawn, and the round
//! producer that drains the event bus and delivers outbound events.

use crate::{
    config::ServerConfig,
    connection::{ConnectionRegistry, ConnectionStats},
    error::ServerError,
    input::{AccountStore, LoginRules, MemoryAccountStore, SessionContext},
    protocol::{ansi, gmcp, msp},
    server::session::Session,
    transport::{TelnetTransport, WebSocketTransport},
};
use futures::stream::{FuturesUnordered, StreamExt};
use lantern_event_system::{
    create_event_bus, current_timestamp, Broadcast, ConnectionClosed, ConnectionOpened, Event,
    EventBus, EventKind, GmcpOut, ListenerResult, Msp, RoundTick, System,
    WebClientCommand,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Event types the round producer delivers to clients after their
/// listeners have run. A listener halting dispatch cancels delivery.
pub const OUTBOUND_EVENT_TYPES: [&str; 4] = [
    Broadcast::EVENT_TYPE,
    WebClientCommand::EVENT_TYPE,
    Msp::EVENT_TYPE,
    GmcpOut::EVENT_TYPE,
];

const SERVER_FULL: &[u8] = b"The server is full. Please try again later.\r\n";

/// The core server structure.
///
/// `LanternServer` owns the event bus and the connection registry and wires
/// them to the network. It carries no game logic: game code registers
/// listeners on the bus, reacts to `Input` events, and pushes outbound
/// events back.
pub struct LanternServer {
    /// Server configuration settings
    config: ServerConfig,

    /// The bus shared by the server and game logic
    bus: Arc<EventBus>,

    /// Every live and zombie session
    registry: Arc<ConnectionRegistry>,

    /// Services handed to each session
    context: Arc<SessionContext>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl LanternServer {
    /// Creates a server with a process-local account store and default
    /// login rules.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_accounts(config, Arc::new(MemoryAccountStore::new()), LoginRules::default())
    }

    /// Creates a server backed by `accounts`.
    pub fn with_accounts(
        config: ServerConfig,
        accounts: Arc<dyn AccountStore>,
        login_rules: LoginRules,
    ) -> Self {
        let bus = create_event_bus();
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_sender, _) = broadcast::channel(1);
        registry.set_shutdown_sender(shutdown_sender.clone());

        let mut context = SessionContext::new(bus.clone(), accounts);
        context.login_rules = login_rules;
        context.msp_cdn_url = config.msp_cdn_url.clone();

        Self {
            config,
            bus,
            registry,
            context: Arc::new(context),
            shutdown_sender,
        }
    }

    /// Starts the server and accepts connections until shutdown.
    ///
    /// # Startup Sequence
    ///
    /// 1. Register core logging listeners
    /// 2. Start the round producer
    /// 3. Bind the telnet listener and, if configured, the WebSocket one
    /// 4. Run the accept loops until a shutdown signal arrives
    /// 5. Stop the round producer and close every connection
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting Lantern server on {}", self.config.telnet_address);

        self.register_core_listeners();

        let round_producer = if self.config.tick_interval_ms > 0 {
            let handle = self.start_round_producer();
            info!("🕒 Round producer started with interval: {}ms", self.config.tick_interval_ms);
            Some(handle)
        } else {
            warn!("⏸️ Round producer disabled (interval: 0ms), outbound events will not be delivered");
            None
        };

        let telnet_listener = bind_listener(self.config.telnet_address)?;
        info!("✅ Telnet listener bound on {}", self.config.telnet_address);

        let ws_listener = match self.config.websocket_address {
            Some(addr) => {
                let listener = bind_listener(addr)?;
                info!("✅ WebSocket listener bound on {}", addr);
                Some(listener)
            }
            None => {
                info!("📭 WebSocket listener disabled");
                None
            }
        };

        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        let mut accept_loops = FuturesUnordered::new();
        accept_loops.push(tokio::spawn(accept_telnet(
            telnet_listener,
            self.registry.clone(),
            self.context.clone(),
            self.config.max_connections,
        )));
        if let Some(listener) = ws_listener {
            accept_loops.push(tokio::spawn(accept_websocket(
                listener,
                self.registry.clone(),
                self.context.clone(),
                self.config.clone(),
            )));
        }

        // Run until shutdown
        tokio::select! {
            _ = accept_loops.next() => {
                error!("An accept loop stopped unexpectedly");
            }
            _ = shutdown_receiver.recv() => {
                info!("Shutdown signal received");
            }
        }

        // Server shutdown cleanup
        info!("🧹 Performing server cleanup...");
        for handle in accept_loops.iter() {
            handle.abort();
        }
        if let Some(handle) = round_producer {
            handle.abort();
        }
        self.registry.cleanup().await;

        info!("✅ Server cleanup completed");
        info!("Server stopped");
        Ok(())
    }

    /// Logging listeners for the connection lifecycle events.
    fn register_core_listeners(&self) {
        self.bus.on(|event: &ConnectionOpened| {
            info!(
                "👋 Connection {} opened from {} ({})",
                event.connection_id,
                event.remote_addr,
                if event.framed { "websocket" } else { "telnet" }
            );
            ListenerResult::Continue
        });

        self.bus.on(|event: &ConnectionClosed| {
            info!(
                "👋 Connection {} closed{}",
                event.connection_id,
                if event.zombie { ", kept as zombie" } else { "" }
            );
            ListenerResult::Continue
        });

        self.bus.on(|event: &System| {
            debug!("System command {:?} dispatched", event.command);
            ListenerResult::Continue
        });
    }

    /// Spawns the task that ticks rounds and drains the bus.
    fn start_round_producer(&self) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let registry = self.registry.clone();
        let tick_interval = Duration::from_millis(self.config.tick_interval_ms);
        let zombie_grace = self.config.zombie_grace;

        tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut round: u64 = 0;

            loop {
                ticker.tick().await;
                round += 1;

                bus.emit(RoundTick {
                    round,
                    timestamp: current_timestamp(),
                });
                process_round(&bus, &registry).await;
                reap_zombies(&bus, &registry, zombie_grace).await;
            }
        })
    }

    /// Initiates server shutdown.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    pub fn get_event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn get_registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn get_session_context(&self) -> Arc<SessionContext> {
        self.context.clone()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.registry.stats()
    }
}

/// Binds a non-blocking listener with address reuse.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();

    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Network(format!("Bind to {addr} failed: {e}")))?;

    socket
        .listen(1024)
        .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("Could not make listener non-blocking: {e}")))?;

    TcpListener::from_std(std_listener)
        .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
}

/// Zombies hold no socket, so they never count against the limit.
fn at_capacity(registry: &ConnectionRegistry, max_connections: usize) -> bool {
    max_connections > 0 && registry.live_count() >= max_connections
}

/// Removes zombies older than `grace` and emits their final
/// `ConnectionClosed`.
pub async fn reap_zombies(bus: &EventBus, registry: &ConnectionRegistry, grace: Duration) -> usize {
    let reaped = registry.reap_zombies(grace).await;
    for &connection_id in &reaped {
        info!("🧟 Zombie connection {} expired", connection_id);
        bus.emit(ConnectionClosed {
            connection_id,
            zombie: false,
        });
    }
    reaped.len()
}

async fn accept_telnet(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    context: Arc<SessionContext>,
    max_connections: usize,
) {
    loop {
        match listener.accept().await {
            Ok((mut stream, addr)) => {
                if at_capacity(&registry, max_connections) {
                    warn!("Refusing telnet connection from {}: {} connections active", addr, max_connections);
                    let _ = stream.write_all(SERVER_FULL).await;
                    continue;
                }

                let record = registry.add(Arc::new(TelnetTransport::new(stream, addr)));
                tokio::spawn(Session::new(registry.clone(), context.clone(), record).run());
            }
            Err(e) => {
                error!("Failed to accept telnet connection: {}", e);
                break;
            }
        }
    }
}

async fn accept_websocket(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    context: Arc<SessionContext>,
    config: ServerConfig,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if at_capacity(&registry, config.max_connections) {
                    warn!("Refusing WebSocket connection from {}: {} connections active", addr, config.max_connections);
                    continue;
                }

                let registry = registry.clone();
                let context = context.clone();
                let heartbeat = config.heartbeat;

                tokio::spawn(async move {
                    let ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!("WebSocket handshake with {} failed: {}", addr, e);
                            return;
                        }
                    };
                    let record = registry.add(WebSocketTransport::new(ws, addr, heartbeat));
                    Session::new(registry, context, record).run().await;
                });
            }
            Err(e) => {
                error!("Failed to accept WebSocket connection: {}", e);
                break;
            }
        }
    }
}

/// Drains every event queue once.
///
/// Outbound types are dispatched first and then written to the matching
/// sessions; everything else is simply dispatched. Returns how many events
/// were handled.
pub async fn process_round(bus: &EventBus, registry: &ConnectionRegistry) -> usize {
    let mut handled = 0;

    for (event_type, _) in bus.iterate_queues() {
        if !OUTBOUND_EVENT_TYPES.contains(&event_type.as_str()) {
            handled += bus.drain(&event_type);
            continue;
        }

        let queue = bus.get_queue(&event_type);
        while let Some(event) = queue.poll() {
            handled += 1;
            if !bus.dispatch(event.as_ref()) {
                continue;
            }
            deliver(event.as_ref(), registry).await;
        }
    }

    handled
}

enum Outbound<'a> {
    Broadcast(&'a Broadcast),
    WebClient(&'a WebClientCommand),
    Sound(&'a Msp),
    Gmcp(&'a GmcpOut),
}

impl<'a> Outbound<'a> {
    fn classify(event: &'a dyn Event) -> Option<Self> {
        let any = event.as_any();
        if let Some(e) = any.downcast_ref::<Broadcast>() {
            return Some(Outbound::Broadcast(e));
        }
        if let Some(e) = any.downcast_ref::<WebClientCommand>() {
            return Some(Outbound::WebClient(e));
        }
        if let Some(e) = any.downcast_ref::<Msp>() {
            return Some(Outbound::Sound(e));
        }
        any.downcast_ref::<GmcpOut>().map(Outbound::Gmcp)
    }
}

/// Writes one outbound event to its sessions. Inbound GMCP and any other
/// payload are ignored.
pub async fn deliver(event: &dyn Event, registry: &ConnectionRegistry) {
    let Some(outbound) = Outbound::classify(event) else {
        return;
    };

    match outbound {
        Outbound::Broadcast(broadcast) => {
            let mut bytes = Vec::with_capacity(broadcast.text.len() + 8);
            if !broadcast.skip_line_refresh {
                bytes.extend(ansi::MOVE_CURSOR_COLUMN.bytes_with_payload(b"1"));
                bytes.extend(ansi::ERASE_LINE.bytes());
            }
            bytes.extend_from_slice(broadcast.text.as_bytes());
            registry.broadcast(&bytes, &[]).await;
        }
        Outbound::WebClient(command) => {
            let Some(record) = registry.get(command.connection_id) else {
                return;
            };
            if record.is_framed() {
                registry.send_to(command.text.as_bytes(), &[record.id()]).await;
            }
        }
        Outbound::Sound(sound) => {
            let Some(record) = registry.get(sound.connection_id) else {
                return;
            };
            let framed = record.is_framed();
            if !framed && !record.settings().msp_enabled {
                return;
            }
            let frames = record.with_last_music(|last| msp::render(sound, framed, last));
            for frame in frames {
                registry.send_to(&frame, &[record.id()]).await;
            }
        }
        Outbound::Gmcp(package) => {
            let Some(record) = registry.get(package.connection_id) else {
                return;
            };
            // framed transports cannot carry telnet sub-negotiation
            if record.is_framed() || !record.settings().gmcp_module_enabled(&package.module) {
                return;
            }
            let bytes = gmcp::encode(&package.module, &package.payload);
            registry.send_to(&bytes, &[record.id()]).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectState;
    use crate::transport::MemoryTransport;
    use lantern_event_system::{GmcpIn, SoundType};

    fn logged_in(registry: &ConnectionRegistry, framed: bool) -> Arc<MemoryTransport> {
        let transport = MemoryTransport::new(framed);
        let record = registry.add(transport.clone());
        record.set_state(ConnectState::LoggedIn);
        transport
    }

    #[tokio::test]
    async fn test_broadcast_delivery() {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new();
        let player = logged_in(&registry, false);
        let lobby = MemoryTransport::new(false);
        registry.add(lobby.clone());

        bus.emit(Broadcast {
            text: "Hello\n".to_string(),
            skip_line_refresh: true,
        });
        assert_eq!(process_round(&bus, &registry).await, 1);
        assert_eq!(player.take_written(), b"Hello\r\n".to_vec());
        assert!(lobby.written().is_empty());

        bus.emit(Broadcast {
            text: "Again".to_string(),
            skip_line_refresh: false,
        });
        process_round(&bus, &registry).await;
        let written = player.take_written();
        assert!(written.starts_with(&[ansi::ESC, b'[', b'1', b'G']));
        assert!(written.ends_with(b"Again"));
    }

    #[tokio::test]
    async fn test_halting_listener_cancels_delivery() {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new();
        let player = logged_in(&registry, false);

        bus.on(|b: &Broadcast| {
            if b.text.contains("secret") {
                ListenerResult::Halt
            } else {
                ListenerResult::Continue
            }
        });
        bus.emit(Broadcast {
            text: "secret".to_string(),
            skip_line_refresh: true,
        });
        bus.emit(Broadcast {
            text: "public".to_string(),
            skip_line_refresh: true,
        });
        process_round(&bus, &registry).await;
        assert_eq!(player.written(), b"public".to_vec());
    }

    #[tokio::test]
    async fn test_web_client_command_only_framed() {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new();
        let telnet = logged_in(&registry, false);
        let web = logged_in(&registry, true);

        for connection_id in [1, 2] {
            bus.emit(WebClientCommand {
                connection_id,
                text: "TEXTMASK:true".to_string(),
            });
        }
        process_round(&bus, &registry).await;
        assert!(telnet.written().is_empty());
        assert_eq!(web.written(), b"TEXTMASK:true".to_vec());
    }

    #[tokio::test]
    async fn test_music_deduplicated() {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new();
        let web = logged_in(&registry, true);

        for _ in 0..2 {
            bus.emit(Msp {
                connection_id: 1,
                sound_type: SoundType::Music,
                sound_file: "town.mp3".to_string(),
                volume: 50,
                ..Default::default()
            });
        }
        process_round(&bus, &registry).await;
        let written = String::from_utf8(web.take_written()).unwrap();
        assert_eq!(written.matches("!!MUSIC(town.mp3").count(), 1);
    }

    #[tokio::test]
    async fn test_msp_needs_negotiation_on_telnet() {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new();
        let telnet = logged_in(&registry, false);

        let sound = Msp {
            connection_id: 1,
            sound_file: "bell.wav".to_string(),
            volume: 100,
            ..Default::default()
        };
        bus.emit(sound.clone());
        process_round(&bus, &registry).await;
        assert!(telnet.written().is_empty());

        registry.get(1).unwrap().update_settings(|s| s.msp_enabled = true);
        bus.emit(sound);
        process_round(&bus, &registry).await;
        assert!(telnet.written().starts_with(msp::MSP_COMMAND.chars));
    }

    #[tokio::test]
    async fn test_gmcp_out_needs_module() {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new();
        let telnet = logged_in(&registry, false);
        registry.get(1).unwrap().update_settings(|s| {
            s.gmcp_enabled = true;
            s.gmcp_modules.insert("Char".to_string(), 1);
        });

        bus.emit(GmcpOut {
            connection_id: 1,
            module: "Room.Info".to_string(),
            ..Default::default()
        });
        bus.emit(GmcpOut {
            connection_id: 1,
            module: "Char.Vitals".to_string(),
            payload: serde_json::json!({"hp": 10}),
            ..Default::default()
        });
        // inbound packages share the queue and are only dispatched
        bus.emit(GmcpIn {
            connection_id: 1,
            command: "Core.Ping".to_string(),
            json: Vec::new(),
        });
        assert_eq!(process_round(&bus, &registry).await, 3);
        assert_eq!(
            telnet.written(),
            gmcp::GMCP_PAYLOAD.bytes_with_payload(br#"Char.Vitals {"hp":10}"#)
        );
    }

    #[tokio::test]
    async fn test_zombies_expire_and_free_capacity() {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new();
        logged_in(&registry, false);
        logged_in(&registry, false);
        registry.kick(1).await.unwrap();

        assert!(!at_capacity(&registry, 2));
        assert_eq!(reap_zombies(&bus, &registry, Duration::from_secs(60)).await, 0);
        assert!(registry.get(1).is_some());

        assert_eq!(reap_zombies(&bus, &registry, Duration::ZERO).await, 1);
        assert!(registry.get(1).is_none());
        assert_eq!(registry.active_count(), 1);

        let closed = bus.get_queue(ConnectionClosed::EVENT_TYPE);
        let event = closed.poll().unwrap();
        let closed = event.as_any().downcast_ref::<ConnectionClosed>().unwrap();
        assert_eq!((closed.connection_id, closed.zombie), (1, false));
    }

    #[tokio::test]
    async fn test_bind_listener_ephemeral() {
        let listener = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_shutdown_sender_installed() {
        let server = LanternServer::new(ServerConfig::default());
        assert!(!server.get_registry().signal_shutdown());
        let mut rx = server.shutdown_sender.subscribe();
        assert!(server.get_registry().signal_shutdown());
        assert!(rx.try_recv().is_ok());
    }
}
