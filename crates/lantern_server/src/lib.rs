//! # Lantern Server
//!
//! The connection and protocol layer of the Lantern text-game server. It
//! accepts raw telnet and WebSocket clients, negotiates telnet options and
//! their sub-protocols, and runs each client's bytes through an ordered
//! chain of input handlers that ends in a login dialog. Submitted lines
//! leave as typed `Input` events on the shared
//! [`EventBus`](lantern_event_system::EventBus).
//!
//! The server contains **no game logic**. Game code registers listeners on
//! the bus, reacts to `Input`, and pushes outbound events (`Broadcast`,
//! `Msp`, `GMCP`, `WebClientCommand`) that the round producer delivers.
//!
//! ## Data flow
//!
//! 1. Bytes arrive on a [`Transport`](transport::Transport)
//! 2. `telnet_iac` and `ansi` strip and act on out-of-band commands
//! 3. `cleanser` builds the edit buffer; `login` or `echo` answer the client
//! 4. An entered line becomes an `Input` event
//! 5. Listeners react and may emit further events
//! 6. The registry writes outbound bytes back through the transports
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lantern_server::{create_server, ListenerResult};
//! use lantern_event_system::Input;
//!
//! # async fn run() -> Result<(), lantern_server::ServerError> {
//! let server = create_server();
//! server.get_event_bus().on(|input: &Input| {
//!     println!("{} typed {:?}", input.connection_id, input.input_text);
//!     ListenerResult::Continue
//! });
//! server.start().await
//! # }
//! ```

pub use config::{HeartbeatConfig, ServerConfig};
pub use connection::{ConnectState, ConnectionId, ConnectionRecord, ConnectionRegistry, ConnectionStats};
pub use error::{AccountError, InputError, ProtocolError, ServerError};
pub use input::{AccountStore, LoginRules, MemoryAccountStore, SessionContext};
pub use lantern_event_system::ListenerResult;
pub use server::LanternServer;

pub mod config;
pub mod connection;
pub mod error;
pub mod input;
pub mod protocol;
pub mod server;
pub mod transport;

/// Creates a server with the default configuration.
pub fn create_server() -> LanternServer {
    LanternServer::new(ServerConfig::default())
}

/// Creates a server with a custom configuration.
pub fn create_server_with_config(config: ServerConfig) -> LanternServer {
    LanternServer::new(config)
}
