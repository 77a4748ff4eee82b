//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize the listeners, the heartbeat and the round producer.

use std::net::SocketAddr;
use std::time::Duration;

/// Keep-alive timings for framed (WebSocket) transports.
///
/// `ping_period` must stay below `pong_wait`, otherwise a healthy peer is
/// timed out before it has been asked to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How long a read may wait for any frame (pongs included)
    pub pong_wait: Duration,
    /// How often a ping is sent
    pub ping_period: Duration,
    /// Deadline for writing a single ping
    pub write_wait: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Configuration structure for the Lantern server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address for raw telnet clients
    pub telnet_address: SocketAddr,

    /// Address for web clients, `None` disables the WebSocket listener
    pub websocket_address: Option<SocketAddr>,

    /// Maximum number of concurrent connections allowed, 0 for unlimited
    pub max_connections: usize,

    /// Keep-alive settings for WebSocket clients
    pub heartbeat: HeartbeatConfig,

    /// Round producer interval in milliseconds, 0 disables it
    pub tick_interval_ms: u64,

    /// Base URL clients download MSP sound files from
    pub msp_cdn_url: String,

    /// How long a dropped player's record is kept as a zombie before the
    /// round producer removes it
    pub zombie_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            telnet_address: SocketAddr::from(([127, 0, 0, 1], 4000)),
            websocket_address: Some(SocketAddr::from(([127, 0, 0, 1], 4001))),
            max_connections: 1000,
            heartbeat: HeartbeatConfig::default(),
            tick_interval_ms: 50,
            msp_cdn_url: "http://127.0.0.1:4001/static/public/audio/".to_string(),
            zombie_grace: Duration::from_secs(60),
        }
    }
}
