//! Configuration management for the Lantern server.
//!
//! Settings are read from a TOML file with `[server]`, `[logging]` and
//! `[login]` sections. Missing keys fall back to their defaults, and a
//! missing file is created with every default written out.

use anyhow::{bail, Context};
use lantern_server::{HeartbeatConfig, LoginRules, ServerConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub login: LoginRules,
}

/// Listener, limit and timing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address raw telnet clients connect to
    pub bind_address: String,
    /// Address web clients connect to. Empty disables the listener.
    pub ws_bind_address: String,
    /// Maximum concurrent connections, 0 for unlimited
    pub max_connections: usize,
    /// Round producer interval in milliseconds, 0 disables it
    pub tick_interval_ms: u64,
    /// Seconds a web client may stay silent before it is dropped
    pub pong_wait_secs: u64,
    /// Base URL for MSP sound files
    pub msp_cdn_url: String,
    /// Seconds a dropped player is kept as a zombie
    pub zombie_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_address: defaults.telnet_address.to_string(),
            ws_bind_address: defaults
                .websocket_address
                .map(|addr| addr.to_string())
                .unwrap_or_default(),
            max_connections: defaults.max_connections,
            tick_interval_ms: defaults.tick_interval_ms,
            pong_wait_secs: defaults.heartbeat.pong_wait.as_secs(),
            msp_cdn_url: defaults.msp_cdn_url,
            zombie_grace_secs: defaults.zombie_grace.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter, overridden by `RUST_LOG`
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, writing the defaults there first
    /// when the file does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config = toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            bail!("Invalid bind address: {}", self.server.bind_address);
        }
        if !self.server.ws_bind_address.is_empty() && self.server.ws_bind_address.parse::<SocketAddr>().is_err() {
            bail!("Invalid WebSocket bind address: {}", self.server.ws_bind_address);
        }
        if self.server.bind_address == self.server.ws_bind_address {
            bail!("Telnet and WebSocket listeners cannot share {}", self.server.bind_address);
        }
        if self.server.pong_wait_secs == 0 {
            bail!("pong_wait_secs must be greater than zero");
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            );
        }
        if self.login.name_min == 0 || self.login.name_min > self.login.name_max {
            bail!("login name lengths must satisfy 0 < name_min <= name_max");
        }
        if self.login.password_min == 0 || self.login.password_min > self.login.password_max {
            bail!("login password lengths must satisfy 0 < password_min <= password_max");
        }
        Ok(())
    }

    /// Builds the server configuration. Call [`validate`](Self::validate) first.
    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        let websocket_address = if self.server.ws_bind_address.is_empty() {
            None
        } else {
            Some(self.server.ws_bind_address.parse()?)
        };

        let pong_wait = Duration::from_secs(self.server.pong_wait_secs);
        Ok(ServerConfig {
            telnet_address: self.server.bind_address.parse()?,
            websocket_address,
            max_connections: self.server.max_connections,
            heartbeat: HeartbeatConfig {
                pong_wait,
                ping_period: pong_wait * 9 / 10,
                ..HeartbeatConfig::default()
            },
            tick_interval_ms: self.server.tick_interval_ms,
            msp_cdn_url: self.server.msp_cdn_url.clone(),
            zombie_grace: Duration::from_secs(self.server.zombie_grace_secs),
        })
    }
}
