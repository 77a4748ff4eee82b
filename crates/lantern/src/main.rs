//! Lantern server entry point.
//!
//! Loads the configuration, applies command-line overrides, installs
//! logging and runs the server until a signal or an in-game `/shutdown`
//! stops it.

mod cli;
mod config;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use lantern_event_system::System;
use lantern_server::{LanternServer, ListenerResult, MemoryAccountStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long the accept loops get to wind down after a signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(fmt::layer().json().with_thread_ids(true).with_thread_names(true))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_ansi(true).with_target(false).with_thread_ids(true))
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

async fn load_config(args: &CliArgs) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;

    if let Some(bind_address) = &args.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(ws_bind_address) = &args.ws_bind_address {
        config.server.ws_bind_address = ws_bind_address.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let server = Arc::new(LanternServer::with_accounts(
        config.to_server_config()?,
        Arc::new(MemoryAccountStore::new()),
        config.login.clone(),
    ));

    server.get_event_bus().on(|event: &System| {
        if event.command == "reload" {
            warn!("🔄 Reload requested, but this build has no reloadable content");
        }
        ListenerResult::Continue
    });

    info!("📋 Configuration Summary:");
    info!("  🌐 Telnet: {}", config.server.bind_address);
    if config.server.ws_bind_address.is_empty() {
        info!("  🌐 WebSocket: disabled");
    } else {
        info!("  🌐 WebSocket: {}", config.server.ws_bind_address);
    }
    info!("  👥 Max connections: {}", config.server.max_connections);
    info!("  🕒 Round interval: {}ms", config.server.tick_interval_ms);
    info!("  🧟 Zombie grace: {}s", config.server.zombie_grace_secs);

    let mut server_handle = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await })
    };

    info!("🛑 Press Ctrl+C to gracefully shutdown, send SIGHUP to reload");

    tokio::select! {
        result = &mut server_handle => {
            // an in-game /shutdown ends the server on its own
            result.context("server task panicked")??;
        }
        signal = signals::watch(&server) => {
            signal?;
            info!("🛑 Shutdown signal received, waiting for the server to stop...");
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_handle).await {
                Ok(result) => result.context("server task panicked")??,
                Err(_) => {
                    warn!("⏳ Server did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                    server_handle.abort();
                }
            }
        }
    }

    let stats = server.stats();
    info!(
        "📊 Final statistics: {} connections served, {} disconnected",
        stats.connected, stats.disconnected
    );
    info!("👋 Lantern server stopped");
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // configuration comes first so the logging settings are known
    let config = match load_config(&args).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };
    setup_logging(&config.logging)?;
    info!("🚀 Lantern server v{}", env!("CARGO_PKG_VERSION"));
    info!("📂 Config: {}", args.config_path.display());

    if let Err(e) = run(config).await {
        error!("❌ Server error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
