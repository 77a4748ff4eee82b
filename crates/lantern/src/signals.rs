//! Process signals mapped onto the server's own controls.
//!
//! SIGINT and SIGTERM go through the registry's shutdown channel, the same
//! path an in-game `/shutdown` ends on. SIGHUP asks for a reload.

use lantern_event_system::System;
use lantern_server::LanternServer;
use tokio::signal;
use tracing::{info, warn};

/// What a signal asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Reload,
}

impl SignalAction {
    /// Applies the action. Returns true when the server is now stopping.
    pub fn apply(self, server: &LanternServer) -> bool {
        match self {
            SignalAction::Shutdown => {
                if !server.get_registry().signal_shutdown() {
                    warn!("Shutdown signal had no listener, the server may already be stopping");
                }
                true
            }
            SignalAction::Reload => {
                server.get_event_bus().emit(System {
                    command: "reload".to_string(),
                    data: None,
                });
                false
            }
        }
    }
}

/// Applies incoming signals to `server` until one of them stops it.
#[cfg(unix)]
pub async fn watch(server: &LanternServer) -> anyhow::Result<()> {
    use signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        let action = tokio::select! {
            _ = sigint.recv() => {
                info!("📡 Received SIGINT");
                SignalAction::Shutdown
            }
            _ = sigterm.recv() => {
                info!("📡 Received SIGTERM");
                SignalAction::Shutdown
            }
            _ = sighup.recv() => {
                info!("📡 Received SIGHUP");
                SignalAction::Reload
            }
        };
        if action.apply(server) {
            return Ok(());
        }
    }
}

/// Applies Ctrl+C to `server`.
#[cfg(not(unix))]
pub async fn watch(server: &LanternServer) -> anyhow::Result<()> {
    signal::ctrl_c().await?;
    info!("📡 Received Ctrl+C");
    SignalAction::Shutdown.apply(server);
    Ok(())
}
