//! The per-connection task.
//!
//! A session negotiates telnet options, runs the login dialog through the
//! handler chain, swaps in the in-game handlers once the player is in, and
//! turns every submitted line into an [`Input`] event. Whatever the
//! handlers queued on the [`SharedState`] is carried out here, after the
//! chain returns.

use crate::connection::{ConnectState, ConnectionId, ConnectionRecord, ConnectionRegistry};
use crate::input::handlers::{self, countdown_announces, handler};
use crate::input::login::login_handler;
use crate::input::{ClientInput, Disconnect, SessionContext, SharedState};
use crate::protocol::{ansi, gmcp, msdp, msp, telnet};
use lantern_event_system::{Broadcast, ConnectionClosed, ConnectionOpened, Input};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bytes requested per read.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Option negotiation sent to raw telnet clients on connect: character
/// mode, server-side echo and window size reports, then offers of CHARSET,
/// GMCP, MSP and MSDP. Ends with an ANSI resolution request for clients
/// that ignore NAWS.
///
/// The charset name itself goes out once the client agrees with `DO CHARSET`.
pub fn negotiation_bytes() -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend(telnet::SUPPRESS_GO_AHEAD.bytes());
    out.extend(telnet::LINEMODE_OFF.bytes());
    out.extend(telnet::ECHO_ON.bytes());
    out.extend(telnet::SCREEN_SIZE_REQUEST.bytes());
    out.extend(telnet::REQUEST_CHARSET.bytes());
    out.extend(gmcp::GMCP_ENABLE.bytes());
    out.extend(msp::MSP_ENABLE.bytes());
    out.extend(msdp::MSDP_ENABLE.bytes());
    out.extend(ansi::request_resolution());
    out
}

/// Installs the handlers every session starts with.
pub fn install_login_handlers(record: &ConnectionRecord, context: &SessionContext) {
    record.add_handler(handlers::TELNET_IAC, handler(handlers::telnet_iac), None);
    record.add_handler(handlers::ANSI, handler(handlers::ansi), None);
    record.add_handler(handlers::CLEANSER, handler(handlers::cleanser), None);
    record.add_handler(handlers::LOGIN, login_handler(context), None);
}

/// Replaces the login dialog with the in-game handlers and marks the
/// session as logged in.
pub fn install_game_handlers(record: &ConnectionRecord) {
    record.remove_handler(handlers::LOGIN);
    record.add_handler(handlers::ECHO, handler(handlers::echo), None);
    record.add_handler(handlers::HISTORY, handler(handlers::history), None);
    record.add_handler(handlers::SYSTEM_COMMAND, handler(handlers::system_command), None);
    // control keys rewrite the input, so they run right after escape handling
    record.add_handler(handlers::SIGNAL, handler(handlers::signal), Some(handlers::ANSI));
    record.set_state(ConnectState::LoggedIn);
}

/// Counts down, announcing on the bus, then asks the server to stop.
pub fn start_shutdown_countdown(
    total: u64,
    registry: Arc<ConnectionRegistry>,
    context: Arc<SessionContext>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("⏳ Shutdown scheduled in {} seconds", total);
        for remaining in (1..=total).rev() {
            if countdown_announces(remaining, total) {
                context.bus.emit(Broadcast {
                    text: format!("Shutting down in {} seconds.\n", remaining),
                    skip_line_refresh: false,
                });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        if !registry.signal_shutdown() {
            warn!("Shutdown countdown finished but nothing is listening");
        }
    })
}

pub struct Session {
    registry: Arc<ConnectionRegistry>,
    context: Arc<SessionContext>,
    record: Arc<ConnectionRecord>,
    input: ClientInput,
    shared: SharedState,
}

impl Session {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        context: Arc<SessionContext>,
        record: Arc<ConnectionRecord>,
    ) -> Self {
        let input = ClientInput::new(record.id());
        let shared = SharedState::new(record.clone(), context.clone());
        Self {
            registry,
            context,
            record,
            input,
            shared,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.record.id()
    }

    /// Runs the session until the client goes away or is disconnected.
    pub async fn run(mut self) {
        let id = self.id();
        let remote_addr = self.record.remote_addr();
        debug!("Session for connection {} started from {}", id, remote_addr);

        if !self.setup().await {
            debug!("Connection {} dropped during setup", id);
            return;
        }

        self.context.bus.emit(ConnectionOpened {
            connection_id: id,
            remote_addr: remote_addr.to_string(),
            framed: self.record.is_framed(),
        });

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            self.input.reset_flags();

            let n = match self.record.transport().read(&mut buf).await {
                Ok(0) => {
                    debug!("Connection {} reached end of stream", id);
                    self.end().await;
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("Read from connection {} failed: {}", id, e);
                    self.end().await;
                    break;
                }
            };

            if self.record.input_disabled() {
                continue;
            }

            self.input.data_in = buf[..n].to_vec();
            if !self.process().await {
                break;
            }
        }

        debug!("Session for connection {} ended ({})", id, self.record.state());
    }

    async fn setup(&mut self) -> bool {
        if !self.record.is_framed() {
            self.shared.send(negotiation_bytes());
        }

        install_login_handlers(&self.record, &self.context);
        self.shared.send(self.context.login_rules.banner.clone());

        // an empty pass sends the first prompt
        if let Err(e) = self.record.handle_input(&mut self.input, &mut self.shared) {
            warn!("Connection {} could not start its login dialog: {}", self.id(), e);
        }
        self.flush().await
    }

    /// Handles one read. Returns false once the session is over.
    async fn process(&mut self) -> bool {
        let id = self.id();

        let (continued, last) = match self.record.handle_input(&mut self.input, &mut self.shared) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Input handling for connection {} failed: {}", id, e);
                return true;
            }
        };

        if !self.flush().await {
            self.context.bus.emit(ConnectionClosed {
                connection_id: id,
                zombie: false,
            });
            return false;
        }

        if let Some(kind) = self.shared.disconnect.take() {
            self.disconnect(kind).await;
            return false;
        }

        if let Some(secs) = self.shared.shutdown_in.take() {
            start_shutdown_countdown(secs, self.registry.clone(), self.context.clone());
        }

        if !continued {
            return true;
        }

        if last == handlers::LOGIN {
            if let Some(outcome) = &self.shared.login {
                info!("🎮 {} entered the game on connection {}", outcome.username, id);
            }
            install_game_handlers(&self.record);
        }

        if self.input.enter_pressed {
            self.context.bus.emit(Input {
                connection_id: id,
                input_text: String::from_utf8_lossy(&self.input.buffer).into_owned(),
                ..Default::default()
            });
            self.input.reset();
        }
        true
    }

    /// Sends queued replies. Returns false when the connection is gone.
    async fn flush(&mut self) -> bool {
        let id = self.id();
        for bytes in self.shared.take_outbound() {
            if self.registry.send_to(&bytes, &[id]).await.is_empty() {
                return false;
            }
        }
        true
    }

    async fn disconnect(&mut self, kind: Disconnect) {
        let id = self.id();
        let result = match kind {
            Disconnect::Kick => self.registry.kick(id).await,
            Disconnect::Remove => self.registry.remove(id).await,
        };
        if let Err(e) = result {
            debug!("Disconnect of connection {} skipped: {}", id, e);
        }
        self.context.bus.emit(ConnectionClosed {
            connection_id: id,
            zombie: self.record.state() == ConnectState::Zombie,
        });
    }

    /// The transport is gone. Players keep their record as a zombie;
    /// anyone still logging in is forgotten.
    async fn end(&mut self) {
        match self.record.state() {
            ConnectState::Login => self.disconnect(Disconnect::Remove).await,
            ConnectState::LoggedIn => self.disconnect(Disconnect::Kick).await,
            ConnectState::Zombie => {
                self.context.bus.emit(ConnectionClosed {
                    connection_id: self.id(),
                    zombie: true,
                });
            }
        }
    }
}
