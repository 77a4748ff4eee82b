//! The per-connection input pipeline.
//!
//! Every read runs the connection's ordered handler chain over a
//! [`ClientInput`]. Handlers are synchronous; anything that needs I/O
//! (replies, disconnects, a shutdown countdown) is recorded on the
//! [`SharedState`] and carried out by the session task once the chain
//! returns.

pub mod handlers;
pub mod login;
pub mod prompt;
pub mod question;

use crate::connection::{ConnectionId, ConnectionRecord, InputHistory};
use lantern_event_system::{Event, EventBus};
use std::sync::Arc;

pub use login::{AccountStore, LoginOutcome, LoginRules, MemoryAccountStore};
pub use prompt::{PromptState, PromptStep};
pub use question::Question;

/// A named step in the chain. Returning `false` stops the chain.
pub type InputHandler = Arc<dyn Fn(&mut ClientInput, &mut SharedState) -> bool + Send + Sync>;

/// Everything known about the input of one connection.
#[derive(Debug, Clone, Default)]
pub struct ClientInput {
    pub connection_id: ConnectionId,
    /// Bytes from the latest read, rewritten in place by handlers
    pub data_in: Vec<u8>,
    /// The line being edited
    pub buffer: Vec<u8>,
    /// Pasted by Ctrl-P
    pub clipboard: Vec<u8>,
    pub last_submitted: Vec<u8>,
    pub enter_pressed: bool,
    pub bs_pressed: bool,
    pub tab_pressed: bool,
    pub history: InputHistory,
}

impl ClientInput {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            ..Default::default()
        }
    }

    /// Clears the per-read flags. Called before every read.
    pub fn reset_flags(&mut self) {
        self.enter_pressed = false;
        self.bs_pressed = false;
        self.tab_pressed = false;
    }

    /// Back to "no current input".
    pub fn reset(&mut self) {
        self.data_in.clear();
        self.buffer.clear();
        self.enter_pressed = false;
    }
}

/// How the session should end, when a handler asks it to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Close the transport but keep the record
    Kick,
    /// Close the transport and forget the record
    Remove,
}

/// Services every session shares.
pub struct SessionContext {
    pub bus: Arc<EventBus>,
    pub accounts: Arc<dyn AccountStore>,
    pub login_rules: LoginRules,
    pub msp_cdn_url: String,
}

impl SessionContext {
    pub fn new(bus: Arc<EventBus>, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            bus,
            accounts,
            login_rules: LoginRules::default(),
            msp_cdn_url: String::new(),
        }
    }
}

/// Per-connection state shared by every handler in the chain.
pub struct SharedState {
    pub record: Arc<ConnectionRecord>,
    pub context: Arc<SessionContext>,
    /// Replies queued by handlers, in order
    pub outbound: Vec<Vec<u8>>,
    pub disconnect: Option<Disconnect>,
    /// Seconds until shutdown, set by `/shutdown`
    pub shutdown_in: Option<u64>,
    pub prompt: Option<PromptState>,
    pub login: Option<LoginOutcome>,
}

impl SharedState {
    pub fn new(record: Arc<ConnectionRecord>, context: Arc<SessionContext>) -> Self {
        Self {
            record,
            context,
            outbound: Vec::new(),
            disconnect: None,
            shutdown_in: None,
            prompt: None,
            login: None,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.record.id()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.context.bus
    }

    /// Queues a reply to this connection.
    pub fn send(&mut self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.outbound.push(bytes);
        }
    }

    pub fn emit<E: Event>(&self, event: E) {
        self.context.bus.emit(event);
    }

    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    /// Requests a disconnect. A removal is never downgraded to a kick.
    pub fn request_disconnect(&mut self, kind: Disconnect) {
        if self.disconnect != Some(Disconnect::Remove) {
            self.disconnect = Some(kind);
        }
    }
}
