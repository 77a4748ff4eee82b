use super::{ClientSettings, ConnectState, ConnectionId};
use crate::error::InputError;
use crate::input::{ClientInput, InputHandler, SharedState};
use crate::transport::Transport;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct NamedHandler {
    name: String,
    handler: InputHandler,
}

/// One live session.
///
/// Capability settings sit behind their own read-preferring lock because
/// broadcast paths read them from other tasks while the session's read
/// task is the only writer. The handler chain is copy-on-write: a chain
/// run works on a snapshot, so handlers may add or remove handlers
/// (including themselves) mid-run.
pub struct ConnectionRecord {
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    settings: RwLock<ClientSettings>,
    handlers: Mutex<Arc<Vec<NamedHandler>>>,
    input_disabled: AtomicBool,
    last_input: Mutex<Instant>,
    last_music: Mutex<Option<String>>,
    connected_at: Instant,
    closed_at: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("remote_addr", &self.transport.remote_addr())
            .field("state", &self.state())
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl ConnectionRecord {
    pub fn new(id: ConnectionId, transport: Arc<dyn Transport>) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport,
            state: AtomicU8::new(ConnectState::Login as u8),
            settings: RwLock::new(ClientSettings::default()),
            handlers: Mutex::new(Arc::new(Vec::new())),
            input_disabled: AtomicBool::new(false),
            last_input: Mutex::new(now),
            last_music: Mutex::new(None),
            connected_at: now,
            closed_at: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectState {
        ConnectState::from(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.transport.remote_addr()
    }

    pub fn is_framed(&self) -> bool {
        self.transport.is_framed()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// A copy of the negotiated settings.
    pub fn settings(&self) -> ClientSettings {
        self.settings.read().clone()
    }

    pub fn update_settings<R>(&self, f: impl FnOnce(&mut ClientSettings) -> R) -> R {
        f(&mut self.settings.write())
    }

    pub fn input_disabled(&self) -> bool {
        self.input_disabled.load(Ordering::Acquire)
    }

    pub fn set_input_disabled(&self, disabled: bool) {
        self.input_disabled.store(disabled, Ordering::Release);
    }

    /// Time since the last chain run.
    pub fn idle_time(&self) -> Duration {
        self.last_input.lock().elapsed()
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Runs `f` against the last music track sent to this client.
    pub fn with_last_music<R>(&self, f: impl FnOnce(&mut Option<String>) -> R) -> R {
        f(&mut self.last_music.lock())
    }

    /// Inserts a handler right after `after`, or at the tail when `after`
    /// is `None` or not present.
    pub fn add_handler(&self, name: &str, handler: InputHandler, after: Option<&str>) {
        let mut guard = self.handlers.lock();
        let mut list = Vec::clone(&guard);
        let entry = NamedHandler {
            name: name.to_string(),
            handler,
        };
        match after.and_then(|a| list.iter().position(|h| h.name == a)) {
            Some(idx) => list.insert(idx + 1, entry),
            None => list.push(entry),
        }
        *guard = Arc::new(list);
    }

    /// Removes every handler registered under `name`.
    pub fn remove_handler(&self, name: &str) {
        let mut guard = self.handlers.lock();
        let mut list = Vec::clone(&guard);
        list.retain(|h| h.name != name);
        *guard = Arc::new(list);
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.lock().iter().map(|h| h.name.clone()).collect()
    }

    /// Runs the handler chain once.
    ///
    /// Returns whether every handler continued, and the name of the last
    /// handler that ran.
    pub fn handle_input(
        &self,
        input: &mut ClientInput,
        shared: &mut SharedState,
    ) -> Result<(bool, String), InputError> {
        *self.last_input.lock() = Instant::now();

        let snapshot = self.handlers.lock().clone();
        if snapshot.is_empty() {
            return Err(InputError::NoHandlers);
        }

        let mut last = String::new();
        for entry in snapshot.iter() {
            last.clone_from(&entry.name);
            if !(entry.handler)(input, shared) {
                return Ok((false, last));
            }
        }
        Ok((true, last))
    }

    /// Writes to the client, turning every bare `\n` into `\r\n`.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        let out = crlf(bytes);
        if out.is_empty() {
            return Ok(0);
        }
        self.transport.write(&out).await
    }

    /// Closes the transport. Returns false when it was already closed.
    pub async fn close(&self) -> bool {
        let first = {
            let mut closed_at = self.closed_at.lock();
            let first = closed_at.is_none();
            if first {
                *closed_at = Some(Instant::now());
            }
            first
        };
        self.transport.close().await;
        first
    }

    /// Time since the transport was first closed, `None` while it is open.
    pub fn closed_for(&self) -> Option<Duration> {
        self.closed_at.lock().map(|at| at.elapsed())
    }
}

fn crlf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 8);
    let mut prev = 0u8;
    for &b in bytes {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::handlers::handler;
    use crate::input::{MemoryAccountStore, SessionContext};
    use crate::transport::MemoryTransport;
    use lantern_event_system::EventBus;

    fn shared_for(record: Arc<ConnectionRecord>) -> SharedState {
        let context = SessionContext::new(Arc::new(EventBus::new()), Arc::new(MemoryAccountStore::new()));
        SharedState::new(record, Arc::new(context))
    }

    #[test]
    fn test_crlf() {
        assert_eq!(crlf(b"a\nb\r\nc"), b"a\r\nb\r\nc".to_vec());
        assert!(crlf(b"").is_empty());
    }

    #[tokio::test]
    async fn test_close_reports_first_close_only() {
        let transport = MemoryTransport::new(false);
        let record = ConnectionRecord::new(3, transport.clone());
        assert_eq!(record.closed_for(), None);

        assert!(record.close().await);
        assert!(!record.close().await);
        assert!(transport.is_closed());
        assert!(record.closed_for().is_some());
    }

    #[test]
    fn test_handler_order_and_halt() {
        let record = Arc::new(ConnectionRecord::new(7, MemoryTransport::new(false)));
        let mut input = ClientInput::new(7);
        let mut shared = shared_for(record.clone());

        assert_eq!(
            record.handle_input(&mut input, &mut shared),
            Err(InputError::NoHandlers)
        );

        record.add_handler("a", handler(|i, _| { i.buffer.push(b'a'); true }), None);
        record.add_handler("c", handler(|i, _| { i.buffer.push(b'c'); false }), None);
        record.add_handler("b", handler(|i, _| { i.buffer.push(b'b'); true }), Some("a"));
        record.add_handler("d", handler(|i, _| { i.buffer.push(b'd'); true }), Some("missing"));
        assert_eq!(record.handler_names(), vec!["a", "b", "c", "d"]);

        assert_eq!(
            record.handle_input(&mut input, &mut shared),
            Ok((false, "c".to_string()))
        );
        assert_eq!(input.buffer, b"abc".to_vec());

        record.remove_handler("c");
        input.buffer.clear();
        assert_eq!(
            record.handle_input(&mut input, &mut shared),
            Ok((true, "d".to_string()))
        );
        assert_eq!(input.buffer, b"abd".to_vec());
    }

    #[test]
    fn test_handler_may_remove_itself() {
        let record = Arc::new(ConnectionRecord::new(1, MemoryTransport::new(false)));
        let mut input = ClientInput::new(1);
        let mut shared = shared_for(record.clone());

        record.add_handler(
            "once",
            handler(|_, shared| {
                shared.record.remove_handler("once");
                true
            }),
            None,
        );
        record.add_handler("tail", handler(|_, _| true), None);

        assert_eq!(
            record.handle_input(&mut input, &mut shared),
            Ok((true, "tail".to_string()))
        );
        assert_eq!(record.handler_names(), vec!["tail"]);
    }

    #[tokio::test]
    async fn test_write_translates_newlines() {
        let transport = MemoryTransport::new(false);
        let record = ConnectionRecord::new(1, transport.clone());
        record.write(b"hi\n").await.unwrap();
        assert_eq!(transport.written(), b"hi\r\n".to_vec());
        assert_eq!(record.write(b"").await.unwrap(), 0);
    }
}
