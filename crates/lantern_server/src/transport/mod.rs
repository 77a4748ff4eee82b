//! Transport abstraction.
//!
//! A [`Transport`] hides whether a session arrived as a raw telnet byte
//! stream or as a message-framed WebSocket. The read loop, the registry and
//! the input pipeline only ever see this trait.

mod heartbeat;
mod memory;
mod telnet;
mod websocket;

pub use heartbeat::Heartbeat;
pub use memory::MemoryTransport;
pub use telnet::TelnetTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Bytes in, bytes out, for one connected client.
///
/// All methods take `&self` so a transport can be shared between the read
/// task and any number of writers as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reads the next chunk of client data. `Ok(0)` means end of stream.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `bytes` as given. Returns how many bytes were accepted.
    async fn write(&self, bytes: &[u8]) -> io::Result<usize>;

    /// Closes the underlying socket. Pending and future reads return `Ok(0)`.
    async fn close(&self);

    fn remote_addr(&self) -> SocketAddr;

    /// True for message-framed transports, which cannot carry telnet commands.
    fn is_framed(&self) -> bool;
}
