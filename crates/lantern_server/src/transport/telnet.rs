use super::Transport;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// A raw TCP byte stream carrying telnet traffic.
///
/// The socket is split so a read parked in the session task never blocks
/// writers.
pub struct TelnetTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    remote_addr: SocketAddr,
    closed: watch::Sender<bool>,
}

impl TelnetTransport {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", remote_addr, e);
        }
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            remote_addr,
            closed,
        }
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(0);
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            result = reader.read(buf) => result,
            _ = closed.changed() => Ok(0),
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        if *self.closed.borrow() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        Ok(bytes.len())
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Telnet shutdown for {} failed: {}", self.remote_addr, e);
        }
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn is_framed(&self) -> bool {
        false
    }
}
