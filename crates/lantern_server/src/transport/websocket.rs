use super::{Heartbeat, Transport};
use crate::config::HeartbeatConfig;
use crate::protocol::telnet::IAC;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error};

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsReceiver = SplitStream<WsStream>;

/// A message-framed WebSocket session.
///
/// Each text or binary frame is one read. Frames larger than the caller's
/// buffer are handed out over several reads. Reads fail with
/// [`io::ErrorKind::TimedOut`] when no frame at all arrives before the pong
/// deadline, which every pong pushes back by `pong_wait`.
pub struct WebSocketTransport {
    sink: Arc<Mutex<WsSink>>,
    receiver: Mutex<WsReceiver>,
    remote_addr: SocketAddr,
    pong_wait: std::time::Duration,
    read_deadline: parking_lot::Mutex<Instant>,
    leftover: parking_lot::Mutex<Vec<u8>>,
    heartbeat: parking_lot::Mutex<Option<Heartbeat>>,
    closed: watch::Sender<bool>,
}

impl WebSocketTransport {
    /// Wraps an accepted WebSocket and starts its heartbeat.
    pub fn new(ws: WsStream, remote_addr: SocketAddr, config: HeartbeatConfig) -> Arc<Self> {
        let (sink, receiver) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        let (closed, _) = watch::channel(false);

        let ping_sink = sink.clone();
        let heartbeat = Heartbeat::start(remote_addr.to_string(), config, move || {
            let sink = ping_sink.clone();
            async move {
                sink.lock()
                    .await
                    .send(Message::Ping(Default::default()))
                    .await
                    .map_err(io::Error::other)
            }
        });

        Arc::new(Self {
            sink,
            receiver: Mutex::new(receiver),
            remote_addr,
            pong_wait: config.pong_wait,
            read_deadline: parking_lot::Mutex::new(Instant::now() + config.pong_wait),
            leftover: parking_lot::Mutex::new(Vec::new()),
            heartbeat: parking_lot::Mutex::new(Some(heartbeat)),
            closed,
        })
    }

    fn take_leftover(&self, buf: &mut [u8]) -> Option<usize> {
        let mut leftover = self.leftover.lock();
        if leftover.is_empty() {
            return None;
        }
        let n = leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&leftover[..n]);
        leftover.drain(..n);
        Some(n)
    }

    fn deliver(&self, data: &[u8], buf: &mut [u8]) -> usize {
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        if n < data.len() {
            self.leftover.lock().extend_from_slice(&data[n..]);
        }
        n
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(n) = self.take_leftover(buf) {
            return Ok(n);
        }

        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(0);
        }

        let mut receiver = self.receiver.lock().await;
        loop {
            let deadline = *self.read_deadline.lock();
            let frame = tokio::select! {
                frame = timeout_at(deadline, receiver.next()) => frame,
                _ = closed.changed() => return Ok(0),
            };

            let message = match frame {
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no pong from {} within {:?}", self.remote_addr, self.pong_wait),
                    ))
                }
                Ok(None) => return Ok(0),
                Ok(Some(Err(e))) => return Err(io::Error::other(e)),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => return Ok(self.deliver(text.as_bytes(), buf)),
                Message::Binary(data) => return Ok(self.deliver(&data, buf)),
                Message::Pong(_) => {
                    debug!("Heartbeat pong from {}", self.remote_addr);
                    *self.read_deadline.lock() = Instant::now() + self.pong_wait;
                }
                Message::Ping(_) | Message::Frame(_) => {}
                Message::Close(_) => return Ok(0),
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        if bytes[0] == IAC {
            error!(
                "Refusing to send a telnet command to WebSocket client {}: {:?}",
                self.remote_addr, bytes
            );
            return Ok(0);
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(io::Error::other)?;
        Ok(bytes.len())
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let heartbeat = self.heartbeat.lock().take();
        if let Some(mut heartbeat) = heartbeat {
            heartbeat.stop().await;
        }

        if let Err(e) = self.sink.lock().await.close().await {
            debug!("WebSocket close for {} failed: {}", self.remote_addr, e);
        }
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn is_framed(&self) -> bool {
        true
    }
}
