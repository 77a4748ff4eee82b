use super::Transport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// An in-process transport.
///
/// Bytes handed to [`feed`](Self::feed) come out of `read` one chunk per
/// call; everything written is collected for inspection. Used by bots and
/// by tests that drive a session without a socket.
pub struct MemoryTransport {
    remote_addr: SocketAddr,
    framed: bool,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    leftover: Mutex<Vec<u8>>,
    written: Mutex<Vec<u8>>,
    fail_writes: AtomicBool,
    closed: watch::Sender<bool>,
}

impl MemoryTransport {
    pub fn new(framed: bool) -> Arc<Self> {
        Self::with_addr(SocketAddr::from(([127, 0, 0, 1], 0)), framed)
    }

    pub fn with_addr(remote_addr: SocketAddr, framed: bool) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            remote_addr,
            framed,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            leftover: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            closed,
        })
    }

    /// Queues bytes for the next read. Ignored after [`end`](Self::end).
    pub fn feed(&self, bytes: impl Into<Vec<u8>>) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(bytes.into());
        }
    }

    /// Ends the inbound stream; reads return `Ok(0)` once drained.
    pub fn end(&self) {
        self.inbound_tx.lock().take();
    }

    /// Makes every later write fail with `BrokenPipe`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.written.lock())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut leftover = self.leftover.lock();
            if !leftover.is_empty() {
                let n = leftover.len().min(buf.len());
                buf[..n].copy_from_slice(&leftover[..n]);
                leftover.drain(..n);
                return Ok(n);
            }
        }

        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(0);
        }

        let mut rx = self.inbound_rx.lock().await;
        let chunk = tokio::select! {
            chunk = rx.recv() => chunk,
            _ = closed.changed() => None,
        };

        match chunk {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.leftover.lock().extend_from_slice(&data[n..]);
                }
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory transport write failure"));
        }
        if *self.closed.borrow() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "memory transport closed"));
        }
        self.written.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn is_framed(&self) -> bool {
        self.framed
    }
}
