use super::{ConnectState, ConnectionId, ConnectionRecord};
use crate::error::ServerError;
use crate::transport::Transport;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub connected: u64,
    pub disconnected: u64,
    /// Registered records, zombies included
    pub active: usize,
    pub zombies: usize,
}

/// Owns every live [`ConnectionRecord`].
///
/// Fan-out snapshots its targets before writing and never holds a map
/// guard across an `.await`. A recipient whose write fails is removed once
/// the whole pass is done, so one dead socket never costs the others their
/// message.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionRecord>>,
    next_id: AtomicU64,
    connect_count: AtomicU64,
    disconnect_count: AtomicU64,
    shutdown: OnceLock<broadcast::Sender<()>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(0),
            connect_count: AtomicU64::new(0),
            disconnect_count: AtomicU64::new(0),
            shutdown: OnceLock::new(),
        }
    }

    /// Registers a transport under the next sequential id.
    pub fn add(&self, transport: Arc<dyn Transport>) -> Arc<ConnectionRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Arc::new(ConnectionRecord::new(id, transport));
        self.connections.insert(id, record.clone());
        self.connect_count.fetch_add(1, Ordering::Relaxed);
        debug!("Connection {} registered from {}", id, record.remote_addr());
        record
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Closes the transport and forgets the record.
    pub async fn remove(&self, id: ConnectionId) -> Result<(), ServerError> {
        let (_, record) = self
            .connections
            .remove(&id)
            .ok_or(ServerError::ConnectionNotFound(id))?;
        // a kicked record was counted when its transport closed
        if record.close().await {
            self.disconnect_count.fetch_add(1, Ordering::Relaxed);
        }
        debug!("Connection {} removed", id);
        Ok(())
    }

    /// Closes the transport but keeps the record, so the session's world
    /// state can live on as a zombie.
    pub async fn kick(&self, id: ConnectionId) -> Result<(), ServerError> {
        let record = self.get(id).ok_or(ServerError::ConnectionNotFound(id))?;
        if record.state() == ConnectState::LoggedIn {
            record.set_state(ConnectState::Zombie);
        }
        if record.close().await {
            self.disconnect_count.fetch_add(1, Ordering::Relaxed);
        }
        info!("👢 Kicked connection {}", id);
        Ok(())
    }

    /// Zombies whose transport closed at least `grace` ago, in ascending id
    /// order.
    pub fn expired_zombies(&self, grace: Duration) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| entry.value().state() == ConnectState::Zombie)
            .filter(|entry| entry.value().closed_for().is_some_and(|closed| closed >= grace))
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Removes every zombie older than `grace` and returns their ids.
    pub async fn reap_zombies(&self, grace: Duration) -> Vec<ConnectionId> {
        let expired = self.expired_zombies(grace);
        let mut reaped = Vec::with_capacity(expired.len());
        for id in expired {
            match self.remove(id).await {
                Ok(()) => reaped.push(id),
                Err(e) => debug!("Zombie {} already gone: {}", id, e),
            }
        }
        reaped
    }

    /// Sends to every logged-in session not in `skip_ids`. Sessions still
    /// at the login prompt and zombies are left out.
    /// Returns the ids that accepted the write.
    pub async fn broadcast(&self, bytes: &[u8], skip_ids: &[ConnectionId]) -> Vec<ConnectionId> {
        let targets: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| entry.value().state() == ConnectState::LoggedIn)
            .filter(|entry| !skip_ids.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        self.fan_out(bytes, targets).await
    }

    /// Sends to the listed sessions. Unknown ids are skipped.
    pub async fn send_to(&self, bytes: &[u8], ids: &[ConnectionId]) -> Vec<ConnectionId> {
        let targets: Vec<_> = ids.iter().filter_map(|id| self.get(*id)).collect();
        self.fan_out(bytes, targets).await
    }

    async fn fan_out(&self, bytes: &[u8], targets: Vec<Arc<ConnectionRecord>>) -> Vec<ConnectionId> {
        let mut sent = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();

        for record in targets {
            match record.write(bytes).await {
                Ok(_) => sent.push(record.id()),
                Err(e) => {
                    warn!("Write to connection {} failed: {}", record.id(), e);
                    failed.push(record.id());
                }
            }
        }

        for id in failed {
            if let Err(e) = self.remove(id).await {
                debug!("Cleanup of connection {} skipped: {}", id, e);
            }
        }

        sent
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connected: self.connect_count.load(Ordering::Relaxed),
            disconnected: self.disconnect_count.load(Ordering::Relaxed),
            active: self.connections.len(),
            zombies: self.zombie_count(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    pub fn zombie_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().state() == ConnectState::Zombie)
            .count()
    }

    /// Records with a client still behind them.
    pub fn live_count(&self) -> usize {
        self.active_count().saturating_sub(self.zombie_count())
    }

    /// All registered ids in ascending order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Removes every connection. Used at shutdown.
    pub async fn cleanup(&self) {
        let ids = self.connection_ids();
        let count = ids.len();
        for id in ids {
            let _ = self.remove(id).await;
        }
        if count > 0 {
            info!("🧹 Closed {} connection(s)", count);
        }
    }

    /// Installs the process shutdown channel.
    ///
    /// # Panics
    ///
    /// Panics when called a second time; wiring the shutdown channel twice
    /// is a startup bug.
    pub fn set_shutdown_sender(&self, tx: broadcast::Sender<()>) {
        if self.shutdown.set(tx).is_err() {
            panic!("ConnectionRegistry::set_shutdown_sender called a second time");
        }
    }

    /// Asks the server to shut down. Returns false when no channel is
    /// installed or nobody is listening.
    pub fn signal_shutdown(&self) -> bool {
        match self.shutdown.get() {
            Some(tx) => tx.send(()).is_ok(),
            None => {
                warn!("Shutdown requested but no shutdown channel is installed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn registry_with(n: usize) -> (ConnectionRegistry, Vec<Arc<MemoryTransport>>) {
        let registry = ConnectionRegistry::new();
        let transports: Vec<_> = (0..n).map(|_| MemoryTransport::new(false)).collect();
        for t in &transports {
            registry.add(t.clone());
        }
        (registry, transports)
    }

    #[tokio::test]
    async fn test_sequential_ids_and_stats() {
        let (registry, _transports) = registry_with(3);
        assert_eq!(registry.connection_ids(), vec![1, 2, 3]);
        assert_eq!(registry.stats().connected, 3);

        registry.remove(2).await.unwrap();
        assert!(matches!(
            registry.remove(2).await,
            Err(ServerError::ConnectionNotFound(2))
        ));
        let stats = registry.stats();
        assert_eq!((stats.connected, stats.disconnected, stats.active), (3, 1, 2));
    }

    #[tokio::test]
    async fn test_send_to_isolates_failures() {
        let (registry, transports) = registry_with(2);
        transports[0].set_fail_writes(true);

        let sent = registry.send_to(b"hello\n", &[1, 2]).await;
        assert_eq!(sent, vec![2]);
        assert_eq!(transports[1].take_written(), b"hello\r\n".to_vec());
        assert!(registry.get(1).is_none());
        assert!(registry.get(2).is_some());
        assert!(transports[0].is_closed());
    }

    #[tokio::test]
    async fn test_broadcast_skips_login_and_excluded() {
        let (registry, transports) = registry_with(3);
        registry.get(1).unwrap().set_state(ConnectState::LoggedIn);
        registry.get(2).unwrap().set_state(ConnectState::LoggedIn);

        let sent = registry.broadcast(b"tick", &[2]).await;
        assert_eq!(sent, vec![1]);
        assert_eq!(transports[0].take_written(), b"tick".to_vec());
        assert!(transports[1].take_written().is_empty());
        assert!(transports[2].take_written().is_empty());
    }

    #[tokio::test]
    async fn test_kick_keeps_record() {
        let (registry, transports) = registry_with(1);
        registry.get(1).unwrap().set_state(ConnectState::LoggedIn);
        registry.kick(1).await.unwrap();
        assert!(transports[0].is_closed());
        assert_eq!(registry.get(1).map(|r| r.state()), Some(ConnectState::Zombie));
        assert_eq!(registry.stats().disconnected, 1);

        // zombies are not broadcast targets
        assert!(registry.broadcast(b"hi", &[]).await.is_empty());
        assert!(registry.get(1).is_some());
    }

    #[tokio::test]
    async fn test_kick_then_remove_counts_one_disconnect() {
        let (registry, _transports) = registry_with(2);
        registry.get(1).unwrap().set_state(ConnectState::LoggedIn);
        registry.kick(1).await.unwrap();
        registry.remove(1).await.unwrap();

        // a lobby kick keeps the record in Login state
        registry.kick(2).await.unwrap();
        registry.kick(2).await.unwrap();
        registry.remove(2).await.unwrap();

        let stats = registry.stats();
        assert_eq!((stats.connected, stats.disconnected, stats.active), (2, 2, 0));
    }

    #[tokio::test]
    async fn test_reap_expired_zombies() {
        let (registry, transports) = registry_with(3);
        for id in [1, 2] {
            registry.get(id).unwrap().set_state(ConnectState::LoggedIn);
            registry.kick(id).await.unwrap();
        }
        let stats = registry.stats();
        assert_eq!((stats.active, stats.zombies), (3, 2));
        assert_eq!(registry.live_count(), 1);

        assert!(registry.reap_zombies(Duration::from_secs(3600)).await.is_empty());
        assert_eq!(registry.reap_zombies(Duration::ZERO).await, vec![1, 2]);

        let stats = registry.stats();
        assert_eq!((stats.connected, stats.disconnected, stats.active, stats.zombies), (3, 2, 1, 0));
        assert!(registry.get(3).is_some());
        assert!(!transports[2].is_closed());
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything() {
        let (registry, transports) = registry_with(4);
        registry.cleanup().await;
        assert_eq!(registry.active_count(), 0);
        assert!(transports.iter().all(|t| t.is_closed()));
    }

    #[test]
    fn test_signal_shutdown() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.signal_shutdown());

        let (tx, mut rx) = broadcast::channel(1);
        registry.set_shutdown_sender(tx);
        assert!(registry.signal_shutdown());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    #[should_panic(expected = "second time")]
    fn test_second_shutdown_sender_panics() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = broadcast::channel(1);
        registry.set_shutdown_sender(tx.clone());
        registry.set_shutdown_sender(tx);
    }
}
