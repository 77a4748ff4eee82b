use crate::config::HeartbeatConfig;
use std::future::Future;
use std::io;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Owned handle to a background ping task.
///
/// The task sends a ping every `ping_period`, each bounded by `write_wait`.
/// A failed or timed-out ping ends the task; the read side then notices the
/// silent peer through its pong deadline. [`stop`](Self::stop) signals the
/// task and waits for it to finish, so no ping can be written after the
/// socket is closed.
#[derive(Debug)]
pub struct Heartbeat {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawns the ping loop. `ping` performs one ping write.
    pub fn start<F, Fut>(label: String, config: HeartbeatConfig, ping: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        info!("💓 Heartbeat started for {}", label);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match timeout(config.write_wait, ping()).await {
                            Ok(Ok(())) => debug!("Heartbeat ping sent to {}", label),
                            Ok(Err(e)) => {
                                error!("Heartbeat ping to {} failed: {}", label, e);
                                break;
                            }
                            Err(_) => {
                                error!("Heartbeat ping to {} timed out after {:?}", label, config.write_wait);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Heartbeat stopped for {}", label);
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signals the ping loop and awaits its exit. Calling it twice is harmless.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Heartbeat task ended abnormally: {}", e);
            }
        }
    }

    /// True once the ping loop has exited, for whatever reason.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> HeartbeatConfig {
        HeartbeatConfig {
            pong_wait: Duration::from_millis(100),
            ping_period: Duration::from_millis(10),
            write_wait: Duration::from_millis(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_until_stopped() {
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = pings.clone();
        let mut heartbeat = Heartbeat::start("test".into(), fast_config(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        heartbeat.stop().await;
        let after_stop = pings.load(Ordering::SeqCst);
        assert!(after_stop >= 3, "expected at least 3 pings, got {after_stop}");
        assert!(heartbeat.is_finished());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pings.load(Ordering::SeqCst), after_stop);

        // Second stop is a no-op.
        heartbeat.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ping_ends_loop() {
        let mut heartbeat = Heartbeat::start("broken".into(), fast_config(), || async {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(heartbeat.is_finished());
        heartbeat.stop().await;
    }
}
