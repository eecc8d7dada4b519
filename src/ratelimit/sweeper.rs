//! Background eviction of expired counters.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::CounterStore;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle to the background sweep task.
///
/// The task periodically removes expired entries from the counter store so
/// that buckets for clients that stopped sending requests do not pile up.
pub struct Sweeper {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep task on the current runtime.
    pub fn spawn(store: Arc<dyn CounterStore>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(
            backend = store.backend(),
            interval_secs = interval.as_secs(),
            "Starting counter sweeper"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep_once(store.as_ref()).await,
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!("Counter sweeper stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Counter sweeper task failed");
        }
    }
}

/// Run a single sweep, logging instead of returning failures.
pub async fn sweep_once(store: &dyn CounterStore) {
    match store.purge_expired().await {
        Ok(0) => {}
        Ok(evicted) => debug!(
            backend = store.backend(),
            evicted = evicted,
            "Evicted expired rate limit counters"
        ),
        Err(e) => warn!(
            backend = store.backend(),
            error = %e,
            "Failed to sweep expired rate limit counters"
        ),
    }
}
