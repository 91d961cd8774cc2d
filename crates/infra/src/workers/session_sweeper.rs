use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use portico_auth::SessionManager;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

/// Periodically terminates sessions whose expiry has passed.
///
/// Validation never depends on this worker: an expired row is rejected on use
/// whether or not it has been swept.
#[derive(Debug)]
pub struct SessionSweeper;

impl SessionSweeper {
    pub fn spawn(sessions: SessionManager, every: Duration) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = every.as_secs(), "session sweeper started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match sessions.sweep_expired().await {
                            Ok(count) => debug!(count, "sweep finished"),
                            Err(err) => warn!(error = %err, "session sweep failed"),
                        }
                    }
                }
            }

            info!("session sweeper stopped");
        });

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}
