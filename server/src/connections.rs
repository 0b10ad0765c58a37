//! Live connection count and idle shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

#[derive(Clone, Debug)]
pub struct Connections {
    count: Arc<watch::Sender<usize>>,
}

impl Default for Connections {
    fn default() -> Self {
        Self::new()
    }
}

impl Connections {
    #[must_use]
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count: Arc::new(count) }
    }

    /// Count a new connection until the guard is dropped.
    #[must_use]
    pub fn open(&self) -> ConnectionGuard {
        self.count.send_modify(|count| *count += 1);
        ConnectionGuard { count: Arc::clone(&self.count) }
    }

    #[must_use]
    pub fn live(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once there has been no connection for `timeout`.
    ///
    /// The countdown starts immediately when nothing is connected and
    /// restarts every time the last connection closes.
    pub async fn idle_for(&self, timeout: Duration) {
        let mut count = self.count.subscribe();
        loop {
            if count.wait_for(|live| *live == 0).await.is_err() {
                return;
            }
            info!(secs = timeout.as_secs_f64(), "server: no connections, exiting after timeout");
            tokio::select! {
                () = tokio::time::sleep(timeout) => return,
                changed = count.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    info!("server: connection opened, idle shutdown cancelled");
                }
            }
        }
    }
}

pub struct ConnectionGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[cfg(test)]
#[path = "connections_test.rs"]
mod tests;
