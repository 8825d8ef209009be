//! Time-keyed duplicate suppression for webhook notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_RETENTION_HORIZON: Duration = Duration::from_secs(3 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);

type Ledger = HashMap<String, Instant>;

/// Ledger of recently accepted event keys.
///
/// Suppression windows are measured from the last acceptance and never slide
/// on a suppressed duplicate. Entries older than the retention horizon are
/// dropped by [`DuplicateSuppressor::sweep`], either directly or through the
/// task started by [`DuplicateSuppressor::spawn_sweeper`].
#[derive(Debug)]
pub struct DuplicateSuppressor {
    ledger: Arc<Mutex<Ledger>>,
    retention: Duration,
}

impl DuplicateSuppressor {
    pub fn new(retention: Duration) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Returns true when `key` should be forwarded, recording the acceptance.
    pub fn should_notify(&self, key: &str, window: Duration) -> bool {
        debug_assert!(
            window < self.retention,
            "duplicate window must be shorter than ledger retention"
        );
        let now = Instant::now();
        let mut ledger = lock_ledger(&self.ledger);
        match ledger.get_mut(key) {
            None => {
                ledger.insert(key.to_string(), now);
                true
            }
            Some(last_accepted) => {
                if now.saturating_duration_since(*last_accepted) < window {
                    return false;
                }
                *last_accepted = now;
                true
            }
        }
    }

    /// Removes entries older than the retention horizon; returns how many.
    pub fn sweep(&self) -> usize {
        sweep_ledger(&self.ledger, self.retention)
    }

    pub fn contains(&self, key: &str) -> bool {
        lock_ledger(&self.ledger).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock_ledger(&self.ledger).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the periodic sweep. The task runs until the returned handle is
    /// shut down or dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> SweeperHandle {
        let ledger = Arc::clone(&self.ledger);
        let retention = self.retention;
        let period = period.max(Duration::from_millis(1));
        let first_tick = Instant::now() + period;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_ledger(&ledger, retention);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        SweeperHandle {
            shutdown_tx,
            handle,
        }
    }
}

impl Default for DuplicateSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_HORIZON)
    }
}

/// Cancellation handle for the background sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn lock_ledger(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sweep_ledger(ledger: &Mutex<Ledger>, retention: Duration) -> usize {
    let now = Instant::now();
    let mut ledger = lock_ledger(ledger);
    let before = ledger.len();
    ledger.retain(|_, accepted| now.saturating_duration_since(*accepted) <= retention);
    before - ledger.len()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{DuplicateSuppressor, SweeperHandle};

    const EVENT: &str = "https://github.com/acme/widgets/pull/9";

    #[tokio::test(start_paused = true)]
    async fn functional_duplicate_inside_window_is_suppressed() {
        let suppressor = DuplicateSuppressor::default();
        let window = Duration::from_secs(3);

        assert!(suppressor.should_notify(EVENT, window));
        assert!(!suppressor.should_notify(EVENT, window));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(suppressor.should_notify(EVENT, window));
        assert!(!suppressor.should_notify(EVENT, window));
    }

    #[tokio::test(start_paused = true)]
    async fn regression_window_does_not_slide_on_suppressed_duplicates() {
        let suppressor = DuplicateSuppressor::default();
        let window = Duration::from_secs(4);

        assert!(suppressor.should_notify(EVENT, window));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!suppressor.should_notify(EVENT, window));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(suppressor.should_notify(EVENT, window));
    }

    #[tokio::test(start_paused = true)]
    async fn unit_independent_keys_do_not_interfere() {
        let suppressor = DuplicateSuppressor::default();
        let window = Duration::from_secs(3);

        assert!(suppressor.should_notify("A", window));
        assert!(suppressor.should_notify("B", window));
        assert!(!suppressor.should_notify("A", window));
        assert!(!suppressor.should_notify("B", window));
        assert_eq!(suppressor.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_sweep_evicts_only_entries_past_retention() {
        let suppressor = DuplicateSuppressor::new(Duration::from_secs(3 * 60 * 60));
        let window = Duration::from_secs(4);

        assert!(suppressor.should_notify("old", window));
        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        assert!(suppressor.should_notify("young", window));
        tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;

        assert_eq!(suppressor.sweep(), 1);
        assert!(!suppressor.contains("old"));
        assert!(suppressor.contains("young"));
        assert!(suppressor.should_notify("old", window));
    }

    #[tokio::test(start_paused = true)]
    async fn integration_background_sweeper_evicts_and_stops_on_shutdown() {
        let retention = Duration::from_secs(3 * 60 * 60);
        let suppressor = DuplicateSuppressor::new(retention);
        let sweeper = suppressor.spawn_sweeper(retention);
        let window = Duration::from_secs(4);

        assert!(suppressor.should_notify("old", window));
        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        assert!(suppressor.should_notify("young", window));
        tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!suppressor.contains("old"));
        assert!(suppressor.contains("young"));

        sweeper.shutdown().await;
        assert!(suppressor.contains("young"));
    }

    #[tokio::test(start_paused = true)]
    async fn regression_dropping_shutdown_sender_stops_sweeper() {
        let suppressor = DuplicateSuppressor::default();
        let SweeperHandle {
            shutdown_tx,
            handle,
        } = suppressor.spawn_sweeper(Duration::from_secs(1));
        drop(shutdown_tx);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(handle.is_finished());
    }
}
