//! Background expiry sweep for idle conversations and orphaned locks.

use crate::locks::LockRegistry;
use crate::store::SessionStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Interval between sweep cycles.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
/// Idle threshold after which a conversation is reclaimed.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(7200);

/// Periodic reclaimer of idle sessions and their lock entries.
///
/// Runs independently of request traffic. Lock cleanup is best-effort:
/// only locks whose ids are already absent from the store are removed,
/// so an in-flight request can never lose the lock it holds.
pub struct ExpirySweeper {
    store: Arc<dyn SessionStore>,
    locks: Arc<LockRegistry>,
    interval: Duration,
    max_idle: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn SessionStore>, locks: Arc<LockRegistry>) -> Self {
        Self {
            store,
            locks,
            interval: DEFAULT_SWEEP_INTERVAL,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// One sweep cycle; returns `(sessions_removed, locks_removed)`.
    ///
    /// Zero removals is a normal outcome, not an error.
    pub async fn run_once(&self) -> (usize, usize) {
        let sessions_removed = self.store.sweep_expired(self.max_idle).await;

        let valid_ids: HashSet<String> = self.store.list_ids().await.into_iter().collect();
        let locks_removed = self.locks.release_orphans(&valid_ids).await;

        if sessions_removed > 0 || locks_removed > 0 {
            tracing::info!(sessions_removed, locks_removed, "Sweep completed");
        } else {
            tracing::debug!("Sweep completed, nothing to remove");
        }
        (sessions_removed, locks_removed)
    }

    /// Spawn the long-lived background loop.
    ///
    /// Backend failures inside a cycle are already contained at the store
    /// boundary (they surface as zero counts), so no single cycle can
    /// terminate the loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_idle_secs = self.max_idle.as_secs(),
            "Expiry sweeper started"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so cycles run
            // on the interval, not at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
