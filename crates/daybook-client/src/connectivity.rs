//! Online/offline heuristic
//!
//! The client is considered offline when the application has signalled so,
//! or when the last successful request is older than the staleness window.

use crate::store::{KeyValueStore, LAST_SUCCESS_KEY};
use chrono::{DateTime, Utc};
use daybook_resilience::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Connectivity heuristic shared by the executor and the offline queue
///
/// Staleness is sticky: once the last success is older than the window,
/// every call is queued and the queue's drain stops as offline, so nothing
/// reaches the network until [`set_online(true)`](Self::set_online) is
/// signalled. Long-running callers should forward the platform's network
/// signal, or signal online on resume from idle.
#[derive(Debug, Clone)]
pub struct Connectivity {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    online: Arc<AtomicBool>,
    stale_after: Duration,
}

impl Connectivity {
    /// Creates a heuristic that starts online
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, stale_after: Duration) -> Self {
        Self {
            store,
            clock,
            online: Arc::new(AtomicBool::new(true)),
            stale_after,
        }
    }

    /// Whether a request should be attempted now
    pub fn is_online(&self) -> bool {
        if !self.online.load(Ordering::SeqCst) {
            return false;
        }
        match self.last_success() {
            Some(at) => {
                let age = self.clock.wall_time().signed_duration_since(at);
                age.to_std().map(|age| age <= self.stale_after).unwrap_or(true)
            }
            None => true,
        }
    }

    /// Applies the application's online/offline signal.
    ///
    /// Coming online counts as fresh evidence of connectivity and refreshes
    /// the last-success timestamp.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if online {
            self.record_success();
        }
        if was != online {
            tracing::info!(online, "Connectivity changed");
        }
    }

    /// The explicit signal, ignoring staleness
    pub fn signal(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Stamps the last-success timestamp with the current time
    pub fn record_success(&self) {
        self.store
            .set(LAST_SUCCESS_KEY, &self.clock.wall_time().to_rfc3339());
    }

    /// When the last successful request completed
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.store
            .get(LAST_SUCCESS_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc))
    }
}
