//! Offline request queue
//!
//! Buffers calls that could not be attempted for lack of connectivity and
//! replays them in FIFO order once the client is online again. Callers do
//! not get the replayed result back; the original call already failed.

use crate::connectivity::Connectivity;
use chrono::{DateTime, Utc};
use daybook_error::{ErrorKind, Result};
use daybook_resilience::Clock;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Replayable body of a queued request
pub type QueuedJob = Box<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A request waiting for connectivity
pub struct QueuedRequest {
    /// Human-readable label, e.g. `POST http://host/api/entries`
    pub label: String,
    /// When the request was queued
    pub enqueued_at: DateTime<Utc>,
    execute: QueuedJob,
}

impl QueuedRequest {
    /// Creates a queued request
    pub fn new(label: impl Into<String>, enqueued_at: DateTime<Utc>, execute: QueuedJob) -> Self {
        Self {
            label: label.into(),
            enqueued_at,
            execute,
        }
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("label", &self.label)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Why a drain pass stopped before emptying the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainHalt {
    /// Connectivity went away
    Offline,
    /// The head failed with a retryable error and stays queued
    RetryableFailure,
    /// The circuit breaker refused the head; it stays queued
    CircuitOpen,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Requests executed successfully and removed
    pub executed: usize,
    /// Requests removed after a non-retryable failure
    pub dropped: usize,
    /// Set when the pass stopped with items left
    pub halted: Option<DrainHalt>,
}

struct QueueInner {
    items: Mutex<VecDeque<Arc<QueuedRequest>>>,
    draining: AtomicBool,
    connectivity: Connectivity,
    clock: Arc<dyn Clock>,
    item_delay: Duration,
}

/// FIFO of requests deferred while offline
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl OfflineQueue {
    /// Creates an empty queue
    pub fn new(connectivity: Connectivity, clock: Arc<dyn Clock>, item_delay: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                connectivity,
                clock,
                item_delay,
            }),
        }
    }

    /// Appends a request and starts a background drain if none is running
    pub fn enqueue(&self, request: QueuedRequest) {
        tracing::info!(request = %request.label, "Queued request until back online");
        self.items().push_back(Arc::new(request));
        self.start_drain();
    }

    /// Number of waiting requests
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// True if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// True while a drain pass is running
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Labels of waiting requests, head first
    pub fn labels(&self) -> Vec<String> {
        self.items().iter().map(|r| r.label.clone()).collect()
    }

    /// Spawns a drain pass on the current runtime unless one is running.
    ///
    /// Returns true if a new pass was started.
    pub fn start_drain(&self) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime, offline queue drain deferred");
                return false;
            }
        };
        if !self.try_acquire() {
            return false;
        }
        let queue = self.clone();
        handle.spawn(async move {
            queue.run_drain().await;
        });
        true
    }

    /// Runs a drain pass inline. Returns `None` if another pass is running.
    pub async fn drain(&self) -> Option<DrainReport> {
        if !self.try_acquire() {
            return None;
        }
        Some(self.run_drain().await)
    }

    fn try_acquire(&self) -> bool {
        self.inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn run_drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            // The empty check and the flag release happen under the items
            // lock so a concurrent enqueue either sees the flag cleared or
            // its item is seen here.
            let head = {
                let items = self.items();
                match items.front() {
                    Some(head) => head.clone(),
                    None => {
                        self.inner.draining.store(false, Ordering::SeqCst);
                        report.halted = None;
                        return report;
                    }
                }
            };

            if !self.inner.connectivity.is_online() {
                tracing::debug!(waiting = self.len(), "Still offline, pausing queue drain");
                report.halted = Some(DrainHalt::Offline);
                self.inner.draining.store(false, Ordering::SeqCst);
                // Coming back online between the check and the release would
                // find the flag still held; pick the work up again here.
                if self.inner.connectivity.is_online() && self.try_acquire() {
                    continue;
                }
                return report;
            }

            match (head.execute)().await {
                Ok(_) => {
                    self.items().pop_front();
                    report.executed += 1;
                    tracing::debug!(request = %head.label, "Replayed queued request");
                }
                Err(e) if e.kind == ErrorKind::ServiceUnavailable => {
                    tracing::debug!(
                        request = %head.label,
                        error = %e,
                        "Circuit open, pausing queue drain"
                    );
                    report.halted = Some(DrainHalt::CircuitOpen);
                    self.inner.draining.store(false, Ordering::SeqCst);
                    return report;
                }
                Err(e) if !e.is_retryable() => {
                    self.items().pop_front();
                    report.dropped += 1;
                    tracing::warn!(
                        request = %head.label,
                        error = %e,
                        "Dropping queued request after non-retryable failure"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        request = %head.label,
                        error = %e,
                        "Queued request failed, will retry on next drain"
                    );
                    report.halted = Some(DrainHalt::RetryableFailure);
                    self.inner.draining.store(false, Ordering::SeqCst);
                    return report;
                }
            }

            if !self.is_empty() {
                self.inner.clock.sleep(self.inner.item_delay).await;
            }
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Arc<QueuedRequest>>> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("len", &self.len())
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use daybook_error::{ClientError, ErrorContext};
    use daybook_resilience::ManualClock;
    use std::sync::atomic::AtomicUsize;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn setup() -> (OfflineQueue, Connectivity, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let connectivity =
            Connectivity::new(MemoryStore::shared(), clock.clone(), Duration::from_secs(300));
        let queue = OfflineQueue::new(connectivity.clone(), clock.clone(), Duration::from_millis(100));
        (queue, connectivity, clock)
    }

    fn recording(name: &'static str, log: &Log) -> QueuedRequest {
        let log = log.clone();
        QueuedRequest::new(
            name,
            Utc::now(),
            Box::new(move || {
                let log = log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push(name);
                    Ok(Value::Null)
                })
            }),
        )
    }

    fn failing(name: &'static str, retryable: bool, calls: Arc<AtomicUsize>) -> QueuedRequest {
        QueuedRequest::new(
            name,
            Utc::now(),
            Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    let ctx = ErrorContext::new("/api/entries", "POST");
                    Err(if retryable {
                        ClientError::server("still down", ctx)
                    } else {
                        ClientError::validation("bad entry", ctx)
                    })
                })
            }),
        )
    }

    #[tokio::test]
    async fn test_drains_in_fifo_order_once_online() {
        let (queue, connectivity, _) = setup();
        let log: Log = Arc::default();

        connectivity.set_online(false);
        queue.enqueue(recording("A", &log));
        queue.enqueue(recording("B", &log));
        queue.enqueue(recording("C", &log));

        // Let any spawned pass observe the offline state and stop
        while queue.is_draining() {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.len(), 3);
        assert!(log.lock().unwrap().is_empty());

        connectivity.set_online(true);
        let report = queue.drain().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(report.executed, 3);
        assert_eq!(report.halted, None);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_offline_drain_leaves_items() {
        let (queue, connectivity, _) = setup();
        connectivity.set_online(false);

        let log: Log = Arc::default();
        queue.items().push_back(Arc::new(recording("A", &log)));

        let report = queue.drain().await.unwrap();
        assert_eq!(report.halted, Some(DrainHalt::Offline));
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_dropped() {
        let (queue, _, _) = setup();
        let log: Log = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));

        queue.items().push_back(Arc::new(failing("bad", false, calls.clone())));
        queue.items().push_back(Arc::new(recording("good", &log)));

        let report = queue.drain().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(*log.lock().unwrap(), vec!["good"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_retryable_failure_halts_and_keeps_head() {
        let (queue, _, _) = setup();
        let log: Log = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));

        queue.items().push_back(Arc::new(failing("flaky", true, calls.clone())));
        queue.items().push_back(Arc::new(recording("next", &log)));

        let report = queue.drain().await.unwrap();
        assert_eq!(report.halted, Some(DrainHalt::RetryableFailure));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.labels(), vec!["flaky", "next"]);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_circuit_refusal_halts_and_keeps_head() {
        let (queue, _, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        queue.items().push_back(Arc::new(QueuedRequest::new(
            "gated",
            Utc::now(),
            Box::new(move || {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                Box::pin(async move {
                    if first {
                        Err(ClientError::service_unavailable(
                            "Circuit 'api' is open",
                            ErrorContext::new("/api/entries", "POST"),
                        ))
                    } else {
                        Ok(Value::Null)
                    }
                })
            }),
        )));

        let report = queue.drain().await.unwrap();
        assert_eq!(report.halted, Some(DrainHalt::CircuitOpen));
        assert_eq!(report.dropped, 0);
        assert_eq!(queue.labels(), vec!["gated"]);
        assert!(!queue.is_draining());

        let report = queue.drain().await.unwrap();
        assert_eq!(report.executed, 1);
        assert!(queue.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inter_item_delay() {
        let (queue, _, clock) = setup();
        let log: Log = Arc::default();
        for name in ["A", "B", "C"] {
            queue.items().push_back(Arc::new(recording(name, &log)));
        }

        queue.drain().await.unwrap();
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(100)]
        );
    }

    #[tokio::test]
    async fn test_only_one_drain_at_a_time() {
        let (queue, _, _) = setup();
        assert!(queue.try_acquire());
        assert!(queue.drain().await.is_none());
        assert!(!queue.start_drain());

        queue.inner.draining.store(false, Ordering::SeqCst);
        assert!(queue.drain().await.is_some());
    }

    #[tokio::test]
    async fn test_enqueue_while_online_runs_in_background() {
        let (queue, _, _) = setup();
        let log: Log = Arc::default();

        queue.enqueue(recording("A", &log));
        while queue.is_draining() || !queue.is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(*log.lock().unwrap(), vec!["A"]);
    }
}
