//! Message and status subscriber registries
//!
//! Subscribing returns a [`Subscription`] handle, so unsubscribing is
//! unambiguous even when the same closure is registered twice. Notification
//! walks a snapshot of the registry and isolates panicking subscribers.

use crate::envelope::Envelope;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Subscriber channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Parsed inbound envelopes
    Message,
    /// Connection up (`true`) / down (`false`)
    Status,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Status => write!(f, "status"),
        }
    }
}

/// Handle returned by a subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    channel: Channel,
    id: u64,
}

impl Subscription {
    /// Channel the handle belongs to
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    channel: Channel,
    subscribers: Mutex<HashMap<u64, Callback<T>>>,
}

impl<T> Registry<T> {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: u64, callback: Callback<T>) {
        self.lock().insert(id, callback);
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn notify(&self, payload: &T) -> usize {
        // Snapshot in subscription order; the lock is released before any
        // callback runs so callbacks may (un)subscribe freely.
        let mut snapshot: Vec<(u64, Callback<T>)> = self
            .lock()
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        channel = %self.channel,
                        subscriber = id,
                        reason = %reason,
                        "Subscriber panicked"
                    );
                }
            }
        }
        delivered
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Callback<T>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-channel subscriber registries
pub struct EventBus {
    next_id: AtomicU64,
    messages: Registry<Envelope>,
    status: Registry<bool>,
}

impl EventBus {
    /// Creates an empty bus
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            messages: Registry::new(Channel::Message),
            status: Registry::new(Channel::Status),
        }
    }

    /// Registers a message subscriber
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.messages.insert(id, Arc::new(callback));
        Subscription {
            channel: Channel::Message,
            id,
        }
    }

    /// Registers a status subscriber
    pub fn on_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.status.insert(id, Arc::new(callback));
        Subscription {
            channel: Channel::Status,
            id,
        }
    }

    /// Removes a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        match subscription.channel {
            Channel::Message => self.messages.remove(subscription.id),
            Channel::Status => self.status.remove(subscription.id),
        }
    }

    /// Delivers an envelope; returns how many subscribers ran to completion
    pub fn publish_message(&self, envelope: &Envelope) -> usize {
        self.messages.notify(envelope)
    }

    /// Delivers a status change; returns how many subscribers ran to completion
    pub fn publish_status(&self, connected: bool) -> usize {
        self.status.notify(&connected)
    }

    /// Drops every subscriber on both channels
    pub fn clear(&self) {
        self.messages.clear();
        self.status.clear();
    }

    /// Number of subscribers on a channel
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        match channel {
            Channel::Message => self.messages.len(),
            Channel::Status => self.status.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("message_subscribers", &self.messages.len())
            .field("status_subscribers", &self.status.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn envelope() -> Envelope {
        Envelope::new("ENTRY_SAVED", Value::Null)
    }

    #[test]
    fn test_message_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = seen.clone();
            bus.on_message(move |env| seen.lock().unwrap().push((n, env.kind.clone())));
        }

        assert_eq!(bus.publish_message(&envelope()), 3);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_callbacks_unsubscribe_independently() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let make = || {
            let count = count.clone();
            move |_: &bool| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        let first = bus.on_status(make());
        let _second = bus.on_status(make());

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.publish_status(true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));

        bus.on_message(|_| panic!("subscriber bug"));
        let r = reached.clone();
        bus.on_message(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish_message(&envelope()), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_notification() {
        let bus = Arc::new(EventBus::new());
        let handle: Arc<Mutex<Option<Subscription>>> = Arc::default();
        let calls = Arc::new(AtomicU64::new(0));

        let (b, h, c) = (bus.clone(), handle.clone(), calls.clone());
        let sub = bus.on_status(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = h.lock().unwrap().take() {
                b.unsubscribe(sub);
            }
        });
        *handle.lock().unwrap() = Some(sub);

        bus.publish_status(true);
        bus.publish_status(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(Channel::Status), 0);
    }

    #[test]
    fn test_subscribe_during_notification_waits_for_next_publish() {
        let bus = Arc::new(EventBus::new());
        let late = Arc::new(AtomicU64::new(0));

        let (b, l) = (bus.clone(), late.clone());
        bus.on_message(move |_| {
            let l = l.clone();
            b.on_message(move |_| {
                l.fetch_add(1, Ordering::SeqCst);
            });
        });

        bus.publish_message(&envelope());
        assert_eq!(late.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(Channel::Message), 2);
    }

    #[test]
    fn test_clear_drops_both_channels() {
        let bus = EventBus::new();
        bus.on_message(|_| {});
        bus.on_status(|_| {});
        bus.clear();
        assert_eq!(bus.subscriber_count(Channel::Message), 0);
        assert_eq!(bus.subscriber_count(Channel::Status), 0);
        assert_eq!(bus.publish_status(true), 0);
    }
}
