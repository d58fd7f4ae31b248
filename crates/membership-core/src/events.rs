//! Membership notifications.
//!
//! Provides `MembershipEvent` for monitoring and `EventBus` for subscriptions.
//! Callbacks run synchronously on the thread that emitted the event.

use crate::node::NodeIp;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by the registry as membership changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MembershipEvent {
    /// The active set changed.
    Changed {
        /// Number of active members after the change.
        count: usize,
        /// Whether the change was a removal.
        removal: bool,
    },
    /// A pending node reached its activation time and joined the active set.
    Activated {
        ip: NodeIp,
        /// Announcement time the activation was scheduled from.
        #[serde(rename = "announcedAt")]
        announced_at: u64,
    },
    /// A recently removed node left the grace window.
    Evicted { ip: NodeIp },
    /// The active set was rebuilt from a remote member list.
    Resynced {
        /// Entries in the fetched list, before filtering.
        fetched: usize,
        /// Active members afterwards.
        count: usize,
    },
    /// A scheduled refresh could not reach a peer.
    RefreshFailed { reason: String },
}

impl MembershipEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Changed { .. } => EventKind::Changed,
            Self::Activated { .. } => EventKind::Activated,
            Self::Evicted { .. } => EventKind::Evicted,
            Self::Resynced { .. } => EventKind::Resynced,
            Self::RefreshFailed { .. } => EventKind::RefreshFailed,
        }
    }
}

/// Discriminant of `MembershipEvent`, for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Changed,
    Activated,
    Evicted,
    Resynced,
    RefreshFailed,
}

type Callback = Arc<dyn Fn(&MembershipEvent) + Send + Sync>;

struct Listener {
    id: usize,
    /// `None` receives every kind
    kinds: Option<Vec<EventKind>>,
    callback: Callback,
}

impl Listener {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Fans registry events out to listeners.
///
/// Wrap in `Arc` to enable subscriptions. Listeners borrow each event; one
/// that needs to keep it clones it.
pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&MembershipEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(None, Arc::new(callback))
    }

    /// Subscribe to the listed kinds only.
    pub fn subscribe_to(
        self: &Arc<Self>,
        kinds: &[EventKind],
        callback: impl Fn(&MembershipEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(Some(kinds.to_vec()), Arc::new(callback))
    }

    fn register(
        self: &Arc<Self>,
        kinds: Option<Vec<EventKind>>,
        callback: Callback,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Listener {
                id,
                kinds,
                callback,
            });
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock
        if let Ok(mut guard) = self.listeners.try_write() {
            guard.retain(|l| l.id != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver `event` to every listener that wants its kind. Returns how
    /// many were called.
    pub fn emit(&self, event: &MembershipEvent) -> usize {
        let kind = event.kind();
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|l| l.wants(kind))
            .map(|l| Arc::clone(&l.callback))
            .collect();

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn changed(count: usize) -> MembershipEvent {
        MembershipEvent::Changed {
            count,
            removal: false,
        }
    }

    #[test]
    fn test_subscribe_receives_events() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _sub = bus.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        bus.emit(&changed(1));
        bus.emit(&changed(2));

        assert_eq!(*seen.lock().unwrap(), vec![changed(1), changed(2)]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);

        let sub = bus.subscribe(move |_| *sink.lock().unwrap() += 1);
        assert_eq!(bus.subscriber_count(), 1);
        bus.emit(&changed(1));
        drop(sub);
        bus.emit(&changed(2));

        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = Arc::clone(&bus);
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in_cb = Arc::clone(&held);

        let _sub = bus.subscribe(move |_| {
            let sub = inner_bus.subscribe(|_| {});
            held_in_cb.lock().unwrap().push(sub);
        });
        bus.emit(&changed(1));

        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_filtered_subscription() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _sub = bus.subscribe_to(&[EventKind::Evicted], move |e| {
            sink.lock().unwrap().push(e.kind())
        });
        let _all = bus.subscribe(|_| {});

        assert_eq!(bus.emit(&changed(1)), 1);
        assert_eq!(bus.emit(&MembershipEvent::Evicted { ip: NodeIp::new(3) }), 2);
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::Evicted]);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(MembershipEvent::Activated {
            ip: NodeIp::new(0x0a000002),
            announced_at: 1000,
        })
        .unwrap();

        assert_eq!(json["type"], "activated");
        assert_eq!(json["ip"], "10.0.0.2");
        assert_eq!(json["announcedAt"], 1000);
    }
}
