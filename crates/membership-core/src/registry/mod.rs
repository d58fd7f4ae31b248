//! Node registry: the authoritative local view of overlay membership.
//!
//! Three sets, each behind its own lock:
//! - Active: reachable nodes, sorted by ip, no duplicate ip
//! - Pending: announced nodes waiting for their activation time
//! - Recently removed: departed nodes held for a grace window
//!
//! When more than one lock is needed they are taken Active first, then
//! Pending or Recently removed. Deferred work (activation, eviction, resync)
//! runs from the shared `TaskQueue` and holds only a `Weak` reference back to
//! the registry.

mod activation;
mod quarantine;
mod refresh;

#[cfg(test)]
pub(crate) mod testing;

pub use refresh::{RefreshError, RefreshOutcome};

use crate::clock::Clock;
use crate::config::MembershipConfig;
use crate::events::{EventBus, MembershipEvent};
use crate::identity::LocalIdentity;
use crate::node::{Node, NodeIp};
use crate::routing::{NoRoutes, RouteTable};
use crate::task::TaskQueue;
use crate::transport::MembershipTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

/// A node held in the pending or recently removed set.
#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    node: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Insert,
    Removal,
}

/// Everything the registry talks to.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub tasks: Arc<TaskQueue>,
    pub transport: Arc<dyn MembershipTransport>,
    pub routes: Arc<dyn RouteTable>,
    pub events: Arc<EventBus>,
    pub identity: Arc<LocalIdentity>,
}

impl Collaborators {
    /// No routing table, a fresh event bus and an unset identity.
    pub fn new(
        clock: Arc<dyn Clock>,
        tasks: Arc<TaskQueue>,
        transport: Arc<dyn MembershipTransport>,
    ) -> Self {
        Self {
            clock,
            tasks,
            transport,
            routes: Arc::new(NoRoutes),
            events: Arc::new(EventBus::new()),
            identity: Arc::new(LocalIdentity::new()),
        }
    }

    pub fn with_routes(mut self, routes: Arc<dyn RouteTable>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_identity(mut self, identity: Arc<LocalIdentity>) -> Self {
        self.identity = identity;
        self
    }
}

/// Local membership view.
///
/// Thread-safe; always held in an `Arc` so scheduled tasks can reach it.
pub struct NodeRegistry {
    active: Mutex<Vec<Node>>,
    pending: Mutex<Vec<Entry>>,
    recent: Mutex<Vec<Entry>>,
    /// Serializes snapshot + rebuild so the last rebuild is never stale
    notify: Mutex<()>,
    next_entry: AtomicU64,
    config: MembershipConfig,
    clock: Arc<dyn Clock>,
    tasks: Arc<TaskQueue>,
    transport: Arc<dyn MembershipTransport>,
    routes: Arc<dyn RouteTable>,
    events: Arc<EventBus>,
    identity: Arc<LocalIdentity>,
    this: Weak<NodeRegistry>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Insert keeping `active` sorted; an existing entry with the same ip is
/// replaced in place.
fn insert_sorted(active: &mut Vec<Node>, node: Node) {
    match active.binary_search_by_key(&node.ip, |n| n.ip) {
        Ok(index) => active[index] = node,
        Err(index) => active.insert(index, node),
    }
}

impl NodeRegistry {
    pub fn new(config: MembershipConfig, collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            clock,
            tasks,
            transport,
            routes,
            events,
            identity,
        } = collaborators;

        Arc::new_cyclic(|this| Self {
            active: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            recent: Mutex::new(Vec::new()),
            notify: Mutex::new(()),
            next_entry: AtomicU64::new(1),
            config,
            clock,
            tasks,
            transport,
            routes,
            events,
            identity,
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn identity(&self) -> &Arc<LocalIdentity> {
        &self.identity
    }

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ==================== Mutation ====================

    /// Add a node.
    ///
    /// A node with a zero timestamp goes straight into the active set,
    /// replacing any entry with the same ip. Otherwise it is scheduled to
    /// activate at `timestamp + activation_delay`.
    pub fn add(&self, node: Node) {
        {
            let mut active = lock(&self.active);
            self.place(&mut active, node);
        }
        self.notify_changed(Change::Insert);
    }

    /// Add several nodes under one lock with a single notification.
    pub fn add_range(&self, nodes: impl IntoIterator<Item = Node>) {
        {
            let mut active = lock(&self.active);
            for node in nodes {
                self.place(&mut active, node);
            }
        }
        self.notify_changed(Change::Insert);
    }

    /// Empty the active set. Pending and recently removed are untouched.
    pub fn clear(&self) {
        lock(&self.active).clear();
        self.notify_changed(Change::Insert);
    }

    /// Clear then add `nodes`, atomically, with one notification.
    pub fn replace_active(&self, nodes: impl IntoIterator<Item = Node>) {
        {
            let mut active = lock(&self.active);
            active.clear();
            for node in nodes {
                self.place(&mut active, node);
            }
        }
        self.notify_changed(Change::Insert);
    }

    pub fn remove(&self, node: &Node) -> bool {
        self.remove_ip(node.ip)
    }

    /// Remove the node with `ip` from the active set.
    ///
    /// Pending announcements for the same ip are dropped and the node is held
    /// in the recently removed set for the grace window. Returns `false` if
    /// `ip` is not active; its pending announcements are still dropped but
    /// nothing is quarantined or notified.
    pub fn remove_ip(&self, ip: NodeIp) -> bool {
        let removed = {
            let mut active = lock(&self.active);
            self.purge_pending(ip);
            let Ok(index) = active.binary_search_by_key(&ip, |n| n.ip) else {
                return false;
            };
            let mut removed = active.remove(index);
            removed.timestamp = 0;
            self.quarantine(removed.clone());
            removed
        };

        debug!("Removed {} from active set", removed);
        self.notify_changed(Change::Removal);
        true
    }

    /// Active lock must be held.
    fn place(&self, active: &mut Vec<Node>, node: Node) {
        if node.is_pending() {
            self.schedule_activation(node);
        } else {
            insert_sorted(active, node);
        }
    }

    fn next_entry_id(&self) -> u64 {
        self.next_entry.fetch_add(1, Ordering::Relaxed)
    }

    /// Rebuild routes and emit `Changed` from a fresh snapshot.
    ///
    /// Called with no set lock held.
    fn notify_changed(&self, change: Change) {
        let _notify = lock(&self.notify);
        let snapshot = {
            let mut active = lock(&self.active);
            if change == Change::Removal {
                debug_assert!(active.is_sorted_by_key(|n| n.ip));
            } else {
                active.sort_by_key(|n| n.ip);
            }
            active.clone()
        };

        self.routes.rebuild(&snapshot);
        self.events.emit(&MembershipEvent::Changed {
            count: snapshot.len(),
            removal: change == Change::Removal,
        });
    }

    // ==================== Queries ====================

    pub fn active_nodes(&self) -> Vec<Node> {
        lock(&self.active).clone()
    }

    pub fn get(&self, ip: NodeIp) -> Option<Node> {
        let active = lock(&self.active);
        active
            .binary_search_by_key(&ip, |n| n.ip)
            .ok()
            .map(|index| active[index].clone())
    }

    pub fn contains(&self, ip: NodeIp) -> bool {
        lock(&self.active)
            .binary_search_by_key(&ip, |n| n.ip)
            .is_ok()
    }

    pub fn len(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.active).is_empty()
    }
}
