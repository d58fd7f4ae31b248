//! Delayed activation of announced nodes.
//!
//! A node announced at `timestamp` becomes active at
//! `timestamp + activation_delay` on the registry clock. Until then it sits
//! in the pending set, visible through `list_with_coming_soon`.

use super::{Change, Entry, NodeRegistry, insert_sorted, lock};
use crate::config::DuplicatePending;
use crate::events::MembershipEvent;
use crate::node::{Node, NodeIp};
use tracing::{debug, info};

impl NodeRegistry {
    /// Park `node` in the pending set and schedule its activation.
    ///
    /// Active lock must be held.
    pub(super) fn schedule_activation(&self, node: Node) {
        let mut pending = lock(&self.pending);

        match self.config.duplicate_pending {
            DuplicatePending::KeepAll => {}
            DuplicatePending::LatestWins => pending.retain(|e| e.node.ip != node.ip),
            DuplicatePending::FirstWins => {
                if pending.iter().any(|e| e.node.ip == node.ip) {
                    debug!("Ignoring repeated announcement of {}", node);
                    return;
                }
            }
        }

        let id = self.next_entry_id();
        let now = self.clock.now_ms();
        let activate_at = node.timestamp.saturating_add(self.config.activation_delay_ms());
        let remaining = activate_at.saturating_sub(now).max(1);
        let fire_at = now + remaining;

        debug!("Scheduling activation of {} in {}ms", node, remaining);
        pending.push(Entry { id, node });
        drop(pending);

        let registry = self.this.clone();
        self.tasks.schedule(fire_at, move || async move {
            if let Some(registry) = registry.upgrade() {
                registry.activate(id);
            }
        });
    }

    /// Promote pending entry `id`. No-op if it was purged meanwhile.
    fn activate(&self, id: u64) {
        let (ip, announced_at) = {
            let mut active = lock(&self.active);
            let mut pending = lock(&self.pending);
            let Some(index) = pending.iter().position(|e| e.id == id) else {
                return;
            };
            let mut node = pending.remove(index).node;
            let announced_at = node.timestamp;
            node.timestamp = 0;
            let ip = node.ip;
            insert_sorted(&mut active, node);
            (ip, announced_at)
        };

        info!("Activated {} (announced at {})", ip, announced_at);
        self.notify_changed(Change::Insert);
        self.events
            .emit(&MembershipEvent::Activated { ip, announced_at });
    }

    /// Drop every pending entry for `ip`. Active lock must be held.
    pub(super) fn purge_pending(&self, ip: NodeIp) {
        let mut pending = lock(&self.pending);
        let before = pending.len();
        pending.retain(|e| e.node.ip != ip);
        let purged = before - pending.len();
        if purged > 0 {
            debug!("Dropped {} pending announcement(s) for {}", purged, ip);
        }
    }

    /// Nodes waiting to activate, each with its announcement timestamp.
    pub fn pending_nodes(&self) -> Vec<Node> {
        lock(&self.pending).iter().map(|e| e.node.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Active nodes followed by every pending node.
    pub fn list_with_coming_soon(&self) -> Vec<Node> {
        let active = lock(&self.active);
        let pending = lock(&self.pending);
        active
            .iter()
            .cloned()
            .chain(pending.iter().map(|e| e.node.clone()))
            .collect()
    }
}
