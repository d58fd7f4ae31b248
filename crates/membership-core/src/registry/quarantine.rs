//! Grace window for removed nodes.

use super::{Entry, NodeRegistry, lock};
use crate::events::MembershipEvent;
use crate::node::Node;
use std::collections::HashSet;
use tracing::debug;

impl NodeRegistry {
    /// Hold `node` in the recently removed set for the grace window.
    ///
    /// Active lock must be held.
    pub(super) fn quarantine(&self, node: Node) {
        let id = self.next_entry_id();
        let fire_at = self.clock.now_ms() + self.config.grace_window_ms();
        lock(&self.recent).push(Entry { id, node });

        let registry = self.this.clone();
        self.tasks.schedule(fire_at, move || async move {
            if let Some(registry) = registry.upgrade() {
                registry.evict(id);
            }
        });
    }

    fn evict(&self, id: u64) {
        let evicted = {
            let mut recent = lock(&self.recent);
            let Some(index) = recent.iter().position(|e| e.id == id) else {
                return;
            };
            recent.remove(index).node
        };

        debug!("Grace window elapsed for {}", evicted);
        self.events
            .emit(&MembershipEvent::Evicted { ip: evicted.ip });
    }

    pub fn recently_removed(&self) -> Vec<Node> {
        lock(&self.recent).iter().map(|e| e.node.clone()).collect()
    }

    pub fn recently_removed_len(&self) -> usize {
        lock(&self.recent).len()
    }

    /// Active nodes, then recently removed nodes that are not active again.
    pub fn current_and_recent_nodes(&self) -> Vec<Node> {
        let active = lock(&self.active);
        let recent = lock(&self.recent);

        let mut seen: HashSet<_> = active.iter().map(|n| n.ip).collect();
        let mut nodes = active.clone();
        for entry in recent.iter() {
            if seen.insert(entry.node.ip) {
                nodes.push(entry.node.clone());
            }
        }
        nodes
    }
}
