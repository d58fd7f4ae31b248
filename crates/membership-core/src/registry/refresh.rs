//! Membership refresh against a remote peer's view.
//!
//! Two modes, chosen by whether the local identity is set:
//! 1. Bootstrap (not joined): fetch a random peer's list now and merge it in
//! 2. Member (joined): after the activation delay, replace the active set
//!    with a random peer's list, keeping the local node

use super::NodeRegistry;
use crate::events::MembershipEvent;
use crate::node::Node;
use crate::transport::TransportError;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Membership fetch failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Local node has not joined")]
    NotJoined,
}

/// What `update` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Bootstrap: `fetched` nodes were merged into the active set.
    Merged { fetched: usize },
    /// Member: a resync will run at `fire_at`.
    Scheduled { fire_at: u64 },
}

impl NodeRegistry {
    /// Refresh membership from a remote peer.
    ///
    /// Bootstrap failures are returned. In member mode the resync runs later
    /// from the task queue, so its failures are logged and emitted as
    /// `RefreshFailed` instead.
    pub async fn update(&self) -> Result<RefreshOutcome, RefreshError> {
        if self.identity.is_joined() {
            return Ok(self.schedule_resync());
        }

        let fetched = self.fetch_from_random_peer(None).await?;
        let count = fetched.len();
        self.add_range(fetched);
        info!("Bootstrap merged {} node(s), {} active", count, self.len());
        Ok(RefreshOutcome::Merged { fetched: count })
    }

    fn schedule_resync(&self) -> RefreshOutcome {
        let fire_at = self.clock.now_ms() + self.config.activation_delay_ms();
        let registry = self.this.clone();

        self.tasks.schedule(fire_at, move || async move {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if !registry.identity.is_joined() {
                debug!("Skipping resync, local node left");
                return;
            }
            if let Err(e) = registry.resync().await {
                warn!("Membership resync failed: {}", e);
                registry
                    .events
                    .emit(&MembershipEvent::RefreshFailed {
                        reason: e.to_string(),
                    });
            }
        });

        debug!("Resync scheduled for {}", fire_at);
        RefreshOutcome::Scheduled { fire_at }
    }

    /// Replace the active set with a random peer's view, now.
    ///
    /// Entries matching the local node by ip or address are dropped and the
    /// local node is re-inserted. Returns the active count afterwards.
    pub async fn resync(&self) -> Result<usize, RefreshError> {
        let local = self.identity.get().ok_or(RefreshError::NotJoined)?;

        let remote = self.fetch_from_random_peer(Some(&local)).await?;
        let fetched = remote.len();
        let local_node = Node {
            timestamp: 0,
            ..local.clone()
        };
        let members = remote
            .into_iter()
            .filter(|n| n.ip != local.ip && n.address != local.address)
            .chain(std::iter::once(local_node));

        self.replace_active(members);
        let count = self.len();
        info!("Resynced from {} remote node(s), {} active", fetched, count);
        self.events
            .emit(&MembershipEvent::Resynced { fetched, count });
        Ok(count)
    }

    async fn fetch_from_random_peer(
        &self,
        local: Option<&Node>,
    ) -> Result<Vec<Node>, TransportError> {
        let known: Vec<Node> = self
            .active_nodes()
            .into_iter()
            .filter(|n| local.is_none_or(|l| n.ip != l.ip))
            .collect();

        let peer = self
            .transport
            .random_peer(&known)
            .ok_or(TransportError::NoPeers)?;
        debug!("Fetching member list from {}", peer);
        self.transport.fetch_member_list(&peer).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::node::NodeIp;

    #[tokio::test]
    async fn test_bootstrap_merges() {
        let h = Harness::new();
        h.registry.add(node(1));
        h.transport.serve(1, vec![node(1), node(2), node(3)]);

        let outcome = h.registry.update().await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Merged { fetched: 3 });
        assert_eq!(ips(&h.registry.active_nodes()), vec![1, 2, 3]);
        assert_eq!(h.transport.queried(), vec![1]);
    }

    #[tokio::test]
    async fn test_bootstrap_keeps_local_entries() {
        let h = Harness::new();
        h.registry.add_range([node(1), node(9)]);
        h.transport.serve(1, vec![node(2)]);
        h.transport.serve(9, vec![node(2)]);

        h.registry.update().await.unwrap();

        assert_eq!(ips(&h.registry.active_nodes()), vec![1, 2, 9]);
    }

    #[tokio::test]
    async fn test_bootstrap_without_peers() {
        let h = Harness::new();
        let err = h.registry.update().await.unwrap_err();
        assert!(matches!(err, RefreshError::Transport(TransportError::NoPeers)));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_returned() {
        let h = Harness::new();
        h.registry.add(node(1));
        h.transport.set_failing(true);

        let err = h.registry.update().await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::Transport(TransportError::ConnectionFailed(_))
        ));
        assert_eq!(ips(&h.registry.active_nodes()), vec![1]);
    }

    #[tokio::test]
    async fn test_member_mode_schedules_resync() {
        let h = Harness::new();
        h.registry.identity().set(node(5));
        h.registry.add_range([node(5), node(7)]);
        h.transport.serve(7, vec![node(7), node(8)]);

        let outcome = h.registry.update().await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Scheduled { fire_at: T0 + 30_000 });
        assert!(h.transport.queried().is_empty());

        assert_eq!(h.advance(30_000).await, 1);
        assert_eq!(ips(&h.registry.active_nodes()), vec![5, 7, 8]);
        assert_eq!(h.transport.queried(), vec![7]);
    }

    #[tokio::test]
    async fn test_resync_filters_local_and_reinserts() {
        let h = Harness::new();
        let local = Node::new(NodeIp::new(5), "sim://self");
        h.registry.identity().set(local.clone());
        h.registry.add_range([local, node(7), node(9)]);
        h.transport.serve(
            7,
            vec![
                node(7),
                Node::new(NodeIp::new(5), "sim://stale-self"),
                Node::new(NodeIp::new(6), "sim://self"),
                node(8),
            ],
        );
        h.transport.serve(9, vec![node(9)]);

        // Force the peer choice onto 7
        h.registry.remove_ip(NodeIp::new(9));
        let count = h.registry.resync().await.unwrap();

        assert_eq!(count, 3);
        let active = h.registry.active_nodes();
        assert_eq!(ips(&active), vec![5, 7, 8]);
        assert_eq!(active[0].address, "sim://self");
    }

    #[tokio::test]
    async fn test_resync_never_queries_self() {
        let h = Harness::new();
        h.registry.identity().set(node(5));
        h.registry.add(node(5));

        let err = h.registry.resync().await.unwrap_err();
        assert!(matches!(err, RefreshError::Transport(TransportError::NoPeers)));
        assert!(h.transport.queried().is_empty());
        assert_eq!(ips(&h.registry.active_nodes()), vec![5]);
    }

    #[tokio::test]
    async fn test_resync_requires_identity() {
        let h = Harness::new();
        assert!(matches!(
            h.registry.resync().await,
            Err(RefreshError::NotJoined)
        ));
    }

    #[tokio::test]
    async fn test_resync_pending_from_remote() {
        let h = Harness::new();
        h.registry.identity().set(node(5));
        h.registry.add_range([node(5), node(7)]);
        h.transport.serve(7, vec![node(7), announced(8, T0)]);

        h.registry.resync().await.unwrap();

        assert_eq!(ips(&h.registry.active_nodes()), vec![5, 7]);
        assert_eq!(ips(&h.registry.pending_nodes()), vec![8]);
    }

    #[tokio::test]
    async fn test_scheduled_resync_failure_is_emitted() {
        let h = Harness::new();
        h.registry.identity().set(node(5));
        h.registry.add_range([node(5), node(7)]);
        h.transport.set_failing(true);

        h.registry.update().await.unwrap();
        h.take_events();
        h.advance(30_000).await;

        assert_eq!(
            h.events(),
            vec![MembershipEvent::RefreshFailed {
                reason: "Membership fetch failed: Connection failed: sim://7".into()
            }]
        );
        assert_eq!(ips(&h.registry.active_nodes()), vec![5, 7]);
    }

    #[tokio::test]
    async fn test_scheduled_resync_skipped_after_leave() {
        let h = Harness::new();
        h.registry.identity().set(node(5));
        h.registry.add_range([node(5), node(7)]);
        h.transport.serve(7, vec![node(7)]);

        h.registry.update().await.unwrap();
        h.registry.identity().clear();
        h.advance(30_000).await;

        assert!(h.transport.queried().is_empty());
    }
}
