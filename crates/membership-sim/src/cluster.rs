//! A cluster of simulated nodes sharing one network and one clock.
//!
//! Join flow for a new node:
//! 1. Seed its registry with a known member and bootstrap from it
//! 2. Set its local identity and add itself
//! 3. Announce itself, timestamped, to every member it now knows
//!
//! Announced nodes activate on the receiving side after the activation
//! delay, so views converge gradually rather than at once.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::network::SimNetwork;
use crate::transport::SimTransport;
use anyhow::{Context, Result, anyhow};
use futures::future::join_all;
use membership_core::{
    Clock, Collaborators, EventKind, MembershipEvent, Node, NodeRegistry, RefreshOutcome,
    RouteTable, Subscription, TaskQueue,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Logs each rebuild of a node's routes.
struct LoggedRoutes {
    address: String,
}

impl RouteTable for LoggedRoutes {
    fn rebuild(&self, members: &[Node]) {
        debug!("{} routes rebuilt with {} member(s)", self.address, members.len());
    }
}

/// Log activations, evictions and refresh failures for one node.
fn log_events(registry: &NodeRegistry, address: String) -> Subscription {
    registry.events().subscribe_to(
        &[
            EventKind::Activated,
            EventKind::Evicted,
            EventKind::RefreshFailed,
        ],
        move |event| match event {
            MembershipEvent::Activated { ip, .. } => info!("{} activated {}", address, ip),
            MembershipEvent::Evicted { ip } => debug!("{} forgot {}", address, ip),
            MembershipEvent::RefreshFailed { reason } => {
                warn!("{} refresh failed: {}", address, reason)
            }
            _ => {}
        },
    )
}

/// One node of the cluster.
pub struct SimNode {
    pub node: Node,
    pub registry: Arc<NodeRegistry>,
    pub tasks: Arc<TaskQueue>,
    pub transport: Arc<SimTransport>,
    dispatcher: Option<Dispatcher>,
    _events: Subscription,
}

/// Counts of a node's three sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub address: String,
    pub active: usize,
    pub pending: usize,
    pub recently_removed: usize,
}

pub struct Cluster {
    network: Arc<SimNetwork>,
    clock: Arc<dyn Clock>,
    config: Config,
    nodes: Vec<SimNode>,
}

impl Cluster {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            network: Arc::new(SimNetwork::new(config.sim.clone())),
            clock,
            config,
            nodes: Vec::new(),
        }
    }

    pub fn network(&self) -> &Arc<SimNetwork> {
        &self.network
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Result<&SimNode> {
        self.nodes
            .get(index)
            .ok_or_else(|| anyhow!("No node at index {}", index))
    }

    /// Create a node and put it on the network. Returns its index.
    pub fn spawn_node(&mut self) -> usize {
        let index = self.nodes.len();
        let node = self.network.allocate_node(format!("sim://node-{}", index));
        let tasks = Arc::new(TaskQueue::new());
        let transport = Arc::new(SimTransport::new(Arc::clone(&self.network)));

        let registry = NodeRegistry::new(
            self.config.membership.clone(),
            Collaborators::new(Arc::clone(&self.clock), Arc::clone(&tasks), transport.clone())
                .with_routes(Arc::new(LoggedRoutes {
                    address: node.address.clone(),
                })),
        );
        self.network.register(node.address.clone(), Arc::clone(&registry));
        let events = log_events(&registry, node.address.clone());

        debug!("Spawned {}", node);
        self.nodes.push(SimNode {
            node,
            registry,
            tasks,
            transport,
            dispatcher: None,
            _events: events,
        });
        index
    }

    /// Run each node's due tasks from a background dispatcher.
    pub fn start_dispatchers(&mut self) {
        let tick = self.config.sim.tick_interval;
        for sim in &mut self.nodes {
            if sim.dispatcher.is_none() {
                sim.dispatcher = Some(Dispatcher::spawn(
                    Arc::clone(&sim.tasks),
                    Arc::clone(&self.clock),
                    tick,
                ));
            }
        }
    }

    /// Run every node's due tasks in place. Returns how many ran.
    pub async fn run_due(&self) -> usize {
        let now = self.clock.now_ms();
        let mut ran = 0;
        for sim in &self.nodes {
            ran += sim.tasks.run_due(now).await;
        }
        ran
    }

    /// Make node `index` the first member of the overlay.
    pub fn found(&self, index: usize) -> Result<()> {
        let sim = self.node(index)?;
        sim.registry.identity().set(sim.node.clone());
        sim.registry.add(sim.node.clone());
        info!("{} founded the overlay", sim.node);
        Ok(())
    }

    /// Join node `index` through `seed`. Returns how many peers were told.
    pub async fn join(&self, index: usize, seed: usize) -> Result<usize> {
        let sim = self.node(index)?;
        let seed = self.node(seed)?.node.clone();

        sim.registry.add(seed.clone());
        let outcome = sim
            .registry
            .update()
            .await
            .with_context(|| format!("{} failed to bootstrap from {}", sim.node, seed))?;
        if let RefreshOutcome::Merged { fetched } = outcome {
            debug!("{} bootstrapped {} node(s) from {}", sim.node, fetched, seed);
        }

        sim.registry.identity().set(sim.node.clone());
        sim.registry.add(sim.node.clone());

        let announcement = sim.node.with_timestamp(self.clock.now_ms());
        let peers: Vec<Node> = sim
            .registry
            .active_nodes()
            .into_iter()
            .filter(|n| n.ip != sim.node.ip)
            .collect();
        let results = join_all(
            peers
                .iter()
                .map(|peer| sim.transport.announce(peer, &announcement)),
        )
        .await;

        let mut told = 0;
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(()) => told += 1,
                Err(e) => warn!("{} could not announce to {}: {}", sim.node, peer, e),
            }
        }
        info!("{} joined, announced to {} peer(s)", sim.node, told);
        Ok(told)
    }

    /// Ask every joined node to refresh. Returns how many scheduled a resync.
    ///
    /// Departed nodes are skipped.
    pub async fn refresh_all(&self) -> usize {
        let mut scheduled = 0;
        for sim in &self.nodes {
            if !sim.registry.identity().is_joined() {
                continue;
            }
            match sim.registry.update().await {
                Ok(RefreshOutcome::Scheduled { .. }) => scheduled += 1,
                Ok(RefreshOutcome::Merged { fetched }) => {
                    debug!("{} merged {} node(s)", sim.node, fetched)
                }
                Err(e) => warn!("{} refresh failed: {}", sim.node, e),
            }
        }
        scheduled
    }

    /// Take node `index` off the network and remove it from every view.
    pub fn depart(&self, index: usize) -> Result<usize> {
        let gone = self.node(index)?;
        self.network.unregister(&gone.node.address);
        gone.registry.identity().clear();

        let mut removed = 0;
        for sim in self.nodes.iter().filter(|sim| sim.node.ip != gone.node.ip) {
            if sim.registry.remove(&gone.node) {
                removed += 1;
            }
        }
        info!("{} departed, removed from {} view(s)", gone.node, removed);
        Ok(removed)
    }

    pub fn summary(&self) -> Vec<NodeSummary> {
        self.nodes
            .iter()
            .map(|sim| NodeSummary {
                address: sim.node.address.clone(),
                active: sim.registry.len(),
                pending: sim.registry.pending_len(),
                recently_removed: sim.registry.recently_removed_len(),
            })
            .collect()
    }

    /// True when every node sees the same active set.
    pub fn converged(&self) -> bool {
        let mut views = self.nodes.iter().map(|sim| sim.registry.active_nodes());
        let Some(first) = views.next() else {
            return true;
        };
        views.all(|view| {
            view.len() == first.len()
                && view
                    .iter()
                    .zip(&first)
                    .all(|(a, b)| a.ip == b.ip && a.address == b.address)
        })
    }

    /// Check that `peer` answers, for diagnostics.
    pub async fn ping(&self, from: usize, to: usize) -> Result<()> {
        let peer = self.node(to)?.node.clone();
        self.node(from)?.transport.ping(&peer).await?;
        Ok(())
    }
}
