//! Shared fixtures for registry tests.

use super::NodeRegistry;
use super::{Collaborators, MembershipConfig};
use crate::clock::ManualClock;
use crate::events::{MembershipEvent, Subscription};
use crate::node::{Node, NodeIp};
use crate::routing::RouteTable;
use crate::task::TaskQueue;
use crate::transport::{MembershipTransport, Result, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Clock value every harness starts at.
pub(crate) const T0: u64 = 1_000;

pub(crate) fn node(i: u32) -> Node {
    Node::new(NodeIp::new(i), format!("sim://{i}"))
}

pub(crate) fn announced(i: u32, timestamp: u64) -> Node {
    Node::announced(NodeIp::new(i), format!("sim://{i}"), timestamp)
}

pub(crate) fn ips(nodes: &[Node]) -> Vec<u32> {
    nodes.iter().map(|n| n.ip.as_u32()).collect()
}

/// Records every rebuild as a list of ips.
#[derive(Default)]
pub(crate) struct RecordingRoutes {
    snapshots: Mutex<Vec<Vec<u32>>>,
}

impl RecordingRoutes {
    pub fn rebuilds(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn last(&self) -> Vec<u32> {
        self.snapshots
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl RouteTable for RecordingRoutes {
    fn rebuild(&self, members: &[Node]) {
        self.snapshots.lock().unwrap().push(ips(members));
    }
}

/// Reads the registry back from inside `rebuild`.
#[derive(Default)]
pub(crate) struct ReadingRoutes {
    registry: Mutex<Option<Weak<NodeRegistry>>>,
    pub seen: Mutex<Vec<usize>>,
}

impl ReadingRoutes {
    pub fn attach(&self, registry: &Arc<NodeRegistry>) {
        *self.registry.lock().unwrap() = Some(Arc::downgrade(registry));
    }
}

impl RouteTable for ReadingRoutes {
    fn rebuild(&self, _members: &[Node]) {
        let registry = self.registry.lock().unwrap().as_ref().and_then(Weak::upgrade);
        if let Some(registry) = registry {
            self.seen.lock().unwrap().push(registry.len());
        }
    }
}

/// Serves canned member lists keyed by the queried peer.
#[derive(Default)]
pub(crate) struct StaticTransport {
    lists: Mutex<HashMap<NodeIp, Vec<Node>>>,
    failing: AtomicBool,
    queried: Mutex<Vec<NodeIp>>,
}

impl StaticTransport {
    pub fn serve(&self, peer: u32, members: Vec<Node>) {
        self.lists
            .lock()
            .unwrap()
            .insert(NodeIp::new(peer), members);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn queried(&self) -> Vec<u32> {
        self.queried
            .lock()
            .unwrap()
            .iter()
            .map(|ip| ip.as_u32())
            .collect()
    }
}

#[async_trait]
impl MembershipTransport for StaticTransport {
    async fn fetch_member_list(&self, peer: &Node) -> Result<Vec<Node>> {
        self.queried.lock().unwrap().push(peer.ip);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(peer.address.clone()));
        }
        self.lists
            .lock()
            .unwrap()
            .get(&peer.ip)
            .cloned()
            .ok_or_else(|| TransportError::PeerNotFound(peer.address.clone()))
    }
}

/// A registry wired to a manual clock, a recording route table and a
/// canned transport.
pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub tasks: Arc<TaskQueue>,
    pub transport: Arc<StaticTransport>,
    pub routes: Arc<RecordingRoutes>,
    pub registry: Arc<NodeRegistry>,
    events: Arc<Mutex<Vec<MembershipEvent>>>,
    _subscription: Subscription,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MembershipConfig::default())
    }

    pub fn with_config(config: MembershipConfig) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let tasks = Arc::new(TaskQueue::new());
        let transport = Arc::new(StaticTransport::default());
        let routes = Arc::new(RecordingRoutes::default());

        let registry = NodeRegistry::new(
            config,
            Collaborators::new(clock.clone(), tasks.clone(), transport.clone())
                .with_routes(routes.clone()),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = registry
            .events()
            .subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        Self {
            clock,
            tasks,
            transport,
            routes,
            registry,
            events,
            _subscription: subscription,
        }
    }

    /// A second registry on the same clock, queue and transport.
    pub fn registry_with_routes(&self, routes: Arc<dyn RouteTable>) -> Arc<NodeRegistry> {
        NodeRegistry::new(
            self.registry.config().clone(),
            Collaborators::new(
                self.clock.clone(),
                self.tasks.clone(),
                self.transport.clone(),
            )
            .with_routes(routes),
        )
    }

    /// Move the clock forward and run whatever became due.
    pub async fn advance(&self, ms: u64) -> usize {
        let now = self.clock.advance(Duration::from_millis(ms));
        self.tasks.run_due(now).await
    }

    pub fn events(&self) -> Vec<MembershipEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take_events(&self) -> Vec<MembershipEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}
