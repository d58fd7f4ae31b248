//! Routing seam rebuilt on every membership change.

use crate::node::Node;

/// Structure derived from the active set, such as a routing table.
///
/// `rebuild` receives the full active set, sorted by ip, after every
/// change. It runs with no registry lock held, so it may read the registry,
/// but it must not mutate it.
pub trait RouteTable: Send + Sync {
    fn rebuild(&self, members: &[Node]);
}

/// Route table that ignores membership changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoutes;

impl RouteTable for NoRoutes {
    fn rebuild(&self, _members: &[Node]) {}
}
