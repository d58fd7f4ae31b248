//! The local node's own identity, once it has joined.

use crate::node::Node;
use std::sync::RwLock;

/// Holds the local node after it joins the overlay.
///
/// While unset the registry refreshes in bootstrap mode.
#[derive(Debug, Default)]
pub struct LocalIdentity {
    node: RwLock<Option<Node>>,
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Node> {
        self.node.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, node: Node) {
        *self.node.write().unwrap_or_else(|e| e.into_inner()) = Some(node);
    }

    pub fn clear(&self) -> Option<Node> {
        self.node.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_joined(&self) -> bool {
        self.node
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
