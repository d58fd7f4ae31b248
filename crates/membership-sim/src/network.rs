//! In-process network of simulated nodes.
//!
//! Nodes are reached by address string. `connect` hands back one end of an
//! in-memory duplex stream and spawns the endpoint on the other end.

use crate::config::SimConfig;
use crate::endpoint::Endpoint;
use membership_core::{Node, NodeIp, NodeIpAllocator, NodeRegistry, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::io::DuplexStream;
use tracing::debug;

/// Buffer size of each simulated connection, per direction.
const CONNECTION_BUFFER: usize = 64 * 1024;

/// First address handed out on a fresh network.
const BASE_IP: NodeIp = NodeIp::new(0x0a00_0001); // 10.0.0.1

/// Address → endpoint map shared by every simulated node.
pub struct SimNetwork {
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    allocator: NodeIpAllocator,
    config: SimConfig,
}

impl SimNetwork {
    pub fn new(config: SimConfig) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            allocator: NodeIpAllocator::starting_at(BASE_IP),
            config,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// New identity with a fresh ip.
    pub fn allocate_node(&self, address: impl Into<String>) -> Node {
        Node::new(self.allocator.allocate(), address)
    }

    /// Start serving `registry` at `address`, replacing any previous endpoint.
    pub fn register(&self, address: impl Into<String>, registry: Arc<NodeRegistry>) -> Arc<Endpoint> {
        let address = address.into();
        let endpoint = Arc::new(Endpoint::new(address.clone(), registry, &self.config));
        self.endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.clone(), Arc::clone(&endpoint));
        debug!("Registered endpoint {}", address);
        endpoint
    }

    /// Take `address` off the network. Returns true if it was registered.
    pub fn unregister(&self, address: &str) -> bool {
        let removed = self
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address)
            .is_some();
        if removed {
            debug!("Unregistered endpoint {}", address);
        }
        removed
    }

    pub fn endpoint(&self, address: &str) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Open a connection to `address`. Must be called within a tokio runtime.
    pub fn connect(&self, address: &str) -> Result<DuplexStream, TransportError> {
        let endpoint = self
            .endpoint(address)
            .ok_or_else(|| TransportError::PeerNotFound(address.to_string()))?;

        let (client, server) = tokio::io::duplex(CONNECTION_BUFFER);
        tokio::spawn(endpoint.serve(server));
        Ok(client)
    }
}
