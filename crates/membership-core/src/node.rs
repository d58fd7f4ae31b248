//! Node identity for members of the overlay.
//!
//! A node is keyed by a 32-bit numeric address (`NodeIp`) which is used for
//! equality, lookup and sort order. It displays as a dotted quad for human
//! readability (`10.0.0.7`).

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeIpError {
    #[error("Invalid node address format: expected dotted quad or decimal")]
    InvalidFormat,
}

/// Numeric address key of a node.
///
/// Wraps a u32. Ordering is numeric, which is the order the active set is
/// kept in.
///
/// # Examples
/// ```
/// use membership_core::NodeIp;
///
/// let ip: NodeIp = "10.0.0.7".parse().unwrap();
/// assert_eq!(ip.as_u32(), 0x0a000007);
/// assert_eq!(ip.to_string(), "10.0.0.7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeIp(u32);

impl NodeIp {
    /// Unassigned address. Never handed out by `NodeIpAllocator`.
    pub const UNSPECIFIED: NodeIp = NodeIp(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for NodeIp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(self.0))
    }
}

impl FromStr for NodeIp {
    type Err = NodeIpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(Self(u32::from(addr)));
        }

        // Bare decimal form, as produced by older tooling
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| NodeIpError::InvalidFormat)
    }
}

impl From<u32> for NodeIp {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeIp> for u32 {
    fn from(ip: NodeIp) -> u32 {
        ip.0
    }
}

// Serialize as dotted quad for consistency in logs and JSON
impl Serialize for NodeIp {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeIp {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A member of the overlay.
///
/// `timestamp` is transient: zero means the node is not pending, non-zero is
/// the logical time (ms) at which its join was announced. Equality and hashing
/// use `ip` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Numeric address key
    pub ip: NodeIp,
    /// Logical endpoint used by the transport
    pub address: String,
    /// Announcement time, 0 when not pending
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timestamp: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Node {
    /// Create a node that activates immediately when added.
    pub fn new(ip: NodeIp, address: impl Into<String>) -> Self {
        Self {
            ip,
            address: address.into(),
            timestamp: 0,
        }
    }

    /// Create a node whose join was announced at `timestamp`.
    pub fn announced(ip: NodeIp, address: impl Into<String>, timestamp: u64) -> Self {
        Self {
            ip,
            address: address.into(),
            timestamp,
        }
    }

    /// Copy of this node carrying an announcement timestamp.
    pub fn with_timestamp(&self, timestamp: u64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.timestamp != 0
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.ip, self.address)
    }
}

/// Hands out unique node addresses.
///
/// Owned by whatever constructs identities, so separate networks (and
/// separate tests) never share a counter.
#[derive(Debug)]
pub struct NodeIpAllocator {
    next: AtomicU32,
}

impl Default for NodeIpAllocator {
    fn default() -> Self {
        Self::starting_at(NodeIp::new(1))
    }
}

impl NodeIpAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start allocating at `base` (e.g. `10.0.0.1` for a simulated subnet).
    pub fn starting_at(base: NodeIp) -> Self {
        Self {
            next: AtomicU32::new(base.as_u32()),
        }
    }

    /// Allocate the next address. Skips `0.0.0.0` on wrap-around.
    pub fn allocate(&self) -> NodeIp {
        loop {
            let value = self.next.fetch_add(1, Ordering::Relaxed);
            if value != 0 {
                return NodeIp(value);
            }
        }
    }
}
