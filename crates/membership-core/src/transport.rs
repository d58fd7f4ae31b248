//! MembershipTransport trait for fetching remote member lists.
//!
//! Implementations:
//! - Simulated: in-process framed streams (`membership-sim`)

use crate::node::Node;
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("No known peers to query")]
    NoPeers,

    #[error("Too many requests in flight at {0}")]
    TooManyRequests(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The peer is up but refused the request because it is saturated.
    pub fn is_overload(&self) -> bool {
        matches!(self, TransportError::TooManyRequests(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Network access used by the refresh protocol.
#[async_trait]
pub trait MembershipTransport: Send + Sync {
    /// Choose a peer to query from `known`.
    ///
    /// Callers exclude the local node from `known`. The default picks
    /// uniformly at random.
    fn random_peer(&self, known: &[Node]) -> Option<Node> {
        known.choose(&mut rand::rng()).cloned()
    }

    /// Fetch `peer`'s full active member list.
    async fn fetch_member_list(&self, peer: &Node) -> Result<Vec<Node>>;
}
