//! `MembershipTransport` over the simulated network.
//!
//! Every request opens its own connection, sends one frame and waits for
//! the matching response.

use crate::frame::{self, FrameError};
use crate::message::{Request, Response, ResponseBody, Status};
use crate::network::SimNetwork;
use async_trait::async_trait;
use membership_core::transport::Result;
use membership_core::{MembershipTransport, Node, TransportError};
use std::sync::Arc;
use tracing::debug;

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => TransportError::Io(e),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

pub struct SimTransport {
    network: Arc<SimNetwork>,
}

impl SimTransport {
    pub fn new(network: Arc<SimNetwork>) -> Self {
        Self { network }
    }

    /// Send `request` to `peer` and return its successful response.
    ///
    /// A `tooManyRequests` status becomes `TransportError::TooManyRequests`,
    /// an error status becomes `TransportError::Remote`.
    pub async fn request(&self, peer: &Node, request: Request) -> Result<Response> {
        let mut stream = self.network.connect(&peer.address)?;
        let text = request
            .to_json()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        debug!("Sending {} to {}", request.kind(), peer);
        frame::write_frame(&mut stream, &text).await?;

        let reply = frame::read_frame(&mut stream).await?.ok_or_else(|| {
            TransportError::ConnectionFailed(format!("{} closed before responding", peer.address))
        })?;
        let response = Response::from_json(&reply)
            .ok_or_else(|| TransportError::Protocol(format!("Malformed response from {}", peer)))?;

        if response.id != request.id {
            return Err(TransportError::Protocol(format!(
                "Response id {} does not match request {}",
                response.id, request.id
            )));
        }

        match response.status {
            Status::Ok => Ok(response),
            Status::TooManyRequests => Err(TransportError::TooManyRequests(peer.address.clone())),
            Status::Error => Err(TransportError::Remote(match response.body {
                ResponseBody::Error { message } => message,
                other => format!("{:?}", other),
            })),
        }
    }

    /// Tell `peer` that `node` is joining.
    pub async fn announce(&self, peer: &Node, node: &Node) -> Result<()> {
        match self.request(peer, Request::announce(node.clone())).await?.body {
            ResponseBody::Ack => Ok(()),
            other => Err(unexpected(peer, &other)),
        }
    }

    pub async fn ping(&self, peer: &Node) -> Result<()> {
        match self.request(peer, Request::ping()).await?.body {
            ResponseBody::Pong => Ok(()),
            other => Err(unexpected(peer, &other)),
        }
    }
}

fn unexpected(peer: &Node, body: &ResponseBody) -> TransportError {
    TransportError::Protocol(format!("Unexpected response from {}: {:?}", peer, body))
}

#[async_trait]
impl MembershipTransport for SimTransport {
    async fn fetch_member_list(&self, peer: &Node) -> Result<Vec<Node>> {
        match self.request(peer, Request::get_members()).await?.body {
            ResponseBody::Members { nodes } => Ok(nodes),
            other => Err(unexpected(peer, &other)),
        }
    }
}
