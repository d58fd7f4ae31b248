//! Request/response messages carried inside frames.
//!
//! Messages are JSON text. Every request carries a fresh id which the
//! response echoes back.

use membership_core::Node;
use serde::{Deserialize, Serialize};

/// A request sent to a node's endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestBody {
    /// Ask for the endpoint's active member list
    GetMembers,
    /// Announce that `node` is joining
    Announce { node: Node },
    Ping,
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Ok,
    /// The endpoint is serving too many requests already
    TooManyRequests,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub status: Status,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseBody {
    Members { nodes: Vec<Node> },
    Ack,
    Pong,
    Error { message: String },
}

impl Request {
    pub fn new(body: RequestBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            body,
        }
    }

    pub fn get_members() -> Self {
        Self::new(RequestBody::GetMembers)
    }

    pub fn announce(node: Node) -> Self {
        Self::new(RequestBody::Announce { node })
    }

    pub fn ping() -> Self {
        Self::new(RequestBody::Ping)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Returns None if `text` is not a request.
    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self.body {
            RequestBody::GetMembers => "getMembers",
            RequestBody::Announce { .. } => "announce",
            RequestBody::Ping => "ping",
        }
    }
}

impl Response {
    pub fn ok(id: impl Into<String>, body: ResponseBody) -> Self {
        Self {
            id: id.into(),
            status: Status::Ok,
            body,
        }
    }

    pub fn too_many_requests(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::TooManyRequests,
            body: ResponseBody::Error {
                message: "too many requests".to_string(),
            },
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Error,
            body: ResponseBody::Error {
                message: message.into(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
