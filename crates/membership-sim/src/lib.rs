//! membership-sim: Simulated network for the membership registry.
//!
//! Exports the wire codec, endpoints and transport so integration tests can
//! drive a cluster directly.

pub mod cluster;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod frame;
pub mod message;
pub mod network;
pub mod transport;

pub use cluster::{Cluster, NodeSummary, SimNode};
pub use config::{Config, ConfigError, SimConfig};
pub use dispatcher::Dispatcher;
pub use endpoint::{Endpoint, Throttle};
pub use frame::FrameError;
pub use message::{Request, RequestBody, Response, ResponseBody, Status};
pub use network::SimNetwork;
pub use transport::SimTransport;
