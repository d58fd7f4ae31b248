//! membership-core: Local view of peer membership in a P2P overlay.
//!
//! This crate provides:
//! - `NodeRegistry`, the sorted active set with delayed activation and a
//!   grace window for removed nodes
//! - Bootstrap and periodic refresh against a remote peer's member list
//! - `TaskQueue` and `Clock` so timing can be driven by a dispatcher or a test
//! - Transport, routing and event seams for the surrounding node

pub mod clock;
pub mod config;
pub mod events;
pub mod identity;
pub mod node;
pub mod registry;
pub mod routing;
pub mod task;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DuplicatePending, MembershipConfig};
pub use events::{EventBus, EventKind, MembershipEvent, Subscription};
pub use identity::LocalIdentity;
pub use node::{Node, NodeIp, NodeIpAllocator, NodeIpError};
pub use registry::{Collaborators, NodeRegistry, RefreshError, RefreshOutcome};
pub use routing::{NoRoutes, RouteTable};
pub use task::{Task, TaskQueue};
pub use transport::{MembershipTransport, TransportError};
