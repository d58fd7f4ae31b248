//! Request handling for one simulated node.
//!
//! Each connection is split into read and write halves. Requests are read
//! frame by frame and each is served on its own task, so a slow response
//! does not hold up the next request on the same connection.

use crate::config::SimConfig;
use crate::frame;
use crate::message::{Request, RequestBody, Response, ResponseBody};
use membership_core::NodeRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{DuplexStream, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Delays delivery in proportion to payload size.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    bytes_per_sec: u64,
}

impl Throttle {
    /// `bytes_per_sec == 0` disables throttling.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self { bytes_per_sec }
    }

    pub fn delay_for(&self, bytes: usize) -> Duration {
        if self.bytes_per_sec == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_sec as f64)
    }

    pub async fn wait(&self, bytes: usize) {
        let delay = self.delay_for(bytes);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Decrements the in-flight counter when a request finishes.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type Writer = Arc<Mutex<WriteHalf<DuplexStream>>>;

/// Serves membership requests against one node's registry.
pub struct Endpoint {
    address: String,
    registry: Arc<NodeRegistry>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
    throttle: Throttle,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, registry: Arc<NodeRegistry>, config: &SimConfig) -> Self {
        Self {
            address: address.into(),
            registry,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: config.max_in_flight,
            throttle: Throttle::new(config.bandwidth_bytes_per_sec),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Serve one connection until the client hangs up.
    pub async fn serve(self: Arc<Self>, stream: DuplexStream) {
        let (mut read, write) = tokio::io::split(stream);
        let write: Writer = Arc::new(Mutex::new(write));

        loop {
            let text = match frame::read_frame(&mut read).await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    debug!("Connection to {} closed", self.address);
                    break;
                }
                Err(e) => {
                    warn!("Dropping connection to {}: {}", self.address, e);
                    break;
                }
            };

            let endpoint = Arc::clone(&self);
            let write = Arc::clone(&write);
            tokio::spawn(async move {
                endpoint.respond(&text, write).await;
            });
        }
    }

    async fn respond(&self, text: &str, write: Writer) {
        let response = match Request::from_json(text) {
            Some(request) => self.handle(request).await,
            None => {
                warn!("Malformed request at {}", self.address);
                Response::error("", "malformed request")
            }
        };

        let json = match response.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize response at {}: {}", self.address, e);
                return;
            }
        };

        let mut write = write.lock().await;
        if let Err(e) = frame::write_frame(&mut *write, &json).await {
            debug!("Failed to deliver response from {}: {}", self.address, e);
        }
    }

    /// Serve one request, enforcing the in-flight limit.
    pub async fn handle(&self, request: Request) -> Response {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(Arc::clone(&self.in_flight));

        if current > self.max_in_flight {
            debug!(
                "Rejecting {} at {} ({} in flight)",
                request.kind(),
                self.address,
                current - 1
            );
            return Response::too_many_requests(request.id);
        }

        let body = match request.body {
            RequestBody::GetMembers => ResponseBody::Members {
                nodes: self.registry.active_nodes(),
            },
            RequestBody::Announce { node } => {
                debug!("{} received announcement of {}", self.address, node);
                self.registry.add(node);
                ResponseBody::Ack
            }
            RequestBody::Ping => ResponseBody::Pong,
        };
        let response = Response::ok(request.id, body);

        // Payload size on the wire, UTF-16
        let bytes = match response.to_json() {
            Ok(json) => json.encode_utf16().count() * 2,
            Err(_) => 0,
        };
        self.throttle.wait(bytes).await;
        response
    }
}
