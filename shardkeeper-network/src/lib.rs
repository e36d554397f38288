//! Binary RPC envelope, length-delimited transport, outbound client adapters, the
//! storage-node request handler, and the heartbeat failure detector.

pub mod clients;
pub mod envelope;
pub mod failure_detector;
pub mod node_handler;
pub mod transport;

pub use clients::NetworkClient;
pub use envelope::{ClusterStatus, RpcRequest, RpcResponse};
pub use failure_detector::FailureDetector;
pub use node_handler::NodeHandler;
pub use transport::{send_request, serve, RequestHandler};
