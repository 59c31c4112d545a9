//! Request dispatch for a loghouse node.
//!
//! Exposes the commit log over two surfaces sharing one [`Log`] handle:
//! the gRPC `Log` service (Produce/Consume plus both streaming variants)
//! and a small JSON HTTP gateway.
//!
//! [`Log`]: loghouse_log::Log

pub mod grpc;
pub mod http;

pub use grpc::LogService;
pub use http::router as http_router;
