//! Protobuf definitions for the loghouse commit log.
//!
//! This crate contains the gRPC service definition and message types shared
//! by the server, the replication engine and clients, plus the canonical
//! wire encoding of the `offset out of range` error.
//!
//! ## Usage
//!
//! ```ignore
//! use loghouse_proto::v1::{log_client::LogClient, ConsumeRequest};
//!
//! let mut client = LogClient::connect("http://localhost:9098").await?;
//! let response = client.consume(ConsumeRequest { offset: 0 }).await?;
//! ```

/// Generated types for the `loghouse.v1` package.
pub mod v1 {
    tonic::include_proto!("loghouse.v1");
}

pub mod error;
