//! The loghouse node agent.
//!
//! An [`Agent`] runs on every service instance and wires the components
//! together: the segmented log, the gRPC and HTTP servers, the
//! replicator, and gossip membership. See [`Agent::new`] for the setup
//! order and [`Agent::shutdown`] for the teardown order.

pub mod agent;

pub use agent::{Agent, Config};
