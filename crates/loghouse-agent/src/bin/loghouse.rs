//! Loghouse node binary.
//!
//! Runs one cluster node: segmented log, gRPC server, HTTP gateway,
//! gossip membership and peer replication. Shuts down cleanly on ctrl-c.
//!
//! ```bash
//! # First node of a cluster
//! loghouse --data-dir /var/lib/loghouse --node-name node-0
//!
//! # Joining nodes point --join at any existing member's gossip address
//! loghouse --data-dir /var/lib/loghouse --node-name node-1 \
//!     --rpc-addr 0.0.0.0:9198 --http-addr 0.0.0.0:9199 \
//!     --membership-addr 0.0.0.0:9197 --join 10.0.0.1:9097
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use loghouse_agent::{Agent, Config};
use loghouse_log::SegmentConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "loghouse", version, about = "Distributed append-only commit log node")]
struct Args {
    /// Directory holding the segmented log files.
    #[arg(long, default_value = "/var/lib/loghouse")]
    data_dir: PathBuf,

    /// Unique node name within the cluster.
    #[arg(long, default_value_t = default_node_name())]
    node_name: String,

    /// Address the gRPC server binds to.
    #[arg(long, default_value = "0.0.0.0:9098")]
    rpc_addr: SocketAddr,

    /// Address the HTTP gateway binds to.
    #[arg(long, default_value = "0.0.0.0:9099")]
    http_addr: SocketAddr,

    /// Address the gossip layer binds to.
    #[arg(long, default_value = "0.0.0.0:9097")]
    membership_addr: SocketAddr,

    /// Gossip address of an existing cluster member to join at startup.
    /// Repeatable.
    #[arg(long = "join")]
    start_join_addrs: Vec<String>,

    /// Maximum bytes per segment store file.
    #[arg(long, default_value_t = 1024)]
    max_store_bytes: u64,

    /// Maximum bytes per segment index file.
    #[arg(long, default_value_t = 1024)]
    max_index_bytes: u64,
}

fn default_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "loghouse".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let agent = Agent::new(Config {
        data_dir: args.data_dir,
        node_name: args.node_name,
        rpc_bind_addr: args.rpc_addr,
        http_bind_addr: args.http_addr,
        membership_bind_addr: args.membership_addr,
        start_join_addrs: args.start_join_addrs,
        segment: SegmentConfig {
            max_store_bytes: args.max_store_bytes,
            max_index_bytes: args.max_index_bytes,
            initial_offset: 0,
        },
    })
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("caught shutdown signal");
    agent.shutdown().await
}
