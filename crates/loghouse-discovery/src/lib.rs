//! Gossip-based cluster membership.
//!
//! Each node runs a chitchat gossip instance and advertises its gRPC
//! address under the [`RPC_ADDR_KEY`] key. A watcher task diffs
//! successive live-node snapshots and translates them into
//! [`Handler::join`] / [`Handler::leave`] calls, the only contract the
//! rest of the system has with membership. Events about the local node
//! are filtered out before delivery.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use async_trait::async_trait;
use chitchat::transport::UdpTransport;
use chitchat::{
    spawn_chitchat, Chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
};
use futures::StreamExt as _;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Key under which every node advertises its gRPC address.
pub const RPC_ADDR_KEY: &str = "rpc_addr";

const CLUSTER_ID: &str = "loghouse";
const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const DELETION_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Receives membership events for non-local peers.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn join(&self, name: &str, rpc_addr: &str) -> anyhow::Result<()>;
    async fn leave(&self, name: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// Unique node name within the cluster.
    pub node_name: String,

    /// UDP address the gossip layer binds to and advertises.
    pub bind_addr: SocketAddr,

    /// gRPC address advertised to peers under [`RPC_ADDR_KEY`].
    pub rpc_addr: String,

    /// Gossip addresses of existing members to contact at startup. Empty
    /// for the first node of a cluster.
    pub start_join_addrs: Vec<String>,
}

pub struct Membership {
    handle: ChitchatHandle,
    watcher: JoinHandle<()>,
    node_name: String,
}

impl Membership {
    /// Joins the gossip cluster and starts delivering events to `handler`.
    pub async fn new(
        handler: Arc<dyn Handler>,
        config: MembershipConfig,
    ) -> anyhow::Result<Self> {
        // A fresh generation per process start, so peers do not mistake a
        // restarted node's reset state for stale gossip.
        let generation_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let chitchat_id = ChitchatId::new(config.node_name.clone(), generation_id, config.bind_addr);
        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: CLUSTER_ID.to_string(),
            gossip_interval: GOSSIP_INTERVAL,
            listen_addr: config.bind_addr,
            seed_nodes: config.start_join_addrs.clone(),
            failure_detector_config: FailureDetectorConfig::default(),
            marked_for_deletion_grace_period: DELETION_GRACE_PERIOD,
            catchup_callback: None,
            extra_liveness_predicate: None,
        };
        let initial_kv = vec![(RPC_ADDR_KEY.to_string(), config.rpc_addr.clone())];

        let handle = spawn_chitchat(chitchat_config, initial_kv, &UdpTransport)
            .await
            .context("failed to spawn gossip node")?;

        let watcher = tokio::spawn(watch_cluster(
            handle.chitchat(),
            handler,
            config.node_name.clone(),
        ));
        info!(
            node = %config.node_name,
            gossip_addr = %config.bind_addr,
            seeds = config.start_join_addrs.len(),
            "joined gossip cluster"
        );

        Ok(Self {
            handle,
            watcher,
            node_name: config.node_name,
        })
    }

    /// Names of the live non-local members currently observed.
    pub async fn live_members(&self) -> Vec<String> {
        let chitchat = self.handle.chitchat();
        let chitchat = chitchat.lock().await;
        chitchat
            .live_nodes()
            .filter(|id| id.node_id != self.node_name)
            .map(|id| id.node_id.clone())
            .collect()
    }

    /// Leaves the cluster: stops event delivery, then shuts the gossip
    /// node down.
    pub async fn leave(self) -> anyhow::Result<()> {
        self.watcher.abort();
        self.handle
            .shutdown()
            .await
            .context("failed to shut down gossip node")?;
        info!(node = %self.node_name, "left gossip cluster");
        Ok(())
    }
}

/// Diffs live-node snapshots into join/leave calls. The local node is
/// filtered from every event uniformly.
async fn watch_cluster(
    chitchat: Arc<Mutex<Chitchat>>,
    handler: Arc<dyn Handler>,
    local_name: String,
) {
    let mut live_nodes = chitchat.lock().await.live_nodes_watch_stream();
    let mut known: BTreeMap<String, String> = BTreeMap::new();

    while let Some(snapshot) = live_nodes.next().await {
        let mut current: BTreeMap<String, String> = BTreeMap::new();
        for (chitchat_id, state) in snapshot.iter() {
            if chitchat_id.node_id == local_name {
                continue;
            }
            let Some(rpc_addr) = state.get(RPC_ADDR_KEY) else {
                warn!(node = %chitchat_id.node_id, "live node advertises no rpc_addr");
                continue;
            };
            current.insert(chitchat_id.node_id.clone(), rpc_addr.to_string());
        }

        for (name, rpc_addr) in &current {
            if !known.contains_key(name) {
                info!(node = %name, rpc_addr = %rpc_addr, "member joined");
                if let Err(err) = handler.join(name, rpc_addr).await {
                    error!(node = %name, error = %err, "join handler failed");
                }
            }
        }
        for name in known.keys() {
            if !current.contains_key(name) {
                info!(node = %name, "member left");
                if let Err(err) = handler.leave(name).await {
                    error!(node = %name, error = %err, "leave handler failed");
                }
            }
        }
        known = current;
    }
}
