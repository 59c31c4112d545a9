//! Agent lifecycle: ordered setup and strictly ordered teardown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use loghouse_discovery::{Handler, Membership, MembershipConfig};
use loghouse_log::{Config as LogConfig, Log, SegmentConfig};
use loghouse_replication::Replicator;
use loghouse_server::{http_router, LogService};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tracing::{error, info};

/// How long a server gets to finish in-flight requests before its task
/// is cut. Tailing consume streams held open by remote replicators would
/// otherwise keep a graceful stop from completing.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the segmented log.
    pub data_dir: PathBuf,

    /// Unique node name within the cluster.
    pub node_name: String,

    /// Bind address for the gRPC server. Port 0 picks a free port; the
    /// advertised address is the one actually bound.
    pub rpc_bind_addr: SocketAddr,

    /// Bind address for the HTTP gateway.
    pub http_bind_addr: SocketAddr,

    /// Bind address for the gossip layer.
    pub membership_bind_addr: SocketAddr,

    /// Gossip addresses of existing members to join at startup.
    pub start_join_addrs: Vec<String>,

    pub segment: SegmentConfig,
}

pub struct Agent {
    log: Arc<Log>,
    replicator: Arc<Replicator>,
    rpc_addr: SocketAddr,
    http_addr: SocketAddr,
    state: Mutex<State>,
}

struct State {
    shut_down: bool,
    membership: Option<Membership>,
    rpc_shutdown: Option<oneshot::Sender<()>>,
    rpc_task: Option<JoinHandle<()>>,
    http_shutdown: Option<oneshot::Sender<()>>,
    http_task: Option<JoinHandle<()>>,
}

impl Agent {
    /// Brings a node up: opens the log, starts the gRPC server and HTTP
    /// gateway, then joins the gossip cluster with the replicator as the
    /// membership handler.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let log = Arc::new(
            Log::open(
                &config.data_dir,
                LogConfig {
                    segment: config.segment.clone(),
                },
            )
            .context("failed to open log")?,
        );

        let rpc_listener = TcpListener::bind(config.rpc_bind_addr)
            .await
            .context("failed to bind rpc address")?;
        let rpc_addr = rpc_listener.local_addr()?;
        let (rpc_shutdown, rpc_shutdown_rx) = oneshot::channel();
        let service = LogService::new(Arc::clone(&log));
        let rpc_task = tokio::spawn(async move {
            let incoming = tokio_stream::wrappers::TcpListenerStream::new(rpc_listener);
            let result = Server::builder()
                .add_service(service.into_server())
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = rpc_shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                error!(error = %err, "grpc server exited");
            }
        });

        let http_listener = TcpListener::bind(config.http_bind_addr)
            .await
            .context("failed to bind http address")?;
        let http_addr = http_listener.local_addr()?;
        let (http_shutdown, http_shutdown_rx) = oneshot::channel();
        let router = http_router(Arc::clone(&log));
        let http_task = tokio::spawn(async move {
            let result = axum::serve(http_listener, router)
                .with_graceful_shutdown(async {
                    let _ = http_shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                error!(error = %err, "http server exited");
            }
        });

        let replicator = Arc::new(Replicator::new(Arc::clone(&log)));
        let membership = Membership::new(
            Arc::clone(&replicator) as Arc<dyn Handler>,
            MembershipConfig {
                node_name: config.node_name.clone(),
                bind_addr: config.membership_bind_addr,
                rpc_addr: rpc_addr.to_string(),
                start_join_addrs: config.start_join_addrs.clone(),
            },
        )
        .await
        .context("failed to join membership")?;

        info!(
            node = %config.node_name,
            rpc = %rpc_addr,
            http = %http_addr,
            gossip = %config.membership_bind_addr,
            "agent started"
        );

        Ok(Self {
            log,
            replicator,
            rpc_addr,
            http_addr,
            state: Mutex::new(State {
                shut_down: false,
                membership: Some(membership),
                rpc_shutdown: Some(rpc_shutdown),
                rpc_task: Some(rpc_task),
                http_shutdown: Some(http_shutdown),
                http_task: Some(http_task),
            }),
        })
    }

    /// The gRPC address actually bound.
    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// The HTTP gateway address actually bound.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Tears the node down in strict order: leave membership, close the
    /// replicator, stop the gRPC server, stop the HTTP gateway, close the
    /// log. A failure aborts the sequence. Idempotent.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Ok(());
        }
        state.shut_down = true;

        if let Some(membership) = state.membership.take() {
            membership.leave().await.context("leaving membership")?;
        }
        self.replicator
            .close()
            .await
            .context("closing replicator")?;

        if let Some(shutdown) = state.rpc_shutdown.take() {
            let _ = shutdown.send(());
        }
        stop_server(state.rpc_task.take(), "grpc").await?;

        if let Some(shutdown) = state.http_shutdown.take() {
            let _ = shutdown.send(());
        }
        stop_server(state.http_task.take(), "http").await?;

        self.log.close().await.context("closing log")?;
        info!("agent shut down");
        Ok(())
    }
}

async fn stop_server(task: Option<JoinHandle<()>>, kind: &str) -> anyhow::Result<()> {
    let Some(mut task) = task else {
        return Ok(());
    };
    match tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut task).await {
        Ok(joined) => joined.with_context(|| format!("{kind} server task failed"))?,
        Err(_) => {
            error!(server = kind, "graceful stop timed out, aborting");
            task.abort();
            let _ = task.await;
        }
    }
    Ok(())
}
