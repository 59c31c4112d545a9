//! Pull-based peer replication.
//!
//! For every peer discovered through membership, the [`Replicator`] runs
//! one background task that opens a streaming consume against the peer,
//! starting at offset zero, and appends each received record to the
//! local log. Replication is eventual and best-effort: a newly joining
//! node re-consumes the peer's full history, and values produced on
//! several origins are not deduplicated, so operators run a single writer
//! per value-space.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loghouse_log::Log;
use loghouse_proto::v1::log_client::LogClient;
use loghouse_proto::v1::ConsumeRequest;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Mirrors discovered peers' logs into the local log, one task per peer.
pub struct Replicator {
    log: Arc<Log>,
    inner: Mutex<Inner>,
}

struct Inner {
    closed: bool,
    peers: HashMap<String, Peer>,
}

/// Close-signal and task handle for one peer. Owning the handle lets
/// leave/close wait for the task, so no append can race past the signal.
struct Peer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Replicator {
    pub fn new(log: Arc<Log>) -> Self {
        Self {
            log,
            inner: Mutex::new(Inner {
                closed: false,
                peers: HashMap::new(),
            }),
        }
    }

    /// Starts replicating from the peer `name` at `addr`. Idempotent:
    /// joining a known peer, or a closed replicator, is a no-op.
    pub async fn join(&self, name: &str, addr: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed || inner.peers.contains_key(name) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(replicate(
            name.to_string(),
            addr.to_string(),
            Arc::clone(&self.log),
            cancel.clone(),
        ));
        inner.peers.insert(name.to_string(), Peer { cancel, task });
        info!(peer = name, addr, "replication started");
        Ok(())
    }

    /// Stops replicating from `name` and waits for its task to finish.
    /// Idempotent.
    pub async fn leave(&self, name: &str) -> anyhow::Result<()> {
        let peer = self.inner.lock().await.peers.remove(name);
        let Some(peer) = peer else {
            return Ok(());
        };

        peer.cancel.cancel();
        if let Err(err) = peer.task.await {
            error!(peer = name, error = %err, "replication task panicked");
        }
        info!(peer = name, "replication stopped");
        Ok(())
    }

    /// Stops every replication task and refuses future joins. Idempotent.
    pub async fn close(&self) -> anyhow::Result<()> {
        let peers = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Ok(());
            }
            inner.closed = true;
            std::mem::take(&mut inner.peers)
        };

        for (name, peer) in peers {
            peer.cancel.cancel();
            if let Err(err) = peer.task.await {
                error!(peer = %name, error = %err, "replication task panicked");
            }
        }
        info!("replicator closed");
        Ok(())
    }

    #[cfg(test)]
    async fn peer_count(&self) -> usize {
        self.inner.lock().await.peers.len()
    }
}

#[async_trait]
impl loghouse_discovery::Handler for Replicator {
    async fn join(&self, name: &str, rpc_addr: &str) -> anyhow::Result<()> {
        Replicator::join(self, name, rpc_addr).await
    }

    async fn leave(&self, name: &str) -> anyhow::Result<()> {
        Replicator::leave(self, name).await
    }
}

/// One peer's pull loop: consume the peer's log from offset zero and
/// append everything received locally. Exits on the close signal, on
/// stream end, or on a stream error (logged). Every receive is raced
/// against the close signal so no append happens after it fires.
async fn replicate(name: String, addr: String, log: Arc<Log>, cancel: CancellationToken) {
    let endpoint = format!("http://{addr}");
    let mut client = tokio::select! {
        _ = cancel.cancelled() => return,
        connected = LogClient::connect(endpoint) => match connected {
            Ok(client) => client,
            Err(err) => {
                error!(peer = %name, addr = %addr, error = %err, "failed to dial peer");
                return;
            }
        },
    };

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = client.consume_stream(ConsumeRequest { offset: 0 }) => match opened {
            Ok(response) => response.into_inner(),
            Err(status) => {
                error!(peer = %name, error = %status, "failed to open consume stream");
                return;
            }
        },
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.message() => match message {
                Ok(Some(response)) => {
                    let Some(record) = response.record else {
                        continue;
                    };
                    let offset = record.offset;
                    if let Err(err) = log.append(record).await {
                        error!(peer = %name, offset, error = %err, "failed to append replicated record");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(peer = %name, "peer stream ended");
                    break;
                }
                Err(status) => {
                    error!(peer = %name, error = %status, "replication stream failed");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_log::Config;

    async fn replicator() -> (Replicator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Log::open(dir.path(), Config::default()).unwrap());
        (Replicator::new(log), dir)
    }

    #[tokio::test]
    async fn join_is_idempotent_per_peer() {
        let (replicator, _dir) = replicator().await;

        replicator.join("peer-a", "127.0.0.1:1").await.unwrap();
        replicator.join("peer-a", "127.0.0.1:1").await.unwrap();
        assert_eq!(replicator.peer_count().await, 1);

        replicator.join("peer-b", "127.0.0.1:2").await.unwrap();
        assert_eq!(replicator.peer_count().await, 2);

        replicator.close().await.unwrap();
    }

    #[tokio::test]
    async fn leave_unknown_peer_is_a_no_op() {
        let (replicator, _dir) = replicator().await;
        replicator.leave("nobody").await.unwrap();

        replicator.join("peer-a", "127.0.0.1:1").await.unwrap();
        replicator.leave("peer-a").await.unwrap();
        replicator.leave("peer-a").await.unwrap();
        assert_eq!(replicator.peer_count().await, 0);

        replicator.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_refuses_future_joins() {
        let (replicator, _dir) = replicator().await;

        replicator.join("peer-a", "127.0.0.1:1").await.unwrap();
        replicator.close().await.unwrap();
        replicator.close().await.unwrap();

        replicator.join("peer-b", "127.0.0.1:2").await.unwrap();
        assert_eq!(replicator.peer_count().await, 0);
    }

    #[tokio::test]
    async fn rejoin_after_leave_spawns_a_fresh_task() {
        let (replicator, _dir) = replicator().await;

        replicator.join("peer-a", "127.0.0.1:1").await.unwrap();
        replicator.leave("peer-a").await.unwrap();
        replicator.join("peer-a", "127.0.0.1:1").await.unwrap();
        assert_eq!(replicator.peer_count().await, 1);

        replicator.close().await.unwrap();
    }
}
