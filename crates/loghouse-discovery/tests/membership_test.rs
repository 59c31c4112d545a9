//! Two real gossip nodes on loopback: joins propagate to handlers, a
//! shut-down node is eventually reported as left.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use loghouse_discovery::{Handler, Membership, MembershipConfig};
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingHandler {
    joins: Mutex<Vec<(String, String)>>,
    leaves: Mutex<Vec<String>>,
}

impl RecordingHandler {
    async fn saw_join(&self, name: &str, rpc_addr: &str) -> bool {
        self.joins
            .lock()
            .await
            .iter()
            .any(|(joined, addr)| joined == name && addr == rpc_addr)
    }

    async fn saw_leave(&self, name: &str) -> bool {
        self.leaves.lock().await.iter().any(|left| left == name)
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn join(&self, name: &str, rpc_addr: &str) -> anyhow::Result<()> {
        self.joins
            .lock()
            .await
            .push((name.to_string(), rpc_addr.to_string()));
        Ok(())
    }

    async fn leave(&self, name: &str) -> anyhow::Result<()> {
        self.leaves.lock().await.push(name.to_string());
        Ok(())
    }
}

fn free_udp_addr() -> SocketAddr {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

#[tokio::test]
async fn joins_and_leaves_reach_the_handler() {
    let seed_addr = free_udp_addr();

    let handler_a = Arc::new(RecordingHandler::default());
    let membership_a = Membership::new(
        handler_a.clone(),
        MembershipConfig {
            node_name: "node-0".to_string(),
            bind_addr: seed_addr,
            rpc_addr: "127.0.0.1:9000".to_string(),
            start_join_addrs: Vec::new(),
        },
    )
    .await
    .unwrap();

    let handler_b = Arc::new(RecordingHandler::default());
    let membership_b = Membership::new(
        handler_b.clone(),
        MembershipConfig {
            node_name: "node-1".to_string(),
            bind_addr: free_udp_addr(),
            rpc_addr: "127.0.0.1:9001".to_string(),
            start_join_addrs: vec![seed_addr.to_string()],
        },
    )
    .await
    .unwrap();

    // Both sides observe each other's join, local nodes filtered out.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if handler_a.saw_join("node-1", "127.0.0.1:9001").await
            && handler_b.saw_join("node-0", "127.0.0.1:9000").await
        {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "both nodes should observe each other's join"
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    assert_eq!(membership_a.live_members().await, vec!["node-1".to_string()]);
    for (name, _) in handler_a.joins.lock().await.iter() {
        assert_ne!(name, "node-0", "local joins must be filtered");
    }

    // Shutting node-1 down makes node-0 report it as left once the
    // failure detector gives up on it.
    membership_b.leave().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        if handler_a.saw_leave("node-1").await {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "node-0 should observe node-1 leaving"
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    membership_a.leave().await.unwrap();
}
