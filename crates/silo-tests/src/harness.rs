//! Multi-node test network harness.

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::node::TestNode;

/// A test network: one bootstrap node plus joiners.
pub struct TestNetwork {
    nodes: Vec<TestNode>,
}

impl TestNetwork {
    /// Starts `count` nodes. The first is the bootstrap; every later node
    /// joins through it and learns the rest via gossip.
    pub async fn with_nodes(count: usize) -> Self {
        assert!(count >= 1, "a network needs at least the bootstrap node");

        let bootstrap = TestNode::start(&[], true).await;
        let bootstrap_addr = bootstrap.addr;
        let mut nodes = vec![bootstrap];

        for _ in 1..count {
            let node = TestNode::start(&[bootstrap_addr], false).await;
            nodes.push(node);
            // Let introductions and gossip dials land before the next join.
            sleep(Duration::from_millis(50)).await;
        }

        info!(nodes = nodes.len(), "test network up");
        Self { nodes }
    }

    /// Returns the node at `index`.
    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the network has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Waits until `node_index` has at least `min_peers` connections.
    pub async fn wait_for_peers(&self, node_index: usize, min_peers: usize, timeout: Duration) {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.nodes[node_index].peer_count() >= min_peers {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "node {} has {} peers, wanted at least {}",
            node_index,
            self.nodes[node_index].peer_count(),
            min_peers
        );
    }

    /// Lets in-flight replication settle.
    pub async fn settle(&self) {
        sleep(Duration::from_millis(100)).await;
    }
}
