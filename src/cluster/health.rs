//! Node health tracking
//!
//! Every fan-out leg reports back here. Shares are N-of-N, so a cluster
//! stays fully usable only while every node answers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::node::NodeDescriptor;

/// Consecutive failures before a node is considered down
const DEFAULT_MAX_FAILURES: u32 = 3;

/// Error rate above which a node is reported as degraded
const DEGRADED_ERROR_RATE_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Healthy,
    /// Answering, but with a high error rate
    Degraded,
    Unavailable,
}

/// Counters for one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_id: String,
    pub status: NodeStatus,
    /// Unix seconds of the last successful request
    pub last_success: Option<i64>,
    pub last_error: Option<String>,
    /// Consecutive failures
    pub failure_count: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
}

impl NodeHealth {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Healthy,
            last_success: None,
            last_error: None,
            failure_count: 0,
            total_requests: 0,
            failed_requests: 0,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    fn is_up(&self) -> bool {
        self.status != NodeStatus::Unavailable
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Healthy,
    /// Some nodes degraded, none down
    Degraded,
    /// At least one node down; shared fields cannot be reassembled
    Failed,
}

/// Snapshot of every node in a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub status: ClusterStatus,
    pub nodes: Vec<NodeHealth>,
    pub required_nodes: usize,
}

/// Per-node health, indexed by node position
pub struct HealthTracker {
    nodes: RwLock<Vec<NodeHealth>>,
    required_nodes: usize,
    max_failures: u32,
}

impl HealthTracker {
    /// Track `nodes`; all of them are required for reassembly
    pub fn new(nodes: &[NodeDescriptor]) -> Self {
        Self::with_max_failures(nodes, DEFAULT_MAX_FAILURES)
    }

    pub fn with_max_failures(nodes: &[NodeDescriptor], max_failures: u32) -> Self {
        Self {
            nodes: RwLock::new(nodes.iter().map(|n| NodeHealth::new(n.id.clone())).collect()),
            required_nodes: nodes.len(),
            max_failures,
        }
    }

    pub fn record_success(&self, index: usize) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(index) {
            node.total_requests += 1;
            node.last_success = Some(chrono::Utc::now().timestamp());
            node.failure_count = 0;

            // a node that answers again is back in service
            node.status = if node.error_rate() < DEGRADED_ERROR_RATE_THRESHOLD {
                NodeStatus::Healthy
            } else {
                NodeStatus::Degraded
            };
        }
    }

    pub fn record_failure(&self, index: usize, error: &str) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(index) {
            node.total_requests += 1;
            node.failed_requests += 1;
            node.failure_count += 1;
            node.last_error = Some(error.to_string());

            if node.failure_count >= self.max_failures {
                node.status = NodeStatus::Unavailable;
            } else if node.error_rate() >= DEGRADED_ERROR_RATE_THRESHOLD {
                node.status = NodeStatus::Degraded;
            }
        }
    }

    pub fn node_health(&self, index: usize) -> Option<NodeHealth> {
        self.nodes.read().get(index).cloned()
    }

    pub fn cluster_health(&self) -> ClusterHealth {
        let nodes = self.nodes.read();
        let up = nodes.iter().filter(|n| n.is_up()).count();

        let status = if up < self.required_nodes {
            ClusterStatus::Failed
        } else if nodes.iter().all(|n| n.status == NodeStatus::Healthy) {
            ClusterStatus::Healthy
        } else {
            ClusterStatus::Degraded
        };

        ClusterHealth {
            status,
            nodes: nodes.clone(),
            required_nodes: self.required_nodes,
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_up()).count()
    }

    pub fn reset(&self, index: usize) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(index) {
            *node = NodeHealth::new(node.node_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<NodeDescriptor> {
        (0..n)
            .map(|i| NodeDescriptor::new(format!("node-{}", i), format!("http://n{}.local", i)))
            .collect()
    }

    #[test]
    fn test_new_tracker_healthy() {
        let tracker = HealthTracker::new(&nodes(3));
        let health = tracker.cluster_health();
        assert_eq!(health.status, ClusterStatus::Healthy);
        assert_eq!(health.required_nodes, 3);
        assert_eq!(health.nodes[1].node_id, "node-1");
    }

    #[test]
    fn test_record_success_and_failure() {
        let tracker = HealthTracker::new(&nodes(2));
        tracker.record_success(0);
        tracker.record_failure(1, "timed out");

        let ok = tracker.node_health(0).unwrap();
        assert_eq!(ok.total_requests, 1);
        assert!(ok.last_success.is_some());

        let bad = tracker.node_health(1).unwrap();
        assert_eq!(bad.failed_requests, 1);
        assert_eq!(bad.last_error.as_deref(), Some("timed out"));
        assert_eq!(bad.status, NodeStatus::Degraded);
        assert_eq!(tracker.cluster_health().status, ClusterStatus::Degraded);
    }

    #[test]
    fn test_node_down_fails_cluster() {
        let tracker = HealthTracker::new(&nodes(3));
        for _ in 0..3 {
            tracker.record_failure(2, "connection refused");
        }

        assert_eq!(tracker.node_health(2).unwrap().status, NodeStatus::Unavailable);
        assert_eq!(tracker.healthy_count(), 2);
        assert_eq!(tracker.cluster_health().status, ClusterStatus::Failed);
    }

    #[test]
    fn test_success_brings_node_back() {
        let tracker = HealthTracker::with_max_failures(&nodes(2), 1);
        tracker.record_failure(0, "down");
        assert_eq!(tracker.node_health(0).unwrap().status, NodeStatus::Unavailable);

        tracker.record_success(0);
        let health = tracker.node_health(0).unwrap();
        assert_ne!(health.status, NodeStatus::Unavailable);
        assert_eq!(health.failure_count, 0);
    }

    #[test]
    fn test_reset_and_out_of_range() {
        let tracker = HealthTracker::new(&nodes(2));
        tracker.record_failure(0, "x");
        tracker.reset(0);
        assert_eq!(tracker.node_health(0).unwrap().total_requests, 0);

        assert!(tracker.node_health(9).is_none());
        tracker.record_success(9);
        tracker.record_failure(9, "ignored");
    }
}
