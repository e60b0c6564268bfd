//! Concurrent dispatch of one request per node
//!
//! Every leg runs concurrently and the call returns only after all legs
//! have settled. Outcomes come back in node order; a failed leg never
//! cancels or short-circuits the others.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::auth::TokenIssuer;
use super::health::{ClusterHealth, HealthTracker};
use super::node::{NodeDescriptor, NodeFailure, NodeOutcome};
use super::transport::{Method, Transport, TransportError};

/// Fan-out coordinator over a fixed, ordered node list
pub struct FanOut {
    nodes: Vec<NodeDescriptor>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenIssuer>,
    health: Arc<HealthTracker>,
}

impl FanOut {
    pub fn new(
        nodes: Vec<NodeDescriptor>,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one node is required".to_string(),
            ));
        }

        let health = Arc::new(HealthTracker::new(&nodes));
        Ok(Self {
            nodes,
            transport,
            tokens,
            health,
        })
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn health(&self) -> ClusterHealth {
        self.health.cluster_health()
    }

    /// Send one request per node to `endpoint`.
    ///
    /// `build` produces the payload for node `i`; it runs for every node
    /// before anything is sent. A builder or token error only fails that
    /// node's leg.
    pub async fn fan_out<F>(&self, endpoint: &str, method: Method, build: F) -> Vec<NodeOutcome>
    where
        F: Fn(&NodeDescriptor, usize) -> Result<Option<Value>>,
    {
        debug!(
            "Fanning out {:?} {} to {} nodes",
            method,
            endpoint,
            self.nodes.len()
        );

        let prepared: Vec<_> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| -> std::result::Result<(String, Option<Value>), NodeFailure> {
                let payload = build(node, index).map_err(local_failure)?;
                let token = self.tokens.token_for(&node.id).map_err(local_failure)?;
                Ok((token, payload))
            })
            .collect();

        let legs = self
            .nodes
            .iter()
            .zip(prepared)
            .enumerate()
            .map(|(index, (node, prepared))| {
                let transport = Arc::clone(&self.transport);
                async move {
                    let (token, payload) = match prepared {
                        Ok(ready) => ready,
                        Err(failure) => return (index, node, Err(failure)),
                    };

                    let result = transport
                        .send(&node.url, endpoint, &token, payload.as_ref(), method)
                        .await;

                    let result = match result {
                        Ok(response) if response.is_success() => {
                            Ok(response.body.unwrap_or(Value::Null))
                        }
                        Ok(response) => Err(NodeFailure::Application {
                            status: response.status,
                            body: response.body.unwrap_or(Value::Null),
                        }),
                        Err(e) => Err(transport_failure(e)),
                    };

                    (index, node, result)
                }
            })
            .collect::<Vec<_>>();

        let results = join_all(legs).await;

        let mut outcomes = Vec::with_capacity(results.len());
        let mut failed = 0;
        for (index, node, result) in results {
            match result {
                Ok(body) => {
                    self.health.record_success(index);
                    outcomes.push(NodeOutcome::Success {
                        node: node.clone(),
                        body,
                    });
                }
                Err(error) => {
                    failed += 1;
                    let summary = describe(&error);
                    warn!("Node {} failed {}: {}", node.id, endpoint, summary);
                    self.health.record_failure(index, &summary);
                    outcomes.push(NodeOutcome::Failure {
                        node: node.clone(),
                        error,
                    });
                }
            }
        }

        if failed == 0 {
            debug!("{} succeeded on all {} nodes", endpoint, outcomes.len());
        } else {
            info!(
                "{} completed with {}/{} nodes failing",
                endpoint,
                failed,
                outcomes.len()
            );
        }

        outcomes
    }
}

fn local_failure(error: Error) -> NodeFailure {
    NodeFailure::Local {
        reason: error.to_string(),
    }
}

fn transport_failure(error: TransportError) -> NodeFailure {
    NodeFailure::Transport {
        reason: error.to_string(),
    }
}

fn describe(failure: &NodeFailure) -> String {
    match failure {
        NodeFailure::Transport { reason } | NodeFailure::Local { reason } => reason.clone(),
        NodeFailure::Application { status, .. } => format!("HTTP {}", status),
    }
}
