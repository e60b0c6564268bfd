//! Node descriptors and per-node outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// One storage node: where it lives and who it is
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Stable identity, used as the token audience
    pub id: String,

    /// Base URL of the node API
    pub url: String,
}

impl NodeDescriptor {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        NodeDescriptor {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Why one leg of a fan-out failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeFailure {
    /// Node unreachable, timed out, or sent an unreadable response
    Transport { reason: String },

    /// Node answered with a non-2xx status
    Application { status: u16, body: Value },

    /// Request never left this process
    Local { reason: String },
}

impl NodeFailure {
    /// Lift into the crate error type, naming the node
    pub fn into_error(self, node: &NodeDescriptor) -> Error {
        match self {
            NodeFailure::Transport { reason } | NodeFailure::Local { reason } => {
                Error::NodeTransportFailure {
                    node: node.id.clone(),
                    reason,
                }
            }
            NodeFailure::Application { status, body } => Error::NodeApplicationError {
                node: node.id.clone(),
                status,
                body,
            },
        }
    }
}

/// Result of one fan-out leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    Success { node: NodeDescriptor, body: Value },
    Failure { node: NodeDescriptor, error: NodeFailure },
}

impl NodeOutcome {
    pub fn node(&self) -> &NodeDescriptor {
        match self {
            NodeOutcome::Success { node, .. } | NodeOutcome::Failure { node, .. } => node,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Success { .. })
    }

    /// Response body of a successful leg
    pub fn body(&self) -> Option<&Value> {
        match self {
            NodeOutcome::Success { body, .. } => Some(body),
            NodeOutcome::Failure { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&NodeFailure> {
        match self {
            NodeOutcome::Success { .. } => None,
            NodeOutcome::Failure { error, .. } => Some(error),
        }
    }

    /// Convert into a plain `Result`, failures lifted with [`NodeFailure::into_error`]
    pub fn into_result(self) -> Result<Value, Error> {
        match self {
            NodeOutcome::Success { body, .. } => Ok(body),
            NodeOutcome::Failure { node, error } => Err(error.into_error(&node)),
        }
    }
}
