//! Read reassembly
//!
//! Records read from every node are grouped by `_id`; within a group the
//! `%share` leaves are recombined and everything else is taken from the
//! first node that returned the record.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::allot::{ID_FIELD, SHARE_TAG};
use crate::cluster::{NodeFailure, NodeOutcome};
use crate::crypto::SecretSharer;
use crate::error::{Error, Result};

/// Records from all nodes that share an identity, in node order
#[derive(Debug, Clone, PartialEq)]
pub struct ShareGroup {
    pub id: Option<String>,
    pub records: Vec<Value>,
}

/// A group that could not be recombined
#[derive(Debug, Serialize)]
pub struct GroupFailure {
    pub id: Option<String>,
    #[serde(serialize_with = "display")]
    pub error: Error,
}

fn display<S: serde::Serializer>(error: &Error, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Outcome of a read across the cluster
#[derive(Debug, Default, Serialize)]
pub struct Reassembly {
    /// Reassembled records in group-discovery order
    pub records: Vec<Value>,
    pub failures: Vec<GroupFailure>,
    /// Nodes that contributed nothing, by node id
    pub node_failures: Vec<(String, NodeFailure)>,
}

impl Reassembly {
    /// Whether every node answered and every group recombined
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.node_failures.is_empty()
    }
}

/// Flatten the records returned by successful legs, node order preserved.
///
/// A body may be `{"data": [...]}` or a bare array.
pub fn collect_records(outcomes: &[NodeOutcome]) -> Vec<Value> {
    outcomes
        .iter()
        .filter_map(NodeOutcome::body)
        .flat_map(|body| {
            let records = match body {
                Value::Array(items) => items.as_slice(),
                other => other
                    .get("data")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
            };
            records.iter().cloned()
        })
        .collect()
}

/// Group records by `_id` with a linear scan over the groups found so far.
///
/// Quadratic in the number of distinct identities.
pub fn group_by_identity(records: Vec<Value>) -> Vec<ShareGroup> {
    let mut groups: Vec<ShareGroup> = Vec::new();

    for record in records {
        let id = record.get(ID_FIELD).and_then(Value::as_str).map(str::to_string);

        let existing = match &id {
            Some(id) => groups
                .iter_mut()
                .find(|g| g.id.as_deref() == Some(id.as_str())),
            None => None,
        };

        match existing {
            Some(group) => group.records.push(record),
            None => groups.push(ShareGroup {
                id,
                records: vec![record],
            }),
        }
    }

    groups
}

/// Recombine one group into a single record
pub fn unify_group(engine: &dyn SecretSharer, group: &ShareGroup) -> Result<Value> {
    let refs: Vec<&Value> = group.records.iter().collect();
    unify_value(engine, &refs)
}

/// Recombine the same position across several record variants
pub fn unify_value(engine: &dyn SecretSharer, variants: &[&Value]) -> Result<Value> {
    let first = *variants
        .first()
        .ok_or_else(|| Error::InvalidShare("nothing to unify".to_string()))?;

    match first {
        Value::Object(map) if map.len() == 1 && map.contains_key(SHARE_TAG) => {
            let shares = variants
                .iter()
                .map(|v| {
                    v.get(SHARE_TAG).cloned().ok_or_else(|| {
                        Error::InvalidShare("share missing from one node's record".to_string())
                    })
                })
                .collect::<Result<Vec<Value>>>()?;
            engine.recombine(&shares)
        }
        Value::Object(map) => {
            let mut unified = Map::with_capacity(map.len());
            for (field, value) in map {
                let column: Vec<&Value> = variants
                    .iter()
                    .map(|v| v.get(field).unwrap_or(value))
                    .collect();
                unified.insert(field.clone(), unify_value(engine, &column)?);
            }
            Ok(Value::Object(unified))
        }
        Value::Array(items) => {
            let mut unified = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let column: Vec<&Value> = variants
                    .iter()
                    .map(|v| v.get(index).unwrap_or(item))
                    .collect();
                unified.push(unify_value(engine, &column)?);
            }
            Ok(Value::Array(unified))
        }
        plain => Ok(plain.clone()),
    }
}

/// Turn the outcomes of a read fan-out into whole records
pub fn reassemble(engine: &dyn SecretSharer, outcomes: &[NodeOutcome]) -> Reassembly {
    let node_failures: Vec<(String, NodeFailure)> = outcomes
        .iter()
        .filter_map(|o| o.failure().map(|f| (o.node().id.clone(), f.clone())))
        .collect();

    let groups = group_by_identity(collect_records(outcomes));
    debug!(
        "Reassembling {} groups from {} nodes",
        groups.len(),
        outcomes.len()
    );

    let mut reassembly = Reassembly {
        node_failures,
        ..Default::default()
    };

    for group in &groups {
        match unify_group(engine, group) {
            Ok(record) => reassembly.records.push(record),
            Err(error) => {
                warn!("Could not reassemble record {:?}: {}", group.id, error);
                reassembly.failures.push(GroupFailure {
                    id: group.id.clone(),
                    error,
                });
            }
        }
    }

    reassembly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allot::prepare_and_allot;
    use crate::cluster::NodeDescriptor;
    use crate::crypto::{Operation, ShareEngine, ShareKey};
    use serde_json::json;

    fn engine(operation: Operation, nodes: usize) -> ShareEngine {
        ShareEngine::with_key(ShareKey::cluster(operation, nodes).unwrap())
    }

    fn success(i: usize, data: Vec<Value>) -> NodeOutcome {
        NodeOutcome::Success {
            node: NodeDescriptor::new(format!("node-{}", i), format!("http://n{}", i)),
            body: json!({ "data": data }),
        }
    }

    fn failure(i: usize) -> NodeOutcome {
        NodeOutcome::Failure {
            node: NodeDescriptor::new(format!("node-{}", i), format!("http://n{}", i)),
            error: NodeFailure::Transport {
                reason: "timed out".to_string(),
            },
        }
    }

    #[test]
    fn test_collect_skips_failed_nodes() {
        let outcomes = vec![
            success(1, vec![json!({"_id": "a"})]),
            failure(2),
            NodeOutcome::Success {
                node: NodeDescriptor::new("node-3", "http://n3"),
                body: json!([{"_id": "b"}]),
            },
        ];
        assert_eq!(
            collect_records(&outcomes),
            vec![json!({"_id": "a"}), json!({"_id": "b"})]
        );
    }

    #[test]
    fn test_grouping_discovery_order() {
        let records = vec![
            json!({"_id": "b", "n": 1}),
            json!({"_id": "a", "n": 1}),
            json!({"n": "anonymous"}),
            json!({"_id": "b", "n": 2}),
            json!({"_id": "a", "n": 2}),
            json!({"n": "anonymous"}),
        ];

        let groups = group_by_identity(records);
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0].id.as_deref(), Some("b"));
        assert_eq!(groups[0].records.len(), 2);
        assert_eq!(groups[1].id.as_deref(), Some("a"));
        assert!(groups[2].id.is_none());
        assert!(groups[3].id.is_none());
    }

    #[test]
    fn test_reassemble_roundtrip() {
        let engine = engine(Operation::Store, 3);
        let set = prepare_and_allot(
            &engine,
            json!({"_id": "r1", "message": "hi", "email": {"%allot": "a@b.com"}, "tags": [{"%allot": 7}, "x"]}),
        )
        .unwrap();

        let outcomes: Vec<NodeOutcome> = set
            .into_iter()
            .enumerate()
            .map(|(i, variant)| success(i, vec![variant]))
            .collect();

        let result = reassemble(&engine, &outcomes);
        assert!(result.is_complete());
        assert_eq!(
            result.records,
            vec![json!({"_id": "r1", "message": "hi", "email": "a@b.com", "tags": [7, "x"]})]
        );
    }

    #[test]
    fn test_failed_group_does_not_sink_others() {
        let engine = engine(Operation::Store, 2);
        let good = prepare_and_allot(&engine, json!({"_id": "good", "s": {"%allot": "ok"}})).unwrap();
        let bad = prepare_and_allot(&engine, json!({"_id": "bad", "s": {"%allot": "lost"}})).unwrap();

        // node 1 lost its share of "bad"
        let outcomes = vec![
            success(0, vec![good[0].clone(), bad[0].clone()]),
            success(1, vec![good[1].clone(), json!({"_id": "bad", "s": "plain"})]),
        ];

        let result = reassemble(&engine, &outcomes);
        assert_eq!(result.records, vec![json!({"_id": "good", "s": "ok"})]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].id.as_deref(), Some("bad"));
        assert!(!result.is_complete());
    }

    #[test]
    fn test_plain_fields_from_first_record() {
        let engine = engine(Operation::Store, 2);
        let group = ShareGroup {
            id: Some("r".to_string()),
            records: vec![json!({"_id": "r", "v": 1}), json!({"_id": "r", "v": 2})],
        };
        assert_eq!(unify_group(&engine, &group).unwrap(), json!({"_id": "r", "v": 1}));
    }

    #[test]
    fn test_node_failures_reported() {
        let engine = engine(Operation::Sum, 2);
        let result = reassemble(&engine, &[success(0, vec![]), failure(1)]);
        assert!(result.records.is_empty());
        assert_eq!(result.node_failures.len(), 1);
        assert_eq!(result.node_failures[0].0, "node-1");
    }

    #[test]
    fn test_reassembly_serializes() {
        let result = Reassembly {
            records: vec![json!({"_id": "a"})],
            failures: vec![GroupFailure {
                id: Some("b".to_string()),
                error: Error::InvalidShare("short".to_string()),
            }],
            node_failures: Vec::new(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["failures"][0]["error"], json!("Invalid share: short"));
    }
}
