//! Field allotment: one template record in, one record per node out
//!
//! A field wrapped as `{"%allot": value}` is secret-shared; node `i` receives
//! `{"%share": share_i}` in its place. Every other value is copied to every
//! node unchanged, and objects and arrays are walked with the same rules.

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::crypto::SecretSharer;
use crate::error::{Error, Result};

/// Marker key on template fields that must be secret-shared
pub const ALLOT_MARKER: &str = "%allot";

/// Tag key wrapping a share in node records
pub const SHARE_TAG: &str = "%share";

/// Record identity field
pub const ID_FIELD: &str = "_id";

/// One record materialized per node, in node order
pub type NodeShareSet = Vec<Value>;

/// How the walk treats one value
enum Visit<'a> {
    /// `{"%allot": inner}`
    Shareable(&'a Value),
    Object(&'a Map<String, Value>),
    Array(&'a [Value]),
    Plain(&'a Value),
}

fn classify(value: &Value) -> Visit<'_> {
    match value {
        Value::Object(map) => match map.get(ALLOT_MARKER) {
            Some(inner) if map.len() == 1 => Visit::Shareable(inner),
            _ => Visit::Object(map),
        },
        Value::Array(items) => Visit::Array(items),
        other => Visit::Plain(other),
    }
}

/// Make sure `record` carries an `_id`, generating a UUID v4 if absent.
///
/// Returns the identity. An existing `_id` must be a plain string.
pub fn ensure_id(record: &mut Value) -> Result<String> {
    let map = record
        .as_object_mut()
        .ok_or_else(|| Error::InvalidRecord("record must be a JSON object".to_string()))?;

    match map.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(other) => Err(Error::InvalidRecord(format!(
            "{} must be a string, got {}",
            ID_FIELD, other
        ))),
        None => {
            let id = Uuid::new_v4().to_string();
            map.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

/// Split one template record into one record per node
pub fn prepare_and_allot(engine: &dyn SecretSharer, mut record: Value) -> Result<NodeShareSet> {
    let id = ensure_id(&mut record)?;
    let node_count = engine.node_count()?;

    let variants = allot_value(engine, &record, node_count)?;
    debug!("Allotted record {} into {} node variants", id, variants.len());

    variants
        .into_iter()
        .map(|variant| engine.allot_template(variant))
        .collect()
}

/// Allot every record of a batch; all splitting happens before any dispatch
pub fn allot_batch(engine: &dyn SecretSharer, records: Vec<Value>) -> Result<Vec<NodeShareSet>> {
    records
        .into_iter()
        .map(|record| prepare_and_allot(engine, record))
        .collect()
}

/// Allot a value that is not a stored record (e.g. an update document).
///
/// No identity is assigned.
pub fn allot_fragment(engine: &dyn SecretSharer, fragment: &Value) -> Result<NodeShareSet> {
    let node_count = engine.node_count()?;
    allot_value(engine, fragment, node_count)?
        .into_iter()
        .map(|variant| engine.allot_template(variant))
        .collect()
}

/// Regroup per-record share sets into per-node record lists
pub fn per_node(sets: Vec<NodeShareSet>, node_count: usize) -> Vec<Vec<Value>> {
    let mut nodes: Vec<Vec<Value>> = (0..node_count)
        .map(|_| Vec::with_capacity(sets.len()))
        .collect();

    for set in sets {
        for (index, variant) in set.into_iter().enumerate() {
            if let Some(records) = nodes.get_mut(index) {
                records.push(variant);
            }
        }
    }

    nodes
}

fn allot_value(engine: &dyn SecretSharer, value: &Value, node_count: usize) -> Result<Vec<Value>> {
    match classify(value) {
        Visit::Shareable(inner) => {
            let shares = engine.split(inner)?;
            if shares.is_empty() {
                return Err(Error::InvalidShare("split produced no shares".to_string()));
            }

            let tagged = |share: Value| {
                let mut map = Map::with_capacity(1);
                map.insert(SHARE_TAG.to_string(), share);
                Value::Object(map)
            };

            if shares.len() == node_count {
                Ok(shares.into_iter().map(tagged).collect())
            } else {
                // single-ciphertext schemes: every node stores element 0
                let first = shares[0].clone();
                Ok((0..node_count).map(|_| tagged(first.clone())).collect())
            }
        }
        Visit::Object(map) => {
            let mut variants: Vec<Map<String, Value>> = (0..node_count)
                .map(|_| Map::with_capacity(map.len()))
                .collect();

            for (field, child) in map {
                if field == ID_FIELD && matches!(classify(child), Visit::Shareable(_)) {
                    return Err(Error::InvalidRecord(format!(
                        "{} cannot be secret-shared",
                        ID_FIELD
                    )));
                }

                let children = allot_value(engine, child, node_count)?;
                for (variant, child) in variants.iter_mut().zip(children) {
                    variant.insert(field.clone(), child);
                }
            }

            Ok(variants.into_iter().map(Value::Object).collect())
        }
        Visit::Array(items) => {
            let mut variants: Vec<Vec<Value>> = (0..node_count)
                .map(|_| Vec::with_capacity(items.len()))
                .collect();

            for item in items {
                let children = allot_value(engine, item, node_count)?;
                for (variant, child) in variants.iter_mut().zip(children) {
                    variant.push(child);
                }
            }

            Ok(variants.into_iter().map(Value::Array).collect())
        }
        Visit::Plain(leaf) => Ok(vec![leaf.clone(); node_count]),
    }
}
