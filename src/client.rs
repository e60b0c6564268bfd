//! Client for one collection on one node cluster

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::allot::{allot_batch, allot_fragment, per_node};
use crate::cluster::{ClusterHealth, FanOut, Method, NodeOutcome};
use crate::crypto::SecretSharer;
use crate::error::{Error, Result};
use crate::unify::{reassemble, Reassembly};

const DATA_CREATE: &str = "/api/v1/data/create";
const DATA_READ: &str = "/api/v1/data/read";
const DATA_UPDATE: &str = "/api/v1/data/update";
const DATA_DELETE: &str = "/api/v1/data/delete";
const DATA_FLUSH: &str = "/api/v1/data/flush";
const SCHEMAS: &str = "/api/v1/schemas";

/// Secret-sharing client: records in, per-node outcomes out
pub struct VaultClient {
    engine: Arc<dyn SecretSharer>,
    fanout: FanOut,
    collection: String,
}

impl VaultClient {
    /// The engine must be initialized for exactly as many nodes as `fanout` has
    pub fn new(engine: Arc<dyn SecretSharer>, fanout: FanOut, collection: impl Into<String>) -> Result<Self> {
        let engine_nodes = engine.node_count()?;
        if engine_nodes != fanout.node_count() {
            return Err(Error::InvalidConfig(format!(
                "engine initialized for {} nodes but cluster has {}",
                engine_nodes,
                fanout.node_count()
            )));
        }

        let collection = collection.into();
        info!(
            "Vault client ready: collection {} on {} nodes",
            collection, engine_nodes
        );

        Ok(Self {
            engine,
            fanout,
            collection,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn engine(&self) -> &dyn SecretSharer {
        self.engine.as_ref()
    }

    pub fn health(&self) -> ClusterHealth {
        self.fanout.health()
    }

    /// Allot `records` and write node `i`'s variants to node `i`.
    ///
    /// Fails only if allotment fails, in which case nothing is sent.
    pub async fn create_records(&self, records: Vec<Value>) -> Result<Vec<NodeOutcome>> {
        let count = records.len();
        let sets = allot_batch(self.engine.as_ref(), records)?;
        let batches = per_node(sets, self.fanout.node_count());
        debug!("Creating {} records in {}", count, self.collection);

        Ok(self
            .fanout
            .fan_out(DATA_CREATE, Method::Post, |_, index| {
                let data = batches.get(index).cloned().unwrap_or_default();
                Ok(Some(json!({"schema": self.collection, "data": data})))
            })
            .await)
    }

    /// Read matching records from every node and reassemble them
    pub async fn read_records(&self, filter: Value) -> Reassembly {
        let payload = json!({"schema": self.collection, "filter": filter});
        let outcomes = self
            .fanout
            .fan_out(DATA_READ, Method::Post, |_, _| Ok(Some(payload.clone())))
            .await;

        reassemble(self.engine.as_ref(), &outcomes)
    }

    /// Apply `update` to matching records; marked values are shared per node
    pub async fn update_records(&self, update: Value, filter: Value) -> Result<Vec<NodeOutcome>> {
        let variants = allot_fragment(self.engine.as_ref(), &update)?;

        Ok(self
            .fanout
            .fan_out(DATA_UPDATE, Method::Post, |_, index| {
                let update = variants.get(index).cloned().ok_or_else(|| {
                    Error::Internal(format!("no update variant for node {}", index))
                })?;
                Ok(Some(json!({
                    "schema": self.collection,
                    "filter": filter,
                    "update": update,
                })))
            })
            .await)
    }

    pub async fn delete_records(&self, filter: Value) -> Vec<NodeOutcome> {
        let payload = json!({"schema": self.collection, "filter": filter});
        self.fanout
            .fan_out(DATA_DELETE, Method::Post, |_, _| Ok(Some(payload.clone())))
            .await
    }

    /// Remove every record of the collection
    pub async fn flush_collection(&self) -> Vec<NodeOutcome> {
        let payload = json!({"schema": self.collection});
        self.fanout
            .fan_out(DATA_FLUSH, Method::Post, |_, _| Ok(Some(payload.clone())))
            .await
    }

    pub async fn create_schema(&self, schema_id: &str, name: &str, schema: Value) -> Vec<NodeOutcome> {
        let payload = json!({"_id": schema_id, "name": name, "schema": schema});
        self.fanout
            .fan_out(SCHEMAS, Method::Post, |_, _| Ok(Some(payload.clone())))
            .await
    }

    pub async fn list_schemas(&self) -> Vec<NodeOutcome> {
        self.fanout.fan_out(SCHEMAS, Method::Get, |_, _| Ok(None)).await
    }

    pub async fn delete_schema(&self, schema_id: &str) -> Vec<NodeOutcome> {
        let payload = json!({ "id": schema_id });
        self.fanout
            .fan_out(SCHEMAS, Method::Delete, |_, _| Ok(Some(payload.clone())))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allot::SHARE_TAG;
    use crate::cluster::transport::testing::FakeTransport;
    use crate::cluster::{NodeDescriptor, StaticTokenIssuer, TransportError};
    use crate::crypto::{Operation, ShareEngine, ShareKey};

    fn nodes(n: usize) -> Vec<NodeDescriptor> {
        (1..=n)
            .map(|i| NodeDescriptor::new(format!("node-{}", i), format!("http://n{}.local", i)))
            .collect()
    }

    fn client(transport: &Arc<FakeTransport>, operation: Operation, n: usize) -> VaultClient {
        let engine = Arc::new(ShareEngine::with_key(ShareKey::cluster(operation, n).unwrap()));
        let fanout = FanOut::new(
            nodes(n),
            Arc::clone(transport) as Arc<dyn crate::cluster::Transport>,
            Arc::new(StaticTokenIssuer::new("tok")),
        )
        .unwrap();
        VaultClient::new(engine, fanout, "people").unwrap()
    }

    #[test]
    fn test_node_count_mismatch_rejected() {
        let engine = Arc::new(ShareEngine::with_key(
            ShareKey::cluster(Operation::Store, 2).unwrap(),
        ));
        let fanout = FanOut::new(
            nodes(3),
            Arc::new(FakeTransport::new()),
            Arc::new(StaticTokenIssuer::new("tok")),
        )
        .unwrap();
        assert!(matches!(
            VaultClient::new(engine, fanout, "c"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_uninitialized_engine_rejected() {
        let fanout = FanOut::new(
            nodes(1),
            Arc::new(FakeTransport::new()),
            Arc::new(StaticTokenIssuer::new("tok")),
        )
        .unwrap();
        let result = VaultClient::new(Arc::new(ShareEngine::uninitialized()), fanout, "c");
        assert!(matches!(result, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let transport = Arc::new(FakeTransport::new());
        let client = client(&transport, Operation::Store, 3);

        let outcomes = client
            .create_records(vec![json!({"_id": "p1", "name": "Ada", "ssn": {"%allot": "123"}})])
            .await
            .unwrap();
        assert!(outcomes.iter().all(NodeOutcome::is_success));

        let stored = transport.stored("http://n2.local");
        assert_eq!(stored.len(), 1);
        assert!(stored[0]["ssn"][SHARE_TAG].is_string());

        let read = client.read_records(json!({"_id": "p1"})).await;
        assert!(read.is_complete());
        assert_eq!(read.records, vec![json!({"_id": "p1", "name": "Ada", "ssn": "123"})]);
    }

    #[tokio::test]
    async fn test_allotment_error_sends_nothing() {
        let transport = Arc::new(FakeTransport::new());
        let client = client(&transport, Operation::Sum, 2);

        let result = client
            .create_records(vec![json!({"n": {"%allot": "not a number"}})])
            .await;
        assert!(matches!(result, Err(Error::UnsupportedValue(_))));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_update_shares_per_node() {
        let transport = Arc::new(FakeTransport::new());
        let client = client(&transport, Operation::Store, 2);

        client
            .create_records(vec![json!({"_id": "p1", "ssn": {"%allot": "old"}})])
            .await
            .unwrap();
        let outcomes = client
            .update_records(
                json!({"$set": {"ssn": {"%allot": "new"}}}),
                json!({"_id": "p1"}),
            )
            .await
            .unwrap();
        assert!(outcomes.iter().all(NodeOutcome::is_success));

        let first = transport.stored("http://n1.local");
        let second = transport.stored("http://n2.local");
        assert_ne!(first[0]["ssn"], second[0]["ssn"]);

        let read = client.read_records(json!({})).await;
        assert_eq!(read.records, vec![json!({"_id": "p1", "ssn": "new"})]);
    }

    #[tokio::test]
    async fn test_delete_and_flush() {
        let transport = Arc::new(FakeTransport::new());
        let client = client(&transport, Operation::Store, 2);

        client
            .create_records(vec![json!({"_id": "a"}), json!({"_id": "b"}), json!({"_id": "c"})])
            .await
            .unwrap();

        client.delete_records(json!({"_id": "a"})).await;
        assert_eq!(transport.stored("http://n1.local").len(), 2);

        let flushed = client.flush_collection().await;
        assert_eq!(flushed[0].body().unwrap()["data"]["deleted"], json!(2));
        assert!(transport.stored("http://n2.local").is_empty());
    }

    #[tokio::test]
    async fn test_schema_operations() {
        let transport = Arc::new(FakeTransport::new());
        let client = client(&transport, Operation::Store, 2);

        let created = client
            .create_schema("s-1", "people", json!({"type": "array"}))
            .await;
        assert!(created.iter().all(NodeOutcome::is_success));

        let listed = client.list_schemas().await;
        assert_eq!(listed[1].body().unwrap()["data"][0]["name"], json!("people"));

        client.delete_schema("s-1").await;
        let listed = client.list_schemas().await;
        assert_eq!(listed[0].body().unwrap()["data"], json!([]));
    }

    #[tokio::test]
    async fn test_read_with_failed_node() {
        let transport = Arc::new(FakeTransport::new());
        let client = client(&transport, Operation::Store, 3);
        client
            .create_records(vec![json!({"_id": "p1", "s": {"%allot": "x"}})])
            .await
            .unwrap();

        transport.fail_node("http://n3.local", TransportError::Connect("refused".to_string()));
        let read = client.read_records(json!({})).await;

        assert_eq!(read.node_failures.len(), 1);
        assert_eq!(read.node_failures[0].0, "node-3");
        // two of three XOR shares yield garbage, never the plaintext
        assert!(read.records.iter().all(|r| r["s"] != json!("x")));
    }
}
