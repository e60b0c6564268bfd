//! Per-application clients
//!
//! The first request for an application looks up its cluster and builds a
//! [`VaultClient`]; later requests reuse it for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::client::VaultClient;
use crate::cluster::{issuer_from_config, FanOut, NodeDescriptor, TokenIssuer, Transport};
use crate::config::{Config, KdfConfig, KeySpec};
use crate::crypto::ShareEngine;
use crate::error::{Error, Result};

/// Nodes and collection serving one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub nodes: Vec<NodeDescriptor>,
    pub collection: String,
}

/// Resolves an application id to its cluster
#[async_trait]
pub trait ConfigLookup: Send + Sync {
    async fn lookup(&self, app_id: &str) -> Result<ClusterSpec>;
}

/// Lookup over a fixed table, usually the `applications` section of the config
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    clusters: HashMap<String, ClusterSpec>,
}

impl StaticLookup {
    pub fn new(clusters: HashMap<String, ClusterSpec>) -> Self {
        Self { clusters }
    }

    /// Configured applications, plus the default cluster under `default_app`
    pub fn from_config(config: &Config, default_app: &str) -> Self {
        let mut clusters = config.application_specs();
        clusters
            .entry(default_app.to_string())
            .or_insert_with(|| config.cluster_spec());
        Self { clusters }
    }
}

#[async_trait]
impl ConfigLookup for StaticLookup {
    async fn lookup(&self, app_id: &str) -> Result<ClusterSpec> {
        self.clusters
            .get(app_id)
            .cloned()
            .ok_or_else(|| Error::UnknownApplication(app_id.to_string()))
    }
}

/// Lazily built, never evicted clients keyed by application id
pub struct ClusterRegistry {
    lookup: Arc<dyn ConfigLookup>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenIssuer>,
    key: KeySpec,
    kdf: KdfConfig,
    clients: DashMap<String, Arc<VaultClient>>,
}

impl ClusterRegistry {
    pub fn new(
        lookup: Arc<dyn ConfigLookup>,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenIssuer>,
        key: KeySpec,
        kdf: KdfConfig,
    ) -> Self {
        Self {
            lookup,
            transport,
            tokens,
            key,
            kdf,
            clients: DashMap::new(),
        }
    }

    /// Registry over the applications in `config`
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>, default_app: &str) -> Result<Self> {
        Ok(Self::new(
            Arc::new(StaticLookup::from_config(config, default_app)),
            transport,
            issuer_from_config(&config.auth)?,
            config.key.clone(),
            config.kdf.clone(),
        ))
    }

    /// Client for `app_id`, built on first use
    pub async fn client_for(&self, app_id: &str) -> Result<Arc<VaultClient>> {
        if let Some(client) = self.clients.get(app_id) {
            return Ok(Arc::clone(client.value()));
        }

        let spec = self.lookup.lookup(app_id).await?;
        debug!(
            "Building client for {} ({} nodes)",
            app_id,
            spec.nodes.len()
        );

        let engine = ShareEngine::initialize(&self.key, spec.nodes.len(), &self.kdf)?;
        let fanout = FanOut::new(
            spec.nodes,
            Arc::clone(&self.transport),
            Arc::clone(&self.tokens),
        )?;
        let client = Arc::new(VaultClient::new(Arc::new(engine), fanout, spec.collection)?);

        // a concurrent caller may have won the race; keep the first client
        let entry = self
            .clients
            .entry(app_id.to_string())
            .or_insert_with(|| {
                info!("Registered client for application {}", app_id);
                client
            });
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::transport::testing::FakeTransport;
    use crate::cluster::StaticTokenIssuer;
    use serde_json::json;

    fn spec(n: usize, collection: &str) -> ClusterSpec {
        ClusterSpec {
            nodes: (1..=n)
                .map(|i| NodeDescriptor::new(format!("{}-{}", collection, i), format!("http://{}{}.local", collection, i)))
                .collect(),
            collection: collection.to_string(),
        }
    }

    fn registry(transport: Arc<FakeTransport>) -> ClusterRegistry {
        let mut clusters = HashMap::new();
        clusters.insert("billing".to_string(), spec(2, "invoices"));
        clusters.insert("crm".to_string(), spec(3, "contacts"));

        ClusterRegistry::new(
            Arc::new(StaticLookup::new(clusters)),
            transport,
            Arc::new(StaticTokenIssuer::new("tok")),
            KeySpec::default(),
            KdfConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_client_created_once() {
        let registry = registry(Arc::new(FakeTransport::new()));
        assert!(registry.is_empty());

        let first = registry.client_for("crm").await.unwrap();
        let second = registry.client_for("crm").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.collection(), "contacts");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_application() {
        let registry = registry(Arc::new(FakeTransport::new()));
        let result = registry.client_for("nope").await;
        assert!(matches!(result, Err(Error::UnknownApplication(app)) if app == "nope"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_applications_are_isolated() {
        let transport = Arc::new(FakeTransport::new());
        let registry = registry(Arc::clone(&transport));

        let billing = registry.client_for("billing").await.unwrap();
        billing
            .create_records(vec![json!({"_id": "i1", "amount": {"%allot": 10}})])
            .await
            .unwrap();

        assert_eq!(transport.stored("http://invoices1.local").len(), 1);
        assert!(transport.stored("http://contacts1.local").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_use() {
        let registry = Arc::new(registry(Arc::new(FakeTransport::new())));
        let (a, b) = tokio::join!(registry.client_for("billing"), registry.client_for("billing"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn test_static_lookup_from_config() {
        let mut config = Config::default();
        config.nodes = spec(2, "main").nodes;
        config.collection = "main".to_string();

        let lookup = StaticLookup::from_config(&config, "default");
        let found = lookup.lookup("default").await.unwrap();
        assert_eq!(found.collection, "main");
        assert_eq!(found.nodes.len(), 2);
    }
}
