//! Transport to a single storage node
//!
//! The coordinator only needs `send`; HTTP details (timeouts, TLS, headers)
//! live behind the [`Transport`] trait.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::TransportConfig;
use crate::error::{Error, Result};

/// HTTP method of a node request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// Status and decoded body of a node response
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain any response from a node
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Sends one request to one node
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        node_url: &str,
        endpoint: &str,
        token: &str,
        payload: Option<&Value>,
        method: Method,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        node_url: &str,
        endpoint: &str,
        token: &str,
        payload: Option<&Value>,
        method: Method,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let url = endpoint_url(node_url, endpoint)?;

        debug!("{:?} {}", method, url);

        let request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        let request = request.bearer_auth(token);
        let request = match payload {
            Some(body) => request.json(body),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let body = if text.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => Some(value),
                Err(e) if (200..300).contains(&status) => {
                    return Err(TransportError::Malformed(format!(
                        "expected JSON body: {}",
                        e
                    )));
                }
                // keep unstructured error pages visible to the caller
                Err(_) => Some(Value::String(text)),
            }
        };

        Ok(TransportResponse { status, body })
    }
}

/// Resolve `endpoint` below the node's base URL, keeping any path prefix
pub fn endpoint_url(node_url: &str, endpoint: &str) -> std::result::Result<Url, TransportError> {
    let bad = |e: url::ParseError| TransportError::Connect(format!("bad node url {}: {}", node_url, e));

    let mut base = Url::parse(node_url).map_err(bad)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(endpoint.trim_start_matches('/')).map_err(bad)
}

/// In-memory nodes for tests and offline runs
pub mod testing {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use super::{Method, Transport, TransportError, TransportResponse};

    /// One request as seen by [`FakeTransport`]
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub node_url: String,
        pub endpoint: String,
        pub token: String,
        pub payload: Option<Value>,
        pub method: Method,
    }

    #[derive(Default)]
    struct NodeState {
        records: Vec<Value>,
        schemas: Vec<Value>,
    }

    /// Transport backed by per-node in-memory collections.
    ///
    /// Understands the data and schema endpoints used by the client;
    /// individual nodes can be made to fail or answer slowly.
    #[derive(Default)]
    pub struct FakeTransport {
        nodes: Mutex<HashMap<String, NodeState>>,
        failures: Mutex<HashMap<String, TransportError>>,
        rejections: Mutex<HashMap<String, (u16, Value)>>,
        delays: Mutex<HashMap<String, Duration>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every request to `node_url` fails at the transport level
        pub fn fail_node(&self, node_url: &str, error: TransportError) {
            self.failures.lock().insert(node_url.to_string(), error);
        }

        /// Every request to `node_url` is answered with `status` and `body`
        pub fn reject_node(&self, node_url: &str, status: u16, body: Value) {
            self.rejections
                .lock()
                .insert(node_url.to_string(), (status, body));
        }

        /// Requests to `node_url` complete only after `delay`
        pub fn delay_node(&self, node_url: &str, delay: Duration) {
            self.delays.lock().insert(node_url.to_string(), delay);
        }

        /// Put a node back to normal operation
        pub fn heal_node(&self, node_url: &str) {
            self.failures.lock().remove(node_url);
            self.rejections.lock().remove(node_url);
            self.delays.lock().remove(node_url);
        }

        /// Records currently stored on `node_url`
        pub fn stored(&self, node_url: &str) -> Vec<Value> {
            self.nodes
                .lock()
                .get(node_url)
                .map(|n| n.records.clone())
                .unwrap_or_default()
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().clone()
        }

        fn handle(&self, node_url: &str, endpoint: &str, payload: Option<&Value>, method: Method) -> TransportResponse {
            let empty = Value::Null;
            let payload = payload.unwrap_or(&empty);
            let mut nodes = self.nodes.lock();
            let node = nodes.entry(node_url.to_string()).or_default();

            match (method, endpoint) {
                (Method::Post, "/api/v1/data/create") => {
                    let data = payload["data"].as_array().cloned().unwrap_or_default();
                    let created: Vec<Value> = data.iter().map(|r| r["_id"].clone()).collect();
                    node.records.extend(data);
                    ok(json!({"data": {"created": created, "errors": []}}))
                }
                (Method::Post, "/api/v1/data/read") => {
                    let filter = &payload["filter"];
                    let data: Vec<Value> = node
                        .records
                        .iter()
                        .filter(|r| matches_filter(r, filter))
                        .cloned()
                        .collect();
                    ok(json!({ "data": data }))
                }
                (Method::Post, "/api/v1/data/update") => {
                    let filter = &payload["filter"];
                    let set = payload["update"]["$set"].as_object().cloned().unwrap_or_default();
                    let mut modified = 0;
                    for record in node.records.iter_mut().filter(|r| matches_filter(r, filter)) {
                        if let Some(map) = record.as_object_mut() {
                            for (k, v) in &set {
                                map.insert(k.clone(), v.clone());
                            }
                            modified += 1;
                        }
                    }
                    ok(json!({"data": {"matched": modified, "modified": modified}}))
                }
                (Method::Post, "/api/v1/data/delete") => {
                    let filter = &payload["filter"];
                    let before = node.records.len();
                    node.records.retain(|r| !matches_filter(r, filter));
                    ok(json!({"data": {"deleted": before - node.records.len()}}))
                }
                (Method::Post, "/api/v1/data/flush") => {
                    let deleted = node.records.len();
                    node.records.clear();
                    ok(json!({"data": {"deleted": deleted}}))
                }
                (Method::Get, "/api/v1/schemas") => ok(json!({"data": node.schemas.clone()})),
                (Method::Post, "/api/v1/schemas") => {
                    node.schemas.push(payload.clone());
                    TransportResponse { status: 201, body: None }
                }
                (Method::Delete, "/api/v1/schemas") => {
                    let id = payload["id"].clone();
                    node.schemas.retain(|s| s["_id"] != id);
                    TransportResponse { status: 204, body: None }
                }
                _ => TransportResponse {
                    status: 404,
                    body: Some(json!({"errors": [format!("no route {}", endpoint)]})),
                },
            }
        }
    }

    fn ok(body: Value) -> TransportResponse {
        TransportResponse {
            status: 200,
            body: Some(body),
        }
    }

    /// Top-level equality match; an empty or missing filter matches everything
    fn matches_filter(record: &Value, filter: &Value) -> bool {
        match filter.as_object() {
            Some(map) => map.iter().all(|(k, v)| &record[k] == v),
            None => true,
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(
            &self,
            node_url: &str,
            endpoint: &str,
            token: &str,
            payload: Option<&Value>,
            method: Method,
        ) -> Result<TransportResponse, TransportError> {
            self.requests.lock().push(RecordedRequest {
                node_url: node_url.to_string(),
                endpoint: endpoint.to_string(),
                token: token.to_string(),
                payload: payload.cloned(),
                method,
            });

            let delay = self.delays.lock().get(node_url).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let failure = self.failures.lock().get(node_url).cloned();
            if let Some(error) = failure {
                return Err(error);
            }

            let rejection = self.rejections.lock().get(node_url).cloned();
            if let Some((status, body)) = rejection {
                return Ok(TransportResponse {
                    status,
                    body: Some(body),
                });
            }

            Ok(self.handle(node_url, endpoint, payload, method))
        }
    }
}
