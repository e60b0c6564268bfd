//! Configuration management for sharevault

use crate::cluster::NodeDescriptor;
use crate::error::{Error, Result};
use crate::registry::ClusterSpec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Default per-request transport timeout (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default lifetime of issued node tokens (seconds)
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60;

/// Upper bound on cluster size; share payloads carry the node index in one byte
pub const MAX_NODES: usize = 255;

/// Key configuration for the secret-sharing engine
///
/// `kind` and `operation` stay as strings so that an unrecognized value
/// surfaces as `UnsupportedKeyType` when the engine is initialized rather
/// than as a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySpec {
    /// "cluster" (ephemeral, per engine) or "secret" (supplied or seeded)
    #[serde(default = "default_key_kind")]
    pub kind: String,

    /// "store", "sum" or "match"
    #[serde(default = "default_operation")]
    pub operation: String,

    /// Hex-encoded 32-byte secret key
    #[serde(default)]
    pub secret_hex: Option<String>,

    /// Seed from which a secret key is derived
    #[serde(default)]
    pub seed: Option<String>,
}

fn default_key_kind() -> String {
    "cluster".to_string()
}

fn default_operation() -> String {
    "store".to_string()
}

impl Default for KeySpec {
    fn default() -> Self {
        KeySpec {
            kind: default_key_kind(),
            operation: default_operation(),
            secret_hex: None,
            seed: None,
        }
    }
}

/// Argon2id parameters used when deriving a secret key from a seed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfConfig {
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        KdfConfig {
            argon2_memory_kib: 19456, // 19 MiB
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

/// Node authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Issuer claim placed in every token
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Hex-encoded HMAC key used to sign node tokens
    #[serde(default)]
    pub signing_key_hex: Option<String>,

    /// Fixed bearer token, used instead of signing when set
    #[serde(default)]
    pub static_token: Option<String>,

    /// Token lifetime in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_issuer() -> String {
    "sharevault".to_string()
}

fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            issuer: default_issuer(),
            signing_key_hex: None,
            static_token: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Node list and collection for one external application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Storage nodes serving this application
    pub nodes: Vec<NodeDescriptor>,

    /// Collection (schema) identifier
    pub collection: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage nodes of the default cluster
    pub nodes: Vec<NodeDescriptor>,

    /// Collection (schema) identifier of the default cluster
    pub collection: String,

    /// Secret-sharing key configuration
    #[serde(default)]
    pub key: KeySpec,

    /// Seed key derivation parameters
    #[serde(default)]
    pub kdf: KdfConfig,

    /// Node authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// HTTP transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Per-application clusters, keyed by application identifier
    #[serde(default)]
    pub applications: HashMap<String, ApplicationConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sharevault")
            .join("config.json")
    }

    /// Load configuration from a file (YAML or JSON), with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let content = Self::substitute_env_vars(&content)?;

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Substitute environment variables in config content
    /// Supports ${VAR_NAME} syntax
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];

            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(full_match, &value);
            }
        }

        Ok(result)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(seed) = non_empty_env("SHAREVAULT_SECRET_SEED") {
            self.key.seed = Some(seed);
        }

        if let Some(secret) = non_empty_env("SHAREVAULT_SECRET_KEY") {
            self.key.secret_hex = Some(secret);
        }

        if let Some(signing) = non_empty_env("SHAREVAULT_SIGNING_KEY") {
            self.auth.signing_key_hex = Some(signing);
        }

        if let Some(collection) = non_empty_env("SHAREVAULT_COLLECTION") {
            self.collection = collection;
        }

        if let Some(timeout) = non_empty_env("SHAREVAULT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.transport.timeout_ms = ms;
            }
        }
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_cluster("default cluster", &self.nodes, &self.collection)?;

        for (app_id, app) in &self.applications {
            validate_cluster(&format!("application '{}'", app_id), &app.nodes, &app.collection)?;
        }

        if self.transport.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "transport.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.auth.token_ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "auth.token_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.key.secret_hex.is_some() && self.key.seed.is_some() {
            return Err(Error::InvalidConfig(
                "key.secret_hex and key.seed are mutually exclusive".to_string(),
            ));
        }

        Ok(())
    }

    /// Cluster description of the default node list
    pub fn cluster_spec(&self) -> ClusterSpec {
        ClusterSpec {
            nodes: self.nodes.clone(),
            collection: self.collection.clone(),
        }
    }

    /// Cluster descriptions of every configured application
    pub fn application_specs(&self) -> HashMap<String, ClusterSpec> {
        self.applications
            .iter()
            .map(|(app_id, app)| {
                (
                    app_id.clone(),
                    ClusterSpec {
                        nodes: app.nodes.clone(),
                        collection: app.collection.clone(),
                    },
                )
            })
            .collect()
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_cluster(label: &str, nodes: &[NodeDescriptor], collection: &str) -> Result<()> {
    if nodes.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{}: at least one node is required",
            label
        )));
    }

    if nodes.len() > MAX_NODES {
        return Err(Error::InvalidConfig(format!(
            "{}: maximum {} nodes supported",
            label, MAX_NODES
        )));
    }

    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "{}: duplicate node id '{}'",
                label, node.id
            )));
        }

        url::Url::parse(&node.url).map_err(|e| {
            Error::InvalidConfig(format!("{}: node '{}' has bad url: {}", label, node.id, e))
        })?;
    }

    if collection.trim().is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{}: collection is required",
            label
        )));
    }

    Ok(())
}
