//! Error types for sharevault

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sharevault
#[derive(Error, Debug)]
pub enum Error {
    // Secret sharing errors
    #[error("Secret sharing engine is not initialized")]
    NotInitialized,

    #[error("Secret sharing engine is already initialized")]
    AlreadyInitialized,

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Values shared for {0} cannot be recombined")]
    NotReversible(String),

    // Crypto errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    // Record errors
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // Node errors
    #[error("Node {node} unreachable: {reason}")]
    NodeTransportFailure { node: String, reason: String },

    #[error("Node {node} returned HTTP {status}: {body}")]
    NodeApplicationError {
        node: String,
        status: u16,
        body: serde_json::Value,
    },

    #[error("Unknown application: {0}")]
    UnknownApplication(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error was produced by a single node rather than locally
    pub fn is_node_error(&self) -> bool {
        matches!(
            self,
            Error::NodeTransportFailure { .. } | Error::NodeApplicationError { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::InvalidShare(format!("bad base64: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Config(format!("HTTP client: {}", e))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::InvalidConfig(format!("bad hex: {}", e))
    }
}
