//! Key material for the secret-sharing engine
//!
//! Two lifecycles:
//! - Cluster key: random, lives only as long as the engine that created it
//! - Secret key: supplied as hex or derived from a seed with Argon2id, so the
//!   same key can be rebuilt after a restart
//!
//! Per-purpose subkeys (node sealing keys, the match key) are expanded from
//! the key material with HKDF-SHA256.

use crate::config::{KdfConfig, KeySpec, MAX_NODES};
use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use ring::hkdf::{self, Salt, HKDF_SHA256};
use ring::hmac;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// HKDF salt shared by every subkey derivation
const HKDF_SALT: &[u8] = b"sharevault-hkdf-v1";

/// Argon2 salt for seed derivation; fixed so that a seed always yields the same key
const SEED_SALT: &[u8] = b"sharevault-seed-v1";

/// Lifecycle of the key held by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Cluster,
    Secret,
}

impl FromStr for KeyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cluster" => Ok(KeyKind::Cluster),
            "secret" => Ok(KeyKind::Secret),
            other => Err(Error::UnsupportedKeyType(format!("unknown key kind '{}'", other))),
        }
    }
}

/// Operation a key is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Values are stored and can be read back
    Store,
    /// Integer values whose shares nodes can add up
    Sum,
    /// Values nodes can compare for equality but never reveal
    Match,
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Ok(Operation::Store),
            "sum" => Ok(Operation::Sum),
            "match" => Ok(Operation::Match),
            other => Err(Error::UnsupportedKeyType(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Store => "store",
            Operation::Sum => "sum",
            Operation::Match => "match",
        };
        f.write_str(name)
    }
}

/// Key held by a [`ShareEngine`](super::ShareEngine)
pub struct ShareKey {
    kind: KeyKind,
    operation: Operation,
    node_count: usize,
    material: Zeroizing<[u8; KEY_SIZE]>,
}

impl ShareKey {
    /// Build the key described by `spec` for a cluster of `node_count` nodes
    pub fn from_spec(spec: &KeySpec, node_count: usize, kdf: &KdfConfig) -> Result<Self> {
        let kind: KeyKind = spec.kind.parse()?;
        let operation: Operation = spec.operation.parse()?;

        match kind {
            KeyKind::Cluster => {
                if spec.secret_hex.is_some() || spec.seed.is_some() {
                    return Err(Error::InvalidConfig(
                        "cluster keys are ephemeral; use kind 'secret' with secret_hex or seed"
                            .to_string(),
                    ));
                }
                Self::cluster(operation, node_count)
            }
            KeyKind::Secret => match (&spec.secret_hex, &spec.seed) {
                (Some(secret_hex), None) => {
                    let bytes = Zeroizing::new(hex::decode(secret_hex.trim())?);
                    if bytes.len() != KEY_SIZE {
                        return Err(Error::InvalidKeyLength {
                            expected: KEY_SIZE,
                            got: bytes.len(),
                        });
                    }
                    let mut material = [0u8; KEY_SIZE];
                    material.copy_from_slice(&bytes);
                    Self::secret(operation, node_count, material)
                }
                (None, Some(seed)) => Self::from_seed(operation, node_count, seed.as_bytes(), kdf),
                (Some(_), Some(_)) => Err(Error::InvalidConfig(
                    "secret_hex and seed are mutually exclusive".to_string(),
                )),
                (None, None) => Err(Error::InvalidConfig(
                    "secret keys require secret_hex or seed".to_string(),
                )),
            },
        }
    }

    /// Fresh ephemeral key
    pub fn cluster(operation: Operation, node_count: usize) -> Result<Self> {
        let mut material = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut material);
        Self::build(KeyKind::Cluster, operation, node_count, material)
    }

    /// Key from caller-supplied material
    pub fn secret(operation: Operation, node_count: usize, material: [u8; KEY_SIZE]) -> Result<Self> {
        Self::build(KeyKind::Secret, operation, node_count, material)
    }

    /// Key derived deterministically from `seed`
    pub fn from_seed(
        operation: Operation,
        node_count: usize,
        seed: &[u8],
        kdf: &KdfConfig,
    ) -> Result<Self> {
        if seed.is_empty() {
            return Err(Error::KeyDerivation("seed must not be empty".to_string()));
        }

        let params = Params::new(
            kdf.argon2_memory_kib,
            kdf.argon2_iterations,
            kdf.argon2_parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| Error::KeyDerivation(format!("Invalid Argon2 parameters: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut material = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(seed, SEED_SALT, &mut material)
            .map_err(|e| Error::KeyDerivation(format!("Argon2 derivation failed: {}", e)))?;

        Self::build(KeyKind::Secret, operation, node_count, material)
    }

    fn build(
        kind: KeyKind,
        operation: Operation,
        node_count: usize,
        material: [u8; KEY_SIZE],
    ) -> Result<Self> {
        if node_count == 0 || node_count > MAX_NODES {
            return Err(Error::InvalidConfig(format!(
                "node count must be between 1 and {}, got {}",
                MAX_NODES, node_count
            )));
        }

        if operation == Operation::Sum && node_count < 2 {
            return Err(Error::UnsupportedKeyType(
                "sum keys require at least two nodes".to_string(),
            ));
        }

        Ok(ShareKey {
            kind,
            operation,
            node_count,
            material: Zeroizing::new(material),
        })
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Derive a subkey for a specific purpose
    pub fn derive_subkey(&self, purpose: &[u8]) -> Result<[u8; KEY_SIZE]> {
        let salt = Salt::new(HKDF_SHA256, HKDF_SALT);
        let prk = salt.extract(&self.material[..]);

        let mut output = [0u8; KEY_SIZE];
        prk.expand(&[purpose], HkdfKeyType)
            .map_err(|_| Error::KeyDerivation("HKDF expansion failed".to_string()))?
            .fill(&mut output)
            .map_err(|_| Error::KeyDerivation("HKDF fill failed".to_string()))?;

        Ok(output)
    }

    /// Sealing key for the share held by node `index`
    pub fn node_key(&self, index: usize) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let purpose = format!("sharevault-node-v1:{}", index);
        Ok(Zeroizing::new(self.derive_subkey(purpose.as_bytes())?))
    }

    /// Sealing key for single-node storage
    pub fn store_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        Ok(Zeroizing::new(self.derive_subkey(b"sharevault-store-v1")?))
    }

    /// Keyed digest used by match keys
    pub fn match_digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        let subkey = Zeroizing::new(self.derive_subkey(b"sharevault-match-v1")?);
        let key = hmac::Key::new(hmac::HMAC_SHA256, &subkey[..]);
        Ok(hmac::sign(&key, data).as_ref().to_vec())
    }
}

impl fmt::Debug for ShareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareKey")
            .field("kind", &self.kind)
            .field("operation", &self.operation)
            .field("node_count", &self.node_count)
            .finish_non_exhaustive()
    }
}

/// Generate random key material suitable for `KeySpec::secret_hex`
pub fn generate_secret_hex() -> String {
    let mut material = Zeroizing::new([0u8; KEY_SIZE]);
    rand::thread_rng().fill_bytes(&mut material[..]);
    hex::encode(&material[..])
}

/// HKDF key type for ring
struct HkdfKeyType;

impl hkdf::KeyType for HkdfKeyType {
    fn len(&self) -> usize {
        KEY_SIZE
    }
}
