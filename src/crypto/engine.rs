//! Secret-sharing engine over JSON values
//!
//! Share formats by operation:
//! - store, N >= 2: base64 of `[node index] || xor share`, the share sealed
//!   with the node's subkey when the key is a secret key
//! - store, N = 1: base64 of one AES-256-GCM ciphertext
//! - sum: one integer per node, additive modulo [`SUM_MODULUS`](super::SUM_MODULUS)
//! - match: one keyed digest, identical on every node

use std::collections::HashSet;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde_json::Value;
use tracing::debug;

use crate::allot::ALLOT_MARKER;
use crate::config::{KdfConfig, KeySpec};
use crate::error::{Error, Result};

use super::encryption::{open, seal};
use super::keys::{KeyKind, Operation, ShareKey};
use super::sharing::{additive_combine, additive_split, xor_combine, xor_split};

/// Associated data bound into every sealed share
const SHARE_AAD: &[u8] = b"sharevault-share-v1";

/// Split/recombine primitive used by allotment and reassembly
pub trait SecretSharer: Send + Sync {
    /// Number of nodes shares are produced for
    fn node_count(&self) -> Result<usize>;

    /// Produce the shares of one leaf value.
    ///
    /// Returns either one share per node or a single element that every
    /// node receives verbatim.
    fn split(&self, value: &Value) -> Result<Vec<Value>>;

    /// Rebuild a value from shares in node order
    fn recombine(&self, shares: &[Value]) -> Result<Value>;

    /// Final pass over one node's record once every marked leaf is split
    fn allot_template(&self, record: Value) -> Result<Value> {
        Ok(record)
    }
}

/// Engine holding exactly one [`ShareKey`], set once
#[derive(Debug, Default)]
pub struct ShareEngine {
    key: OnceLock<ShareKey>,
}

impl ShareEngine {
    /// Engine without key material; every split/recombine fails until
    /// [`initialize_in_place`](Self::initialize_in_place) succeeds
    pub fn uninitialized() -> Self {
        ShareEngine {
            key: OnceLock::new(),
        }
    }

    /// Build and initialize an engine in one step
    pub fn initialize(spec: &KeySpec, node_count: usize, kdf: &KdfConfig) -> Result<Self> {
        let engine = Self::uninitialized();
        engine.initialize_in_place(spec, node_count, kdf)?;
        Ok(engine)
    }

    /// Engine around an already built key
    pub fn with_key(key: ShareKey) -> Self {
        let engine = Self::uninitialized();
        // fresh OnceLock, cannot already be set
        let _ = engine.key.set(key);
        engine
    }

    /// Establish key material; fails if a key is already present
    pub fn initialize_in_place(
        &self,
        spec: &KeySpec,
        node_count: usize,
        kdf: &KdfConfig,
    ) -> Result<()> {
        if self.key.get().is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let key = ShareKey::from_spec(spec, node_count, kdf)?;
        debug!(
            "Initialized {:?} key for {} over {} nodes",
            key.kind(),
            key.operation(),
            node_count
        );

        self.key.set(key).map_err(|_| Error::AlreadyInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.key.get().is_some()
    }

    /// Active key
    pub fn key(&self) -> Result<&ShareKey> {
        self.key.get().ok_or(Error::NotInitialized)
    }

    fn split_store(&self, key: &ShareKey, value: &Value) -> Result<Vec<Value>> {
        let plaintext = serde_json::to_vec(value)?;
        let node_count = key.node_count();

        if node_count == 1 {
            let sealed = seal(&*key.store_key()?, &plaintext, SHARE_AAD)?;
            return Ok(vec![Value::String(B64.encode(sealed))]);
        }

        xor_split(&plaintext, node_count)?
            .into_iter()
            .enumerate()
            .map(|(index, part)| -> Result<Value> {
                let payload = match key.kind() {
                    KeyKind::Secret => seal(&*key.node_key(index)?, &part, SHARE_AAD)?,
                    KeyKind::Cluster => part,
                };
                let mut encoded = Vec::with_capacity(1 + payload.len());
                encoded.push(index as u8);
                encoded.extend_from_slice(&payload);
                Ok(Value::String(B64.encode(encoded)))
            })
            .collect()
    }

    fn recombine_store(&self, key: &ShareKey, shares: &[Value]) -> Result<Value> {
        if key.node_count() == 1 {
            let sealed = decode_share(&shares[0])?;
            let plaintext = open(&*key.store_key()?, &sealed, SHARE_AAD)?;
            return parse_plaintext(&plaintext);
        }

        let mut seen = HashSet::new();
        let mut parts = Vec::with_capacity(shares.len());
        for share in shares {
            let encoded = decode_share(share)?;
            let (&index, payload) = encoded
                .split_first()
                .ok_or_else(|| Error::InvalidShare("empty share".to_string()))?;
            let index = index as usize;

            if index >= key.node_count() {
                return Err(Error::InvalidShare(format!(
                    "share index {} outside cluster of {}",
                    index,
                    key.node_count()
                )));
            }
            if !seen.insert(index) {
                return Err(Error::InvalidShare(format!("duplicate share index {}", index)));
            }

            let part = match key.kind() {
                KeyKind::Secret => open(&*key.node_key(index)?, payload, SHARE_AAD)?,
                KeyKind::Cluster => payload.to_vec(),
            };
            parts.push(part);
        }

        parse_plaintext(&xor_combine(&parts)?)
    }
}

impl SecretSharer for ShareEngine {
    fn node_count(&self) -> Result<usize> {
        Ok(self.key()?.node_count())
    }

    fn split(&self, value: &Value) -> Result<Vec<Value>> {
        let key = self.key()?;

        match key.operation() {
            Operation::Store => self.split_store(key, value),
            Operation::Sum => {
                let number = value.as_i64().ok_or_else(|| {
                    Error::UnsupportedValue(format!("sum keys only share integers, got {}", value))
                })?;
                Ok(additive_split(number, key.node_count())?
                    .into_iter()
                    .map(Value::from)
                    .collect())
            }
            Operation::Match => {
                let digest = key.match_digest(&serde_json::to_vec(value)?)?;
                Ok(vec![Value::String(B64.encode(digest))])
            }
        }
    }

    fn recombine(&self, shares: &[Value]) -> Result<Value> {
        let key = self.key()?;
        if shares.is_empty() {
            return Err(Error::InvalidShare("no shares to recombine".to_string()));
        }

        match key.operation() {
            Operation::Store => self.recombine_store(key, shares),
            Operation::Sum => {
                let parts = shares
                    .iter()
                    .map(|s| {
                        s.as_u64().ok_or_else(|| {
                            Error::InvalidShare(format!("additive share must be an integer, got {}", s))
                        })
                    })
                    .collect::<Result<Vec<u64>>>()?;
                Ok(Value::from(additive_combine(&parts)?))
            }
            Operation::Match => Err(Error::NotReversible(key.operation().to_string())),
        }
    }

    fn allot_template(&self, record: Value) -> Result<Value> {
        self.key()?;
        if contains_marker(&record) {
            return Err(Error::InvalidRecord(format!(
                "'{}' marker left unsplit",
                ALLOT_MARKER
            )));
        }
        Ok(record)
    }
}

fn decode_share(share: &Value) -> Result<Vec<u8>> {
    let text = share
        .as_str()
        .ok_or_else(|| Error::InvalidShare(format!("expected base64 string, got {}", share)))?;
    Ok(B64.decode(text)?)
}

fn parse_plaintext(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidShare(format!("recombined value is not JSON: {}", e)))
}

fn contains_marker(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(ALLOT_MARKER) || map.values().any(contains_marker)
        }
        Value::Array(items) => items.iter().any(contains_marker),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use serde_json::json;

    fn engine(operation: Operation, nodes: usize) -> ShareEngine {
        ShareEngine::with_key(ShareKey::cluster(operation, nodes).unwrap())
    }

    fn secret_engine(nodes: usize) -> ShareEngine {
        ShareEngine::with_key(ShareKey::secret(Operation::Store, nodes, [9u8; KEY_SIZE]).unwrap())
    }

    #[test]
    fn test_uninitialized_engine() {
        let engine = ShareEngine::uninitialized();
        assert!(!engine.is_initialized());
        assert!(matches!(engine.split(&json!("x")), Err(Error::NotInitialized)));
        assert!(matches!(
            engine.recombine(&[json!("x")]),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(engine.node_count(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_initialize_once() {
        let engine = ShareEngine::uninitialized();
        let spec = KeySpec::default();
        engine
            .initialize_in_place(&spec, 3, &KdfConfig::default())
            .unwrap();
        assert_eq!(engine.node_count().unwrap(), 3);

        let again = engine.initialize_in_place(&spec, 2, &KdfConfig::default());
        assert!(matches!(again, Err(Error::AlreadyInitialized)));
        assert_eq!(engine.node_count().unwrap(), 3);
    }

    #[test]
    fn test_unsupported_key_type() {
        let spec = KeySpec {
            kind: "threshold".to_string(),
            ..KeySpec::default()
        };
        let result = ShareEngine::initialize(&spec, 3, &KdfConfig::default());
        assert!(matches!(result, Err(Error::UnsupportedKeyType(_))));
    }

    #[test]
    fn test_store_roundtrip_multi_node() {
        let engine = engine(Operation::Store, 3);
        let value = json!({"street": "1 Main St", "zip": 12345, "tags": ["a", "b"]});

        let shares = engine.split(&value).unwrap();
        assert_eq!(shares.len(), 3);
        assert_eq!(engine.recombine(&shares).unwrap(), value);
    }

    #[test]
    fn test_store_shares_distinct_and_opaque() {
        let engine = engine(Operation::Store, 3);
        let shares = engine.split(&json!("a@b.com")).unwrap();

        assert_ne!(shares[0], shares[1]);
        assert_ne!(shares[1], shares[2]);
        assert_ne!(shares[0], shares[2]);
        for share in &shares {
            assert_ne!(share, &json!("a@b.com"));
            assert!(!share.as_str().unwrap().contains("a@b.com"));
        }
    }

    #[test]
    fn test_store_single_node_yields_one_share() {
        let engine = engine(Operation::Store, 1);
        let shares = engine.split(&json!("hello")).unwrap();

        assert_eq!(shares.len(), 1);
        assert_ne!(shares[0], json!("hello"));
        assert_eq!(engine.recombine(&shares).unwrap(), json!("hello"));
    }

    #[test]
    fn test_store_order_independent() {
        let engine = engine(Operation::Store, 3);
        let mut shares = engine.split(&json!("order")).unwrap();
        shares.reverse();
        assert_eq!(engine.recombine(&shares).unwrap(), json!("order"));
    }

    #[test]
    fn test_store_duplicate_share_rejected() {
        let engine = engine(Operation::Store, 3);
        let shares = engine.split(&json!("dup")).unwrap();
        let result = engine.recombine(&[shares[0].clone(), shares[0].clone(), shares[1].clone()]);
        assert!(matches!(result, Err(Error::InvalidShare(_))));
    }

    #[test]
    fn test_secret_key_reproducible_across_engines() {
        let writer = secret_engine(3);
        let reader = secret_engine(3);

        let shares = writer.split(&json!("persisted")).unwrap();
        assert_eq!(reader.recombine(&shares).unwrap(), json!("persisted"));
    }

    #[test]
    fn test_secret_key_single_node_roundtrip() {
        let writer = secret_engine(1);
        let reader = secret_engine(1);

        let shares = writer.split(&json!({"pin": 1234})).unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(reader.recombine(&shares).unwrap(), json!({"pin": 1234}));

        // the single-node ciphertext is keyed by the secret, not the process
        let other =
            ShareEngine::with_key(ShareKey::secret(Operation::Store, 1, [1u8; KEY_SIZE]).unwrap());
        assert!(other.recombine(&shares).is_err());
    }

    #[test]
    fn test_secret_key_rejects_foreign_shares() {
        let ours = secret_engine(2);
        let theirs =
            ShareEngine::with_key(ShareKey::secret(Operation::Store, 2, [1u8; KEY_SIZE]).unwrap());

        let shares = theirs.split(&json!("x")).unwrap();
        assert!(ours.recombine(&shares).is_err());
    }

    #[test]
    fn test_sum_roundtrip() {
        let engine = engine(Operation::Sum, 3);
        let shares = engine.split(&json!(-1234)).unwrap();

        assert_eq!(shares.len(), 3);
        assert!(shares.iter().all(Value::is_u64));
        assert_eq!(engine.recombine(&shares).unwrap(), json!(-1234));
    }

    #[test]
    fn test_sum_rejects_non_integer() {
        let engine = engine(Operation::Sum, 2);
        assert!(matches!(
            engine.split(&json!("text")),
            Err(Error::UnsupportedValue(_))
        ));
        assert!(engine.split(&json!(1.5)).is_err());
    }

    #[test]
    fn test_match_single_deterministic_digest() {
        let engine = engine(Operation::Match, 3);
        let a = engine.split(&json!("a@b.com")).unwrap();
        let b = engine.split(&json!("a@b.com")).unwrap();
        let c = engine.split(&json!("c@d.com")).unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let copies = vec![a[0].clone(), a[0].clone(), a[0].clone()];
        assert!(matches!(
            engine.recombine(&copies),
            Err(Error::NotReversible(_))
        ));
    }

    #[test]
    fn test_recombine_empty() {
        let engine = engine(Operation::Store, 2);
        assert!(matches!(engine.recombine(&[]), Err(Error::InvalidShare(_))));
    }

    #[test]
    fn test_allot_template_detects_leftover_marker() {
        let engine = engine(Operation::Store, 2);
        let ok = json!({"a": {"%share": "xyz"}});
        assert!(engine.allot_template(ok).is_ok());

        let leftover = json!({"a": [{"%allot": 1}]});
        assert!(matches!(
            engine.allot_template(leftover),
            Err(Error::InvalidRecord(_))
        ));
    }
}
