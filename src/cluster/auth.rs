//! Bearer tokens for node requests
//!
//! Each node gets its own token with the node id as audience, so a token
//! captured on one node cannot be replayed against another.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use zeroize::Zeroizing;

use crate::config::AuthConfig;
use crate::crypto::generate_secret_hex;
use crate::error::{Error, Result};

/// Produces the bearer token for a node
pub trait TokenIssuer: Send + Sync {
    fn token_for(&self, node_id: &str) -> Result<String>;
}

/// Same pre-shared token for every node
pub struct StaticTokenIssuer {
    token: String,
}

impl StaticTokenIssuer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenIssuer for StaticTokenIssuer {
    fn token_for(&self, _node_id: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Claims carried by an [`HmacTokenIssuer`] token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT issuer
pub struct HmacTokenIssuer {
    issuer: String,
    ttl_secs: i64,
    key: hmac::Key,
}

impl HmacTokenIssuer {
    pub fn new(issuer: impl Into<String>, signing_key: &[u8], ttl_secs: u64) -> Result<Self> {
        if signing_key.len() < 16 {
            return Err(Error::InvalidConfig(format!(
                "signing key must be at least 16 bytes, got {}",
                signing_key.len()
            )));
        }

        let ttl_secs = i64::try_from(ttl_secs)
            .map_err(|_| Error::InvalidConfig("token lifetime too large".to_string()))?;

        Ok(Self {
            issuer: issuer.into(),
            ttl_secs,
            key: hmac::Key::new(hmac::HMAC_SHA256, signing_key),
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(claims).map_err(|e| Error::Serialization(e.to_string()))?,
        );
        let signing_input = format!("{}.{}", header, payload);
        let tag = hmac::sign(&self.key, signing_input.as_bytes());

        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(tag.as_ref())))
    }

    /// Check signature, expiry and audience of a token this issuer produced
    pub fn verify(&self, token: &str, node_id: &str) -> Result<Claims> {
        let invalid = |reason: &str| Error::InvalidConfig(format!("invalid token: {}", reason));

        let (signing_input, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| invalid("malformed"))?;
        let (_, payload) = signing_input
            .split_once('.')
            .ok_or_else(|| invalid("malformed"))?;

        let signature = URL_SAFE_NO_PAD.decode(signature)?;
        hmac::verify(&self.key, signing_input.as_bytes(), &signature)
            .map_err(|_| invalid("bad signature"))?;

        let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
        if claims.aud != node_id {
            return Err(invalid("audience mismatch"));
        }
        if claims.exp < chrono::Utc::now().timestamp() {
            return Err(invalid("expired"));
        }

        Ok(claims)
    }
}

impl TokenIssuer for HmacTokenIssuer {
    fn token_for(&self, node_id: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        self.sign(&Claims {
            iss: self.issuer.clone(),
            aud: node_id.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        })
    }
}

/// Pick the issuer described by `config`.
///
/// A static token wins over a signing key. With neither, tokens are signed
/// with a key that lives only as long as this process.
pub fn issuer_from_config(config: &AuthConfig) -> Result<Arc<dyn TokenIssuer>> {
    if let Some(token) = &config.static_token {
        return Ok(Arc::new(StaticTokenIssuer::new(token.clone())));
    }

    let key_hex = match &config.signing_key_hex {
        Some(hex) => Zeroizing::new(hex.clone()),
        None => {
            warn!("No signing key configured, using an ephemeral one");
            Zeroizing::new(generate_secret_hex())
        }
    };
    let key = Zeroizing::new(hex::decode(key_hex.as_str())?);

    Ok(Arc::new(HmacTokenIssuer::new(
        config.issuer.clone(),
        &key,
        config.token_ttl_secs,
    )?))
}
