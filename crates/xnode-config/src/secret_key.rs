//! Secret-key payload: base64-wrapped JSON issued by the panel.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SecretKeyError {
    #[error("SECRET_KEY is not set")]
    Empty,

    #[error("SECRET_KEY contains invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("SECRET_KEY contains invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("SECRET_KEY payload missing required field: {0}")]
    MissingField(&'static str),
}

/// PEM material and the JWT verification key for one node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePayload {
    #[serde(default)]
    pub ca_cert_pem: String,
    #[serde(default)]
    pub jwt_public_key: String,
    #[serde(default)]
    pub node_cert_pem: String,
    #[serde(default)]
    pub node_key_pem: String,
}

impl NodePayload {
    fn validate(&self) -> Result<(), SecretKeyError> {
        if self.ca_cert_pem.is_empty() {
            return Err(SecretKeyError::MissingField("caCertPem"));
        }
        if self.jwt_public_key.is_empty() {
            return Err(SecretKeyError::MissingField("jwtPublicKey"));
        }
        if self.node_cert_pem.is_empty() {
            return Err(SecretKeyError::MissingField("nodeCertPem"));
        }
        if self.node_key_pem.is_empty() {
            return Err(SecretKeyError::MissingField("nodeKeyPem"));
        }
        Ok(())
    }
}

/// Decode and validate a base64(JSON) secret key.
pub fn parse_secret_key(encoded: &str) -> Result<NodePayload, SecretKeyError> {
    if encoded.is_empty() {
        return Err(SecretKeyError::Empty);
    }

    let decoded = BASE64.decode(encoded)?;
    let payload: NodePayload = serde_json::from_slice(&decoded)?;
    payload.validate()?;
    Ok(payload)
}
