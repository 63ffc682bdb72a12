//! Request signatures exchanged between registered nodes.
//!
//! A signature is an HS256 JWS carried in the `signature` query parameter.
//! The header `kid` names the signer, the claims bind the request to a
//! content key and an upload id, and the timestamp bounds its lifetime.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const SIGNATURE_QUERY_PARAM: &str = "signature";

/// Oldest signature accepted.
pub const SIGNATURE_MAX_AGE: Duration = Duration::from_secs(48 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    pub cid: String,
    pub upload_id: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature: {0}")]
    Invalid(String),

    #[error("signer not in list of registered nodes: {0}")]
    UnregisteredSigner(String),

    #[error("signature too old: {age_secs}s")]
    TooOld { age_secs: u64 },

    #[error("signature contains incorrect CID (url: {url}, signature: {signed})")]
    IncorrectCid { url: String, signed: String },

    #[error("signature contains incorrect upload ID (url: {url}, signature: {signed})")]
    IncorrectUploadId { url: String, signed: String },

    #[error("failed to sign request: {0}")]
    Signing(String),
}

impl SignatureError {
    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            SignatureError::Invalid(_) => "invalid signature",
            SignatureError::UnregisteredSigner(_) => "signer not in list of registered nodes",
            SignatureError::TooOld { .. } => "signature too old",
            SignatureError::IncorrectCid { .. } => "signature contains incorrect CID",
            SignatureError::IncorrectUploadId { .. } => "signature contains incorrect upload ID",
            SignatureError::Signing(_) => "signing failed",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            SignatureError::Invalid(msg) | SignatureError::Signing(msg) => msg.clone(),
            SignatureError::UnregisteredSigner(signer) => format!("signed by: {}", signer),
            SignatureError::TooOld { age_secs } => format!("{}s", age_secs),
            SignatureError::IncorrectCid { url, signed }
            | SignatureError::IncorrectUploadId { url, signed } => {
                format!("url: {}, signature {}", url, signed)
            }
        }
    }
}

#[derive(Serialize)]
struct SignatureErrorBody {
    error: &'static str,
    detail: String,
}

impl IntoResponse for SignatureError {
    fn into_response(self) -> Response {
        let body = SignatureErrorBody {
            error: self.reason(),
            detail: self.detail(),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    // Freshness is judged from the signed timestamp, not a JWT exp claim
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    validation
}

/// Signs requests on behalf of this node.
pub struct Signer {
    signer_id: String,
    key: EncodingKey,
}

impl Signer {
    pub fn new(signer_id: &str, secret: &str) -> Self {
        Self {
            signer_id: signer_id.to_string(),
            key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn signer_id(&self) -> &str {
        &self.signer_id
    }

    pub fn sign(&self, data: &SignatureData) -> Result<String, SignatureError> {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.signer_id.clone());
        jsonwebtoken::encode(&header, data, &self.key)
            .map_err(|e| SignatureError::Signing(e.to_string()))
    }

    /// Signs `cid` and `upload_id` with the current time.
    pub fn sign_now(&self, cid: &str, upload_id: &str) -> Result<String, SignatureError> {
        self.sign(&SignatureData {
            cid: cid.to_string(),
            upload_id: upload_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        })
    }
}

/// Checks signatures against the registered signer list.
pub struct SignatureVerifier {
    signers: HashMap<String, DecodingKey>,
}

impl SignatureVerifier {
    /// `signers` are `(signer_id, secret)` pairs. Ids match case-insensitively.
    pub fn new<'a, I>(signers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let signers = signers
            .into_iter()
            .map(|(id, secret)| {
                (
                    id.to_lowercase(),
                    DecodingKey::from_secret(secret.as_bytes()),
                )
            })
            .collect();
        Self { signers }
    }

    /// Verifies `token` was issued by a registered signer for exactly this
    /// content key and upload id.
    pub fn verify(
        &self,
        token: &str,
        expected_cid: &str,
        expected_upload_id: &str,
    ) -> Result<SignatureData, SignatureError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|e| SignatureError::Invalid(e.to_string()))?;
        let signer = header
            .kid
            .ok_or_else(|| SignatureError::Invalid("missing signer id".to_string()))?;
        let key = self
            .signers
            .get(&signer.to_lowercase())
            .ok_or_else(|| SignatureError::UnregisteredSigner(signer.clone()))?;

        let data = jsonwebtoken::decode::<SignatureData>(token, key, &validation())
            .map_err(|e| SignatureError::Invalid(e.to_string()))?
            .claims;

        let age_ms = Utc::now().timestamp_millis() - data.timestamp;
        if age_ms > 0 && Duration::from_millis(age_ms as u64) > SIGNATURE_MAX_AGE {
            return Err(SignatureError::TooOld {
                age_secs: age_ms as u64 / 1000,
            });
        }

        if data.cid != expected_cid {
            return Err(SignatureError::IncorrectCid {
                url: expected_cid.to_string(),
                signed: data.cid,
            });
        }
        if data.upload_id != expected_upload_id {
            return Err(SignatureError::IncorrectUploadId {
                url: expected_upload_id.to_string(),
                signed: data.upload_id,
            });
        }
        Ok(data)
    }
}
