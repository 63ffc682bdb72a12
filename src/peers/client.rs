//! HTTP client for talking to peer nodes.

use crate::blob_store::{BlobAttributes, ContentKey};
use crate::signature::{Signer, SIGNATURE_QUERY_PARAM};
use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer {host} does not have {key}")]
    NotFound { host: String, key: String },

    #[error("peer {host} answered with status {status}")]
    Status { host: String, status: u16 },

    #[error("peer {host} unreachable: {source}")]
    Unreachable {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to sign peer request: {0}")]
    Signature(String),
}

pub type ByteStream = BoxStream<'static, Result<Bytes, PeerError>>;

/// Operations this node performs against other nodes.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Asks `host` whether it holds `key`, returning its attributes when it does.
    async fn blob_info(&self, host: &str, key: &ContentKey) -> Result<BlobAttributes, PeerError>;

    /// Opens a raw byte stream of `key` from `host`.
    async fn fetch_blob(&self, host: &str, key: &ContentKey) -> Result<ByteStream, PeerError>;
}

pub struct HttpPeerClient {
    probe_client: reqwest::Client,
    transfer_client: reqwest::Client,
    signer: Option<Arc<Signer>>,
}

impl HttpPeerClient {
    /// `probe_timeout` bounds info requests, `transfer_timeout` bounds blob pulls.
    pub fn new(
        probe_timeout: Duration,
        transfer_timeout: Duration,
        signer: Option<Arc<Signer>>,
    ) -> Result<Self, reqwest::Error> {
        let probe_client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()?;
        let transfer_client = reqwest::Client::builder()
            .connect_timeout(probe_timeout)
            .timeout(transfer_timeout)
            .build()?;
        Ok(Self {
            probe_client,
            transfer_client,
            signer,
        })
    }

    fn base(host: &str) -> &str {
        host.trim_end_matches('/')
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn blob_info(&self, host: &str, key: &ContentKey) -> Result<BlobAttributes, PeerError> {
        let url = format!("{}/blob/{}/info", Self::base(host), key);
        let response = self
            .probe_client
            .get(&url)
            .send()
            .await
            .map_err(|source| PeerError::Unreachable {
                host: host.to_string(),
                source,
            })?;

        match response.status() {
            s if s.is_success() => {
                response
                    .json()
                    .await
                    .map_err(|source| PeerError::Unreachable {
                        host: host.to_string(),
                        source,
                    })
            }
            reqwest::StatusCode::NOT_FOUND => Err(PeerError::NotFound {
                host: host.to_string(),
                key: key.to_string(),
            }),
            s => Err(PeerError::Status {
                host: host.to_string(),
                status: s.as_u16(),
            }),
        }
    }

    async fn fetch_blob(&self, host: &str, key: &ContentKey) -> Result<ByteStream, PeerError> {
        let url = format!("{}/internal/blob/{}", Self::base(host), key);
        let mut request = self.transfer_client.get(&url);
        if let Some(signer) = &self.signer {
            let token = signer
                .sign_now(key.as_str(), "")
                .map_err(|e| PeerError::Signature(e.to_string()))?;
            request = request.query(&[(SIGNATURE_QUERY_PARAM, token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|source| PeerError::Unreachable {
                host: host.to_string(),
                source,
            })?;

        match response.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::NOT_FOUND => {
                return Err(PeerError::NotFound {
                    host: host.to_string(),
                    key: key.to_string(),
                })
            }
            s => {
                return Err(PeerError::Status {
                    host: host.to_string(),
                    status: s.as_u16(),
                })
            }
        }

        let host = host.to_string();
        Ok(response
            .bytes_stream()
            .map_err(move |source| PeerError::Unreachable {
                host: host.clone(),
                source,
            })
            .boxed())
    }
}
