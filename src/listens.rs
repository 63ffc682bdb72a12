//! Fire-and-forget listen reports for streamed tracks.
//!
//! A play that starts at the first byte of a track is reported to the
//! configured listen endpoint as a signed POST. Reporting never holds up
//! or fails the stream itself.

use crate::blob_store::ContentKey;
use crate::server::metrics;
use crate::signature::{Signer, SIGNATURE_QUERY_PARAM};
use axum::http::Method;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Listen services can be slow to answer.
pub const LISTEN_REPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Query flag that suppresses the report, e.g. for previews and notifiers.
pub const SKIP_PLAY_COUNT_PARAM: &str = "skip_play_count";

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("listen endpoint unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("listen endpoint answered with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to sign listen report: {0}")]
    Signature(String),
}

/// True without a Range header, or when the range starts at byte 0.
pub fn range_is_first_byte(range: Option<&str>) -> bool {
    let Some(range) = range.map(str::trim).filter(|r| !r.is_empty()) else {
        return true;
    };
    range
        .strip_prefix("bytes=")
        .is_some_and(|spec| spec.trim_start().starts_with("0-"))
}

/// Whether a stream request marks the start of a play worth reporting.
pub fn counts_as_listen(method: &Method, range: Option<&str>, skip_play_count: bool) -> bool {
    *method == Method::GET && !skip_play_count && range_is_first_byte(range)
}

#[derive(Debug, Serialize)]
struct ListenReport<'a> {
    cid: &'a str,
    host: &'a str,
    /// Milliseconds since the unix epoch.
    timestamp: i64,
}

pub struct ListenLogger {
    client: reqwest::Client,
    endpoint: String,
    self_host: String,
    signer: Option<Arc<Signer>>,
}

impl ListenLogger {
    pub fn new(
        endpoint: &str,
        self_host: &str,
        signer: Option<Arc<Signer>>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(LISTEN_REPORT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            self_host: self_host.to_string(),
            signer,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn listen_url(&self, key: &ContentKey) -> String {
        format!("{}/tracks/{}/listen", self.endpoint, key)
    }

    /// Posts one listen of `key`, passing the listener's address along when known.
    pub async fn report(
        &self,
        key: &ContentKey,
        forwarded_for: Option<&str>,
    ) -> Result<(), ListenError> {
        let url = self.listen_url(key);
        debug!("Logging listen of {} to {}", key, url);

        let body = ListenReport {
            cid: key.as_str(),
            host: &self.self_host,
            timestamp: Utc::now().timestamp_millis(),
        };
        let mut request = self.client.post(&url).json(&body);
        if let Some(signer) = &self.signer {
            let token = signer
                .sign_now(key.as_str(), "")
                .map_err(|e| ListenError::Signature(e.to_string()))?;
            request = request.query(&[(SIGNATURE_QUERY_PARAM, token)]);
        }
        if let Some(address) = forwarded_for {
            request = request.header(FORWARDED_FOR_HEADER, address);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ListenError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Reports in the background. The outcome is only logged.
    pub fn spawn_report(self: &Arc<Self>, key: ContentKey, forwarded_for: Option<String>) {
        let logger = self.clone();
        tokio::spawn(async move {
            match logger.report(&key, forwarded_for.as_deref()).await {
                Ok(()) => metrics::record_listen_report("logged"),
                Err(e) => {
                    warn!("Failed to log listen of {}: {}", key, e);
                    metrics::record_listen_report("failed");
                }
            }
        });
    }
}
