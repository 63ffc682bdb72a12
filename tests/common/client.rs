//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all node endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use blobnet_server::server::FILES_FORM_FIELD;
use blobnet_server::signature::{Signer, SIGNATURE_QUERY_PARAM};
use reqwest::redirect::Policy;
use reqwest::Response;
use std::time::Duration;

/// HTTP test client
///
/// Redirects are never followed so tests can inspect `Location` headers.
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    signer: Option<Signer>,
}

#[allow(dead_code)]
impl TestClient {
    /// Creates a client that sends unsigned requests
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            signer: None,
        }
    }

    /// Creates a client that signs gated requests with `signer`
    pub fn signed(base_url: String, signer: Signer) -> Self {
        Self {
            signer: Some(signer),
            ..Self::new(base_url)
        }
    }

    fn signature(&self, cid: &str) -> Option<String> {
        self.signer
            .as_ref()
            .map(|signer| signer.sign_now(cid, "").expect("Failed to sign request"))
    }

    fn signed_url(&self, path: &str, cid: &str) -> String {
        match self.signature(cid) {
            Some(token) => format!(
                "{}{}?{}={}",
                self.base_url,
                path,
                SIGNATURE_QUERY_PARAM,
                urlencoding::encode(&token)
            ),
            None => format!("{}{}", self.base_url, path),
        }
    }

    // ========================================================================
    // Public Endpoints
    // ========================================================================

    /// GET /
    pub async fn get_home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }

    /// GET /blob/{key}, `query` is appended verbatim (e.g. "localOnly=true")
    pub async fn get_blob(&self, key: &str, query: &str) -> Response {
        let mut url = format!("{}/blob/{}", self.base_url, key);
        if !query.is_empty() {
            url = format!("{}?{}", url, query);
        }
        self.client
            .get(url)
            .send()
            .await
            .expect("Get blob request failed")
    }

    /// HEAD /blob/{key}
    pub async fn head_blob(&self, key: &str) -> Response {
        self.client
            .head(format!("{}/blob/{}", self.base_url, key))
            .send()
            .await
            .expect("Head blob request failed")
    }

    /// GET /blob/{key}/info
    pub async fn get_blob_info(&self, key: &str) -> Response {
        self.client
            .get(format!("{}/blob/{}/info", self.base_url, key))
            .send()
            .await
            .expect("Blob info request failed")
    }

    /// GET /blob/{key}/location
    pub async fn get_blob_location(&self, key: &str, query: &str) -> Response {
        let mut url = format!("{}/blob/{}/location", self.base_url, key);
        if !query.is_empty() {
            url = format!("{}?{}", url, query);
        }
        self.client
            .get(url)
            .send()
            .await
            .expect("Blob location request failed")
    }

    // ========================================================================
    // Signed Endpoints
    // ========================================================================

    /// GET /tracks/cidstream/{key}, signed when the client has a signer
    pub async fn stream_audio(&self, key: &str, range: Option<&str>) -> Response {
        let url = self.signed_url(&format!("/tracks/cidstream/{}", key), key);
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header("Range", range);
        }
        request.send().await.expect("Stream request failed")
    }

    /// GET /internal/blob/{key}
    pub async fn get_internal_blob(&self, key: &str) -> Response {
        let url = self.signed_url(&format!("/internal/blob/{}", key), key);
        self.client
            .get(url)
            .send()
            .await
            .expect("Internal blob request failed")
    }

    /// POST /internal/blob with one part per `(filename, bytes)`
    pub async fn upload_blobs(&self, parts: Vec<(String, Vec<u8>)>) -> Response {
        let mut form = reqwest::multipart::Form::new();
        for (filename, data) in parts {
            form = form.part(
                FILES_FORM_FIELD,
                reqwest::multipart::Part::bytes(data).file_name(filename),
            );
        }
        let url = self.signed_url("/internal/blob", "");
        self.client
            .post(url)
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    // ========================================================================
    // Record Inspection
    // ========================================================================

    /// GET /internal/analysis/{key}
    pub async fn get_analysis(&self, key: &str) -> Response {
        self.client
            .get(format!("{}/internal/analysis/{}", self.base_url, key))
            .send()
            .await
            .expect("Analysis request failed")
    }
}
