//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient, PNG_BLOB};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_get_blob() {
//!     let server = TestServer::spawn().await;
//!     let key = server.put_blob(PNG_BLOB).await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     let response = client.get_blob(key.as_str()).await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::ScriptedExtractor;
pub use server::TestServer;
