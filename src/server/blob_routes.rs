//! Public blob serving and lookup routes.

use super::metrics;
use super::state::{GuardedRecordStore, ServerState};
use super::stream::{describe_blob, serve_reader, ByteRange};
use crate::blob_store::{ContentClass, ContentKey};
use crate::listens::{counts_as_listen, FORWARDED_FOR_HEADER, SKIP_PLAY_COUNT_PARAM};
use crate::peers::HostAttributes;
use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, warn};

pub const IMAGE_CACHE_CONTROL: &str = "public, max-age=2592000, immutable";
pub const AUDIO_STREAM_PATH: &str = "/tracks/cidstream/{key}";

const ACTION_STREAM_AUDIO: &str = "stream_audio";
const ACTION_SERVE_IMAGE: &str = "serve_image";
const ACTION_SERVE_BLOB: &str = "serve_blob";

/// Boolean query flag, accepting the usual `1`/`t`/`true` spellings.
pub fn parse_flag(value: Option<&String>) -> bool {
    matches!(
        value.map(|v| v.as_str()),
        Some("1" | "t" | "T" | "true" | "TRUE" | "True")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServePath {
    Blob,
    AudioStream,
}

fn text(status: StatusCode, body: &'static str) -> Response {
    (status, body).into_response()
}

fn parse_key(raw: &str) -> Result<ContentKey, Response> {
    ContentKey::parse_request_param(raw)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())
}

/// `attachment` disposition, falling back to RFC 5987 encoding for non-ASCII names.
pub fn content_disposition(filename: &str) -> String {
    let plain = filename
        .chars()
        .all(|c| c.is_ascii_graphic() || c == ' ')
        && !filename.contains('"')
        && !filename.contains('\\');
    if plain {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(filename)
        )
    }
}

/// Same path and query on `host`, flagged so the peer serves it regardless of its health.
pub fn redirect_target(host: &str, uri: &Uri) -> Option<String> {
    let mut url = Url::parse(host).ok()?;
    url.set_path(uri.path());
    url.set_query(uri.query());
    url.query_pairs_mut().append_pair("allow_unhealthy", "true");
    Some(url.to_string())
}

/// Records a served action without holding up the response.
fn spawn_serve_accounting(records: GuardedRecordStore, action: &'static str) {
    tokio::spawn(async move {
        let at = Utc::now();
        let result = tokio::task::spawn_blocking(move || records.record_serve_action(action, at)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to record serve action {}: {:#}", action, e),
            Err(e) => debug!("Serve accounting task failed: {}", e),
        }
    });
}

pub async fn serve_blob(
    State(state): State<ServerState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    serve(state, ServePath::Blob, method, uri, key, query, headers).await
}

pub async fn stream_audio(
    State(state): State<ServerState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    serve(state, ServePath::AudioStream, method, uri, key, query, headers).await
}

async fn serve(
    state: ServerState,
    path: ServePath,
    method: Method,
    uri: Uri,
    raw_key: String,
    query: HashMap<String, String>,
    request_headers: HeaderMap,
) -> Response {
    let key = match parse_key(&raw_key) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let attributes = match state.bucket.attributes(&key).await {
        Ok(attributes) => attributes,
        Err(e) => {
            error!("Failed to read attributes of {}: {}", key, e);
            return text(StatusCode::INTERNAL_SERVER_ERROR, "failed to read blob");
        }
    };

    let Some(attributes) = attributes else {
        if parse_flag(query.get("localOnly")) {
            metrics::record_blob_serve("unknown", "missing");
            return text(StatusCode::NOT_FOUND, "blob not found");
        }
        return match state.locator.find_holder(&key).await {
            Some(host) => match redirect_target(&host, &uri) {
                Some(target) => {
                    debug!("Redirecting {} to {}", key, host);
                    metrics::record_blob_serve("unknown", "redirect");
                    (StatusCode::FOUND, [(header::LOCATION, target)]).into_response()
                }
                None => {
                    warn!("Holder {} of {} is not a valid base URL", host, key);
                    text(StatusCode::NOT_FOUND, "blob not found")
                }
            },
            None => {
                metrics::record_blob_serve("unknown", "missing");
                text(StatusCode::NOT_FOUND, "blob not found")
            }
        };
    };

    let mut headers = HeaderMap::new();
    if let Some(filename) = query.get("filename").filter(|f| !f.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(&content_disposition(filename)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    if method == Method::HEAD {
        describe_blob(
            &mut headers,
            &attributes.content_type,
            attributes.size,
            &attributes.modified_at,
        );
        return (StatusCode::OK, headers).into_response();
    }

    let class = attributes.class();
    let action = match class {
        ContentClass::Audio if path != ServePath::AudioStream => {
            metrics::record_blob_serve(class.as_str(), "blocked");
            return text(
                StatusCode::UNAUTHORIZED,
                "audio streaming is only available through /tracks/cidstream/{key}",
            );
        }
        ContentClass::Audio => ACTION_STREAM_AUDIO,
        ContentClass::Image => {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(IMAGE_CACHE_CONTROL),
            );
            ACTION_SERVE_IMAGE
        }
        ContentClass::Other => ACTION_SERVE_BLOB,
    };

    let reader = match state.bucket.open(&key).await {
        Ok(Some(reader)) => reader,
        Ok(None) => return text(StatusCode::NOT_FOUND, "blob not found"),
        Err(e) => {
            error!("Failed to open {}: {}", key, e);
            return text(StatusCode::INTERNAL_SERVER_ERROR, "failed to read blob");
        }
    };

    let response = serve_reader(reader, ByteRange::from_headers(&request_headers), headers).await;
    metrics::record_blob_serve(class.as_str(), "local");
    spawn_serve_accounting(state.records.clone(), action);
    if action == ACTION_STREAM_AUDIO && response.status().is_success() {
        maybe_report_listen(&state, &method, &key, &query, &request_headers);
    }
    response
}

fn maybe_report_listen(
    state: &ServerState,
    method: &Method,
    key: &ContentKey,
    query: &HashMap<String, String>,
    request_headers: &HeaderMap,
) {
    let Some(listens) = &state.listens else {
        return;
    };
    let range = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    if !counts_as_listen(method, range, parse_flag(query.get(SKIP_PLAY_COUNT_PARAM))) {
        return;
    }
    let forwarded_for = request_headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    listens.spawn_report(key.clone(), forwarded_for);
}

pub async fn blob_info(State(state): State<ServerState>, Path(raw_key): Path<String>) -> Response {
    let key = match parse_key(&raw_key) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let attributes = match state.bucket.attributes(&key).await {
        Ok(Some(attributes)) => attributes,
        Ok(None) => return text(StatusCode::NOT_FOUND, "blob not found"),
        Err(e) => {
            error!("Failed to read attributes of {}: {}", key, e);
            return text(StatusCode::INTERNAL_SERVER_ERROR, "failed to read blob");
        }
    };

    // Peers redirect here, so only answer if this node can back the answer up
    if !state.health.is_database_healthy() {
        return text(StatusCode::INTERNAL_SERVER_ERROR, "database connection issue");
    }

    Json(attributes).into_response()
}

#[derive(Serialize)]
struct LocationResponse {
    cid: String,
    preferred: Vec<String>,
    sniff: Vec<HostAttributes>,
}

pub async fn blob_location(
    State(state): State<ServerState>,
    Path(raw_key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let key = match parse_key(&raw_key) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let preferred = state.locator.placement().rank(&key);
    let mut sniff = Vec::new();

    if parse_flag(query.get("sniff")) {
        sniff = state.locator.sniff(&key).await;

        if parse_flag(query.get("fix")) {
            if let Err(e) = state.locator.fix(&key, &sniff, &state.replicator).await {
                error!("Failed to repair {}: {}", key, e);
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        }
    }

    Json(LocationResponse {
        cid: key.to_string(),
        preferred,
        sniff,
    })
    .into_response()
}
