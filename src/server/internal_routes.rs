//! Node-to-node routes used for replication and record inspection.

use super::state::{GuardedBucket, GuardedHealth, GuardedRecordStore, GuardedReplicator};
use crate::blob_store::ContentKey;
use crate::peers::ReplicationError;
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::TryStreamExt;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

/// Multipart field carrying uploaded blobs. Each part's filename is its content key.
pub const FILES_FORM_FIELD: &str = "files";

fn bad_request(error: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
}

pub async fn get_internal_blob(
    State(bucket): State<GuardedBucket>,
    Path(raw_key): Path<String>,
) -> Response {
    let key = match ContentKey::parse_request_param(&raw_key) {
        Ok(key) => key,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match bucket.open(&key).await {
        Ok(Some(blob)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, blob.attributes.content_type.clone()),
                (header::CONTENT_LENGTH, blob.attributes.size.to_string()),
            ],
            Body::from_stream(ReaderStream::new(blob.reader)),
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "blob not found").into_response(),
        Err(e) => {
            error!("Failed to open {} for a peer: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn post_internal_blob(
    State(health): State<GuardedHealth>,
    State(replicator): State<GuardedReplicator>,
    mut multipart: Multipart,
) -> Response {
    if !health.disk_has_space() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "disk is too full to accept new blobs",
        )
            .into_response();
    }

    let mut accepted = 0usize;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(e.body_text()),
        };
        if field.name() != Some(FILES_FORM_FIELD) {
            continue;
        }

        let claimed = field.file_name().unwrap_or_default().to_string();
        let key = match ContentKey::parse(&claimed) {
            Ok(key) => key,
            Err(e) => {
                warn!("Rejected upload with invalid key {:?}: {}", claimed, e);
                return bad_request(e.to_string());
            }
        };

        let stream = Box::pin(field.map_err(|e| std::io::Error::other(e.to_string())));
        match replicator.ingest(&key, stream).await {
            Ok(bytes) => {
                info!("Accepted {} from a peer ({} bytes)", key, bytes);
                accepted += 1;
            }
            Err(e @ ReplicationError::InvalidContentIdentity { .. }) => {
                warn!("Rejected upload: {}", e);
                return bad_request(e.to_string());
            }
            Err(e) => {
                error!("Failed to store upload {}: {}", key, e);
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        }
    }

    if accepted == 0 {
        warn!("Upload carried no {:?} parts", FILES_FORM_FIELD);
    }
    Json("ok").into_response()
}

pub async fn get_analysis(
    State(records): State<GuardedRecordStore>,
    Path(raw_key): Path<String>,
) -> Response {
    let key = match ContentKey::parse_request_param(&raw_key) {
        Ok(key) => key,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match records.get_analysis(key.as_str()) {
        Ok(Some(analysis)) => Json(analysis).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "analysis not found").into_response(),
        Err(e) => {
            error!("Failed to read analysis of {}: {:#}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
