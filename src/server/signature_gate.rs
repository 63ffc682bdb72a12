//! Middleware admitting only requests signed by a registered node.

use super::metrics::record_signature_rejection;
use super::state::GuardedVerifier;
use crate::signature::{SignatureError, SIGNATURE_QUERY_PARAM};
use axum::{
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::debug;

const KEY_PATH_PARAM: &str = "key";
const UPLOAD_ID_PATH_PARAM: &str = "id";

/// Looks up a path parameter, or "" when the route has none by that name.
fn path_param(params: Option<&RawPathParams>, name: &str) -> String {
    params
        .and_then(|params| {
            params
                .iter()
                .find(|(param, _)| *param == name)
                .map(|(_, value)| value.to_string())
        })
        .unwrap_or_default()
}

pub async fn require_registered_signature(
    State(verifier): State<GuardedVerifier>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let params = RawPathParams::from_request_parts(&mut parts, &()).await.ok();
    let cid = path_param(params.as_ref(), KEY_PATH_PARAM);
    let upload_id = path_param(params.as_ref(), UPLOAD_ID_PATH_PARAM);

    let token = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(mut query)| query.remove(SIGNATURE_QUERY_PARAM));

    let result = match token {
        Some(token) => verifier.verify(&token, &cid, &upload_id),
        None => Err(SignatureError::Invalid("missing signature".to_string())),
    };

    match result {
        Ok(data) => {
            debug!("Accepted signature for {} (upload {:?})", data.cid, data.upload_id);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(e) => {
            debug!("Rejected signature on {}: {}", parts.uri.path(), e);
            record_signature_rejection(e.reason());
            e.into_response()
        }
    }
}
