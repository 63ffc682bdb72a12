use anyhow::{Context, Result};
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::blob_routes::{blob_info, blob_location, serve_blob, stream_audio, AUDIO_STREAM_PATH};
use super::internal_routes::{get_analysis, get_internal_blob, post_internal_blob};
use super::metrics::metrics_handler;
use super::signature_gate::require_registered_signature;
use super::{log_requests, state::*};
use crate::health::HealthSnapshot;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
    pub self_host: String,
    pub health: HealthSnapshot,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: state.version.clone(),
        self_host: state.config.self_host.clone(),
        health: state.health.snapshot(),
    };
    Json(stats)
}

pub fn make_app(state: ServerState) -> Router {
    let signed_routes: Router = Router::new()
        .route(AUDIO_STREAM_PATH, get(stream_audio))
        .route("/internal/blob/{key}", get(get_internal_blob))
        .route(
            "/internal/blob",
            post(post_internal_blob).layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            require_registered_signature,
        ))
        .with_state(state.clone());

    let blob_routes: Router = Router::new()
        .route("/blob/{key}", get(serve_blob))
        .route("/blob/{key}/info", get(blob_info))
        .route("/blob/{key}/location", get(blob_location))
        .route("/internal/analysis/{key}", get(get_analysis))
        .with_state(state.clone());

    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    home_router
        .merge(blob_routes)
        .merge(signed_routes)
        .layer(middleware::from_fn_with_state(
            state.config.requests_logging_level,
            log_requests,
        ))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the node and its metrics endpoint until `shutdown` fires.
pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let metrics_shutdown = shutdown.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .await
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    metrics_server
        .await
        .context("Metrics server task failed")?
        .context("Metrics server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{ContentKey, FileBucket};
    use crate::health::NodeHealth;
    use crate::listens::ListenLogger;
    use crate::peers::{BlobLocator, HttpPeerClient, Replicator};
    use crate::placement::{Placement, RedirectCache};
    use crate::record_store::{Granularity, SqliteRecordStore};
    use crate::server::{RequestsLoggingLevel, ServerConfig};
    use crate::signature::{Signer, SignatureVerifier};
    use axum::body::{Body, Bytes};
    use axum::http::{header, Request, StatusCode};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tower::ServiceExt; // for `oneshot`

    const SELF_HOST: &str = "http://127.0.0.1:1";
    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01";
    const MP3_BYTES: &[u8] = b"ID3\x03\x00\x00\x00\x00\x00\x0fsome mp3 payload";

    struct Fixture {
        state: ServerState,
        signer: Signer,
        _tmp: TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let records: GuardedRecordStore =
            Arc::new(SqliteRecordStore::new(tmp.path().join("records.db")).unwrap());
        let bucket: GuardedBucket = Arc::new(FileBucket::new(tmp.path().join("blobs")).unwrap());
        let placement = Arc::new(Placement::new(vec![], SELF_HOST.to_string()));
        let cache = Arc::new(RedirectCache::new(Duration::from_secs(60)));
        let signer = Signer::new("node-a", "secret-a");
        let peers = Arc::new(
            HttpPeerClient::new(Duration::from_millis(200), Duration::from_secs(1), None).unwrap(),
        );
        let replicator = Arc::new(Replicator::new(bucket.clone(), peers.clone(), records.clone()));
        let locator = Arc::new(BlobLocator::new(placement, cache, peers));
        let health = Arc::new(NodeHealth::new(records.clone(), bucket.clone(), None));
        let verifier = Arc::new(SignatureVerifier::new([("node-a", "secret-a")]));

        let state = ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                self_host: SELF_HOST.to_string(),
                ..ServerConfig::default()
            },
            start_time: Instant::now(),
            version: "test".to_string(),
            bucket,
            records,
            locator,
            replicator,
            health,
            verifier,
            listens: None,
        };
        Fixture {
            state,
            signer,
            _tmp: tmp,
        }
    }

    async fn put(fx: &Fixture, data: &[u8]) -> ContentKey {
        let key = ContentKey::for_bytes(data);
        let chunks = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::copy_from_slice(
            data,
        ))]);
        fx.state.replicator.ingest(&key, chunks).await.unwrap();
        key
    }

    async fn get(app: Router, uri: &str) -> axum::response::Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    /// Listen endpoint that forwards the reported listener address.
    async fn listen_receiver() -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(
                "/tracks/{cid}/listen",
                post(
                    |State(tx): State<mpsc::UnboundedSender<String>>,
                     headers: axum::http::HeaderMap| async move {
                        let forwarded = headers
                            .get("x-forwarded-for")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        let _ = tx.send(forwarded);
                        StatusCode::OK
                    },
                ),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", address), rx)
    }

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 00:00:00");
        assert_eq!(
            format_uptime(Duration::from_secs(86_400 + 3600 * 2 + 60 * 3 + 4)),
            "1d 02:03:04"
        );
    }

    #[tokio::test]
    async fn home_reports_version_and_host() {
        let fx = fixture();
        let response = get(make_app(fx.state.clone()), "/").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["version"], "test");
        assert_eq!(json["self_host"], SELF_HOST);
        assert!(json["uptime"].as_str().unwrap().starts_with("0d"));
    }

    #[tokio::test]
    async fn signed_routes_reject_unsigned_requests() {
        let fx = fixture();
        let key = ContentKey::for_bytes(b"x");
        let app = make_app(fx.state.clone());

        for uri in [
            format!("/tracks/cidstream/{}", key),
            format!("/internal/blob/{}", key),
        ] {
            let response = get(app.clone(), &uri).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
            let json: serde_json::Value =
                serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert_eq!(json["error"], "invalid signature");
        }

        let request = Request::builder()
            .method("POST")
            .uri("/internal/blob")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signature_must_name_the_requested_key() {
        let fx = fixture();
        let key = put(&fx, b"some bytes").await;
        let other = ContentKey::for_bytes(b"other");
        let app = make_app(fx.state.clone());

        let wrong = fx.signer.sign_now(other.as_str(), "").unwrap();
        let response = get(app.clone(), &format!("/internal/blob/{}?signature={}", key, wrong)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"], "signature contains incorrect CID");

        let right = fx.signer.sign_now(key.as_str(), "").unwrap();
        let response = get(app, &format!("/internal/blob/{}?signature={}", key, right)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], b"some bytes");
    }

    #[tokio::test]
    async fn images_are_served_with_long_cache_and_disposition() {
        let fx = fixture();
        let key = put(&fx, PNG_BYTES).await;

        let response = get(
            make_app(fx.state.clone()),
            &format!("/blob/{}?filename=cover.png", key),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=2592000, immutable"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"cover.png\""
        );
        assert_eq!(&body_bytes(response).await[..], PNG_BYTES);
    }

    #[tokio::test]
    async fn audio_is_only_served_through_the_stream_path() {
        let fx = fixture();
        let key = put(&fx, MP3_BYTES).await;
        let app = make_app(fx.state.clone());

        let response = get(app.clone(), &format!("/blob/{}", key)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let signature = fx.signer.sign_now(key.as_str(), "").unwrap();
        let response = get(
            app.clone(),
            &format!("/tracks/cidstream/{}?signature={}", key, signature),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], MP3_BYTES);

        let request = Request::builder()
            .uri(format!("/tracks/cidstream/{}?signature={}", key, signature))
            .header(header::RANGE, "bytes=0-2")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            format!("bytes 0-2/{}", MP3_BYTES.len()).as_str()
        );
        assert_eq!(&body_bytes(response).await[..], b"ID3");

        let request = Request::builder()
            .uri(format!("/tracks/cidstream/{}?signature={}", key, signature))
            .header(header::RANGE, "bytes=9999-")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn head_is_answered_before_the_audio_check() {
        let fx = fixture();
        let key = put(&fx, MP3_BYTES).await;

        let request = Request::builder()
            .method("HEAD")
            .uri(format!("/blob/{}", key))
            .body(Body::empty())
            .unwrap();
        let response = make_app(fx.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            MP3_BYTES.len().to_string().as_str()
        );
    }

    #[tokio::test]
    async fn missing_blobs_are_not_found_without_peers() {
        let fx = fixture();
        let key = ContentKey::for_bytes(b"nowhere");
        let app = make_app(fx.state.clone());

        let response = get(app.clone(), &format!("/blob/{}?localOnly=true", key)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(app.clone(), &format!("/blob/{}", key)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(app, "/blob/not-a-key").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn info_checks_presence_before_database_health() {
        let fx = fixture();
        let app = make_app(fx.state.clone());

        let missing = ContentKey::for_bytes(b"missing");
        let response = get(app.clone(), &format!("/blob/{}/info", missing)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(&body_bytes(response).await[..], b"blob not found");

        let key = put(&fx, PNG_BYTES).await;
        let response = get(app.clone(), &format!("/blob/{}/info", key)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body_bytes(response).await[..], b"database connection issue");

        fx.state.health.refresh().await;
        let response = get(app, &format!("/blob/{}/info", key)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["size"], PNG_BYTES.len());
        assert_eq!(json["content_type"], "image/png");
    }

    #[tokio::test]
    async fn location_lists_preferred_hosts_and_local_sniff() {
        let fx = fixture();
        let key = put(&fx, PNG_BYTES).await;
        fx.state.health.refresh().await;

        let response = get(make_app(fx.state.clone()), &format!("/blob/{}/location", key)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["cid"], key.as_str());
        assert_eq!(json["preferred"], serde_json::json!([SELF_HOST]));
        assert_eq!(json["sniff"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn serving_is_accounted_in_the_background() {
        let fx = fixture();
        let key = put(&fx, PNG_BYTES).await;

        let response = get(make_app(fx.state.clone()), &format!("/blob/{}", key)).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_bytes(response).await;

        let mut count = 0;
        for _ in 0..50 {
            count = fx
                .state
                .records
                .serve_action_count("serve_image", Granularity::Day, Utc::now())
                .unwrap();
            if count > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn uploads_are_refused_when_disk_is_full() {
        let fx = fixture();
        let key = put(&fx, PNG_BYTES).await;
        let health = Arc::new(NodeHealth::new(
            fx.state.records.clone(),
            fx.state.bucket.clone(),
            Some(1),
        ));
        health.refresh().await;
        assert!(fx.state.bucket.attributes(&key).await.unwrap().is_some());

        let state = ServerState {
            health,
            ..fx.state.clone()
        };
        let signature = fx.signer.sign_now("", "").unwrap();
        let request = Request::builder()
            .method("POST")
            .uri(format!("/internal/blob?signature={}", signature))
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=X")
            .body(Body::from("--X--\r\n"))
            .unwrap();
        let response = make_app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            &body_bytes(response).await[..],
            b"disk is too full to accept new blobs"
        );
    }

    #[tokio::test]
    async fn only_first_byte_stream_requests_report_listens() {
        let (endpoint, mut listens) = listen_receiver().await;
        let mut fx = fixture();
        fx.state.listens = Some(Arc::new(
            ListenLogger::new(&endpoint, SELF_HOST, None).unwrap(),
        ));
        let key = put(&fx, MP3_BYTES).await;
        let signature = fx.signer.sign_now(key.as_str(), "").unwrap();
        let app = make_app(fx.state.clone());

        for (listener, range, extra) in [
            ("skipped", None, "&skip_play_count=true"),
            ("seeking", Some("bytes=5-"), ""),
            ("first", Some("bytes=0-2"), ""),
        ] {
            let mut request = Request::builder()
                .uri(format!(
                    "/tracks/cidstream/{}?signature={}{}",
                    key, signature, extra
                ))
                .header("x-forwarded-for", listener);
            if let Some(range) = range {
                request = request.header(header::RANGE, range);
            }
            let response = app
                .clone()
                .oneshot(request.body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert!(response.status().is_success(), "{}", listener);
            body_bytes(response).await;
        }

        let reported = tokio::time::timeout(Duration::from_secs(5), listens.recv())
            .await
            .expect("listen must be reported")
            .unwrap();
        assert_eq!(reported, "first");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(listens.try_recv().is_err());
    }

    #[tokio::test]
    async fn images_never_report_listens() {
        let (endpoint, mut listens) = listen_receiver().await;
        let mut fx = fixture();
        fx.state.listens = Some(Arc::new(
            ListenLogger::new(&endpoint, SELF_HOST, None).unwrap(),
        ));
        let key = put(&fx, PNG_BYTES).await;

        let response = get(make_app(fx.state.clone()), &format!("/blob/{}", key)).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_bytes(response).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(listens.try_recv().is_err());
    }
}
