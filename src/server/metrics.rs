use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all blobnet metrics
const PREFIX: &str = "blobnet";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Serving Metrics
    pub static ref BLOB_SERVES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_blob_serves_total"), "Blob requests by content class and outcome"),
        &["class", "source"]
    ).expect("Failed to create blob_serves_total metric");

    pub static ref LISTEN_REPORTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_listen_reports_total"), "Listen reports by result"),
        &["result"]
    ).expect("Failed to create listen_reports_total metric");

    pub static ref SIGNATURE_REJECTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_signature_rejections_total"), "Rejected request signatures"),
        &["reason"]
    ).expect("Failed to create signature_rejections_total metric");

    // Peer Metrics
    pub static ref PEER_PROBES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_peer_probes_total"), "Blob possession probes sent to peers"),
        &["result"]
    ).expect("Failed to create peer_probes_total metric");

    pub static ref REDIRECT_CACHE_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_redirect_cache_events_total"), "Redirect cache lookups by result"),
        &["event"]
    ).expect("Failed to create redirect_cache_events_total metric");

    pub static ref REPLICATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_replications_total"), "Replicated blobs by result"),
        &["result"]
    ).expect("Failed to create replications_total metric");

    pub static ref REPLICATED_BYTES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_replicated_bytes_total"),
        "Bytes committed through replication"
    ).expect("Failed to create replicated_bytes_total metric");

    // Analysis Metrics
    pub static ref ANALYSIS_ENQUEUED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_analysis_enqueued_total"),
        "Analysis jobs handed to a worker"
    ).expect("Failed to create analysis_enqueued_total metric");

    pub static ref ANALYSIS_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_analysis_attempts_total"), "Analysis attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create analysis_attempts_total metric");

    pub static ref ANALYSIS_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_analysis_duration_seconds"),
            "Analysis attempt duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["outcome"]
    ).expect("Failed to create analysis_duration_seconds metric");

    pub static ref ANALYSIS_CYCLES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_analysis_cycles_total"), "Scheduler cycles by result"),
        &["result"]
    ).expect("Failed to create analysis_cycles_total metric");

    // Storage Metrics
    pub static ref STORAGE_USED_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_storage_used_bytes"),
        "Bytes used by the local bucket"
    ).expect("Failed to create storage_used_bytes metric");

    pub static ref STORAGE_BLOBS: Gauge = Gauge::new(
        format!("{PREFIX}_storage_blobs"),
        "Number of blobs in the local bucket"
    ).expect("Failed to create storage_blobs metric");

    pub static ref RECORD_DB_SIZE_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_record_db_size_bytes"),
        "Size of the record database in bytes"
    ).expect("Failed to create record_db_size_bytes metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BLOB_SERVES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LISTEN_REPORTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SIGNATURE_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PEER_PROBES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REDIRECT_CACHE_EVENTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REPLICATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REPLICATED_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ANALYSIS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ANALYSIS_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ANALYSIS_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ANALYSIS_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STORAGE_USED_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(STORAGE_BLOBS.clone()));
    let _ = REGISTRY.register(Box::new(RECORD_DB_SIZE_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapses a request path into a bounded label so keys never become label values.
pub fn categorize_endpoint(path: &str) -> &'static str {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(""), None, None) => "home",
        (Some("blob"), Some(_), None) => "blob",
        (Some("blob"), Some(_), Some("info")) => "blob_info",
        (Some("blob"), Some(_), Some("location")) => "blob_location",
        (Some("tracks"), Some("cidstream"), Some(_)) => "cidstream",
        (Some("internal"), Some("blob"), _) => "internal_blob",
        (Some("internal"), Some("analysis"), _) => "internal_analysis",
        _ => "other",
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

/// `source` is one of "local", "redirect" or "missing".
pub fn record_blob_serve(class: &str, source: &str) {
    BLOB_SERVES_TOTAL.with_label_values(&[class, source]).inc();
}

/// `result` is "logged" or "failed".
pub fn record_listen_report(result: &str) {
    LISTEN_REPORTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_signature_rejection(reason: &str) {
    SIGNATURE_REJECTIONS_TOTAL
        .with_label_values(&[reason])
        .inc();
}

pub fn record_peer_probe(found: bool) {
    let result = if found { "found" } else { "absent" };
    PEER_PROBES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_redirect_cache_event(event: &str) {
    REDIRECT_CACHE_EVENTS_TOTAL
        .with_label_values(&[event])
        .inc();
}

pub fn record_replication(result: &str, bytes: u64) {
    REPLICATIONS_TOTAL.with_label_values(&[result]).inc();
    REPLICATED_BYTES_TOTAL.inc_by(bytes as f64);
}

pub fn record_analysis_enqueued() {
    ANALYSIS_ENQUEUED_TOTAL.inc();
}

pub fn record_analysis_attempt(outcome: &str, duration: Duration) {
    ANALYSIS_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
    ANALYSIS_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

pub fn record_analysis_cycle(result: &str) {
    ANALYSIS_CYCLES_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_storage_gauges(used_bytes: u64, blob_count: u64, database_size_bytes: u64) {
    STORAGE_USED_BYTES.set(used_bytes as f64);
    STORAGE_BLOBS.set(blob_count as f64);
    RECORD_DB_SIZE_BYTES.set(database_size_bytes as f64);
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb) = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<f64>().ok())
                    {
                        PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                        return;
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
