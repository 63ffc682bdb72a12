use super::RequestsLoggingLevel;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub metrics_port: u16,
    /// Base URL peers use to reach this node.
    pub self_host: String,
    /// Upper bound on a single `POST /internal/blob` body.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            metrics_port: 9091,
            self_host: "http://127.0.0.1:3001".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}
