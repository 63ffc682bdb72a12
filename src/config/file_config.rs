use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub bucket_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub self_host: Option<String>,

    // Cluster
    pub nodes: Option<Vec<NodeEntry>>,
    pub legacy_owner_host: Option<String>,

    // Storage, as byte-unit strings such as "500 GiB"
    pub storage_capacity: Option<String>,
    pub max_upload_size: Option<String>,

    // Peers
    pub redirect_cache_ttl_secs: Option<u64>,
    pub peer_probe_timeout_secs: Option<u64>,
    pub peer_transfer_timeout_secs: Option<u64>,

    /// Base URL that receives a signed POST for every track listen.
    pub listen_endpoint: Option<String>,

    // Feature configs
    pub analysis: Option<AnalysisConfig>,
}

/// A registered node: where to reach it and the key it signs with.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub host: String,
    pub signer_id: String,
    pub secret: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: Option<bool>,
    pub workers: Option<usize>,
    pub initial_delay_secs: Option<u64>,
    pub stale_busy_threshold_secs: Option<u64>,
    pub ffmpeg_path: Option<String>,
    /// Program and arguments; the WAV path is appended.
    pub bpm_command: Option<Vec<String>>,
    pub key_command: Option<Vec<String>>,
    pub scratch_dir: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/data"
            self_host = "http://node-a:3001"
            storage_capacity = "2 GiB"
            listen_endpoint = "http://identity:7000"

            [[nodes]]
            host = "http://node-a:3001"
            signer_id = "node-a"
            secret = "aaa"

            [[nodes]]
            host = "http://node-b:3001"
            signer_id = "node-b"
            secret = "bbb"

            [analysis]
            workers = 2
            bpm_command = ["aubio", "tempo", "-B", "2048"]
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/data"));
        assert_eq!(config.storage_capacity.as_deref(), Some("2 GiB"));
        assert_eq!(config.listen_endpoint.as_deref(), Some("http://identity:7000"));
        let nodes = config.nodes.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].signer_id, "node-b");
        let analysis = config.analysis.unwrap();
        assert_eq!(analysis.workers, Some(2));
        assert_eq!(analysis.bpm_command.unwrap().len(), 4);
        assert!(analysis.enabled.is_none());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/blobnet.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
