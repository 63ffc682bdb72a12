mod file_config;

pub use file_config::{AnalysisConfig, FileConfig, NodeEntry};

use crate::audio_analysis::{CommandFeatureExtractor, DEFAULT_ANALYSIS_WORKERS};
use crate::server::RequestsLoggingLevel;
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use reqwest::Url;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_SIZE: &str = "1 GiB";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub bucket_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub self_host: Option<String>,
    pub storage_capacity: Option<String>,
    pub max_upload_size: Option<String>,
    pub analysis_workers: Option<usize>,
    pub disable_analysis: bool,
    pub ffmpeg_path: Option<PathBuf>,
    pub listen_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub bucket_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub self_host: String,

    // Cluster
    pub nodes: Vec<NodeEntry>,
    pub legacy_owner_host: Option<String>,

    // Storage
    pub storage_capacity: Option<u64>,
    pub max_upload_bytes: u64,

    // Peers
    pub redirect_cache_ttl: Duration,
    pub peer_probe_timeout: Duration,
    pub peer_transfer_timeout: Duration,

    // Listens
    pub listen_endpoint: Option<String>,

    pub analysis: AnalysisSettings,
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub enabled: bool,
    pub workers: usize,
    pub initial_delay: Duration,
    pub stale_busy_threshold: Duration,
    pub ffmpeg_path: PathBuf,
    pub bpm_command: Vec<String>,
    pub key_command: Vec<String>,
    pub scratch_dir: PathBuf,
}

fn normalize_host(host: &str) -> Result<String> {
    let trimmed = host.trim().trim_end_matches('/');
    Url::parse(trimmed).with_context(|| format!("Invalid host URL: {:?}", host))?;
    Ok(trimmed.to_string())
}

fn parse_byte_size(field: &str, value: &str) -> Result<u64> {
    byte_unit::Byte::parse_str(value, true)
        .map(|bytes| bytes.as_u64())
        .map_err(|e| anyhow!("Invalid {} {:?}: {}", field, value, e))
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let bucket_path = file
            .bucket_path
            .map(PathBuf::from)
            .or_else(|| cli.bucket_path.clone())
            .unwrap_or_else(|| db_dir.join("blobs"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or(cli.logging_level);

        let self_host = file
            .self_host
            .or_else(|| cli.self_host.clone())
            .ok_or_else(|| {
                anyhow!("self_host must be specified via --self-host or in config file")
            })?;
        let self_host = normalize_host(&self_host)?;

        let mut nodes = Vec::new();
        let mut seen_hosts = HashSet::new();
        for node in file.nodes.unwrap_or_default() {
            let host = normalize_host(&node.host)?;
            if !seen_hosts.insert(host.clone()) {
                bail!("Node {} is listed more than once", host);
            }
            if node.signer_id.trim().is_empty() || node.secret.is_empty() {
                bail!("Node {} needs both a signer_id and a secret", host);
            }
            nodes.push(NodeEntry { host, ..node });
        }
        if !nodes.is_empty() && !seen_hosts.contains(&self_host) {
            bail!("self_host {} is not in the node list", self_host);
        }

        let legacy_owner_host = file
            .legacy_owner_host
            .map(|host| normalize_host(&host))
            .transpose()?;

        let storage_capacity = file
            .storage_capacity
            .or_else(|| cli.storage_capacity.clone())
            .map(|s| parse_byte_size("storage_capacity", &s))
            .transpose()?;
        let max_upload_size = file
            .max_upload_size
            .or_else(|| cli.max_upload_size.clone())
            .unwrap_or_else(|| DEFAULT_MAX_UPLOAD_SIZE.to_string());
        let max_upload_bytes = parse_byte_size("max_upload_size", &max_upload_size)?;

        let redirect_cache_ttl = Duration::from_secs(file.redirect_cache_ttl_secs.unwrap_or(300));
        let peer_probe_timeout = Duration::from_secs(file.peer_probe_timeout_secs.unwrap_or(5));
        let peer_transfer_timeout =
            Duration::from_secs(file.peer_transfer_timeout_secs.unwrap_or(300));

        let listen_endpoint = file
            .listen_endpoint
            .or_else(|| cli.listen_endpoint.clone())
            .filter(|endpoint| !endpoint.trim().is_empty())
            .map(|endpoint| normalize_host(&endpoint))
            .transpose()?;

        // Analysis settings - merge file config with defaults
        let analysis_file = file.analysis.unwrap_or_default();
        let workers = analysis_file
            .workers
            .or(cli.analysis_workers)
            .unwrap_or(DEFAULT_ANALYSIS_WORKERS);
        if workers == 0 {
            bail!("analysis workers must be at least 1");
        }
        let analysis = AnalysisSettings {
            enabled: analysis_file.enabled.unwrap_or(!cli.disable_analysis),
            workers,
            initial_delay: Duration::from_secs(analysis_file.initial_delay_secs.unwrap_or(60)),
            stale_busy_threshold: Duration::from_secs(
                analysis_file.stale_busy_threshold_secs.unwrap_or(3600),
            ),
            ffmpeg_path: analysis_file
                .ffmpeg_path
                .map(PathBuf::from)
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            bpm_command: analysis_file
                .bpm_command
                .unwrap_or_else(CommandFeatureExtractor::default_bpm_command),
            key_command: analysis_file
                .key_command
                .unwrap_or_else(CommandFeatureExtractor::default_key_command),
            scratch_dir: analysis_file
                .scratch_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| db_dir.join("analysis-scratch")),
        };
        if analysis.bpm_command.is_empty() || analysis.key_command.is_empty() {
            bail!("analysis bpm_command and key_command must not be empty");
        }

        Ok(Self {
            db_dir,
            bucket_path,
            port,
            metrics_port,
            logging_level,
            self_host,
            nodes,
            legacy_owner_host,
            storage_capacity,
            max_upload_bytes,
            redirect_cache_ttl,
            peer_probe_timeout,
            peer_transfer_timeout,
            listen_endpoint,
            analysis,
        })
    }

    pub fn records_db_path(&self) -> PathBuf {
        self.db_dir.join("records.db")
    }

    /// Every host in the cluster. Without a node list this node is alone.
    pub fn hosts(&self) -> Vec<String> {
        if self.nodes.is_empty() {
            vec![self.self_host.clone()]
        } else {
            self.nodes.iter().map(|node| node.host.clone()).collect()
        }
    }

    /// The node entry describing this node, when a node list is configured.
    pub fn self_node(&self) -> Option<&NodeEntry> {
        self.nodes.iter().find(|node| node.host == self.self_host)
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
