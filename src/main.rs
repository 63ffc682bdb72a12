use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import modules from the library crate
use blobnet_server::audio_analysis::{
    handoff, AnalysisPipeline, AnalysisScheduler, AnalysisSchedulerSettings, AnalysisWorkerPool,
    CommandFeatureExtractor,
};
use blobnet_server::blob_store::{BlobBucket, FileBucket};
use blobnet_server::config;
use blobnet_server::health::NodeHealth;
use blobnet_server::listens::ListenLogger;
use blobnet_server::peers::{BlobLocator, HttpPeerClient, PeerClient, Replicator};
use blobnet_server::placement::{Placement, RedirectCache, StaticOwnerOverride};
use blobnet_server::record_store::{RecordStore, SqliteRecordStore};
use blobnet_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use blobnet_server::signature::{SignatureVerifier, Signer};

const HEALTH_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[clap(version)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the record database (records.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Directory holding the blobs. Defaults to <db_dir>/blobs.
    #[clap(long, value_parser = parse_path)]
    pub bucket_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL other nodes use to reach this one, e.g. http://10.0.0.1:3001.
    #[clap(long)]
    pub self_host: Option<String>,

    /// Maximum bytes the bucket may hold, e.g. "500 GiB". Unlimited if unset.
    #[clap(long)]
    pub storage_capacity: Option<String>,

    /// Maximum size of a single peer upload. Defaults to "1 GiB".
    #[clap(long)]
    pub max_upload_size: Option<String>,

    /// Number of concurrent audio analysis workers.
    #[clap(long, env = "AUDIO_ANALYSIS_WORKERS")]
    pub analysis_workers: Option<usize>,

    /// Do not run background audio analysis.
    #[clap(long)]
    pub disable_analysis: bool,

    /// ffmpeg binary used to transcode audio before analysis.
    #[clap(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Base URL that receives a signed POST for every track listen.
    #[clap(long, env = "LISTEN_ENDPOINT")]
    pub listen_endpoint: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            bucket_path: args.bucket_path.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level,
            self_host: args.self_host.clone(),
            storage_capacity: args.storage_capacity.clone(),
            max_upload_size: args.max_upload_size.clone(),
            analysis_workers: args.analysis_workers,
            disable_analysis: args.disable_analysis,
            ffmpeg_path: args.ffmpeg_path.clone(),
            listen_endpoint: args.listen_endpoint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  bucket_path: {:?}", app_config.bucket_path);
    info!("  self_host: {}", app_config.self_host);
    info!("  port: {}", app_config.port);
    info!("  nodes: {}", app_config.hosts().len());

    info!("Initializing metrics...");
    metrics::init_metrics();

    if !app_config.records_db_path().exists() {
        info!(
            "Creating new record database at {:?}",
            app_config.records_db_path()
        );
    }
    let records: Arc<dyn RecordStore> =
        Arc::new(SqliteRecordStore::new(app_config.records_db_path())?);
    let bucket: Arc<dyn BlobBucket> = Arc::new(
        FileBucket::new(&app_config.bucket_path)
            .with_context(|| format!("Failed to open bucket at {:?}", app_config.bucket_path))?,
    );

    let mut placement = Placement::new(app_config.hosts(), app_config.self_host.clone());
    if let Some(owner) = &app_config.legacy_owner_host {
        info!("Static ownership override active for {}", owner);
        placement = placement.with_override(Arc::new(StaticOwnerOverride::new(owner.clone())));
    }
    let placement = Arc::new(placement);

    let signer = app_config
        .self_node()
        .map(|node| Arc::new(Signer::new(&node.signer_id, &node.secret)));
    if signer.is_none() {
        info!("No node list configured, peer requests will be unsigned");
    }
    let verifier = Arc::new(SignatureVerifier::new(
        app_config
            .nodes
            .iter()
            .map(|node| (node.signer_id.as_str(), node.secret.as_str())),
    ));

    let listens = match &app_config.listen_endpoint {
        Some(endpoint) => {
            let logger = ListenLogger::new(endpoint, &app_config.self_host, signer.clone())?;
            info!("Reporting listens to {}", logger.endpoint());
            Some(Arc::new(logger))
        }
        None => None,
    };

    let peers: Arc<dyn PeerClient> = Arc::new(HttpPeerClient::new(
        app_config.peer_probe_timeout,
        app_config.peer_transfer_timeout,
        signer,
    )?);
    let redirect_cache = Arc::new(RedirectCache::new(app_config.redirect_cache_ttl));
    let replicator = Arc::new(Replicator::new(
        bucket.clone(),
        peers.clone(),
        records.clone(),
    ));
    let locator = Arc::new(BlobLocator::new(
        placement.clone(),
        redirect_cache.clone(),
        peers,
    ));

    let health = Arc::new(NodeHealth::new(
        records.clone(),
        bucket.clone(),
        app_config.storage_capacity,
    ));
    health.refresh().await;
    info!("Node health initialized");

    let shutdown_token = CancellationToken::new();

    // Health refresh task
    {
        let health = health.clone();
        let shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_REFRESH_INTERVAL);
            // The first tick fires immediately and startup already refreshed
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        health.refresh().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    // Redirect cache purge task
    {
        let cache = redirect_cache.clone();
        let shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.default_ttl());
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!("Purged {} expired redirect cache entries", purged);
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    // Audio analysis
    let analysis = if app_config.analysis.enabled {
        let settings = &app_config.analysis;
        std::fs::create_dir_all(&settings.scratch_dir).with_context(|| {
            format!("Failed to create scratch dir {:?}", settings.scratch_dir)
        })?;
        let extractor = Arc::new(CommandFeatureExtractor::new(
            settings.ffmpeg_path.clone(),
            settings.bpm_command.clone(),
            settings.key_command.clone(),
        ));
        let pipeline = Arc::new(AnalysisPipeline::new(
            bucket.clone(),
            records.clone(),
            extractor,
            app_config.self_host.clone(),
            settings.scratch_dir.clone(),
        ));

        let (sender, receiver) = handoff();
        let pool = AnalysisWorkerPool::spawn(settings.workers, receiver, pipeline);
        let scheduler = AnalysisScheduler::new(
            records.clone(),
            placement.clone(),
            sender,
            AnalysisSchedulerSettings {
                initial_delay: settings.initial_delay,
                stale_busy_threshold: settings.stale_busy_threshold,
                ..Default::default()
            },
        );
        let scheduler = tokio::spawn(scheduler.run(shutdown_token.child_token()));
        Some((scheduler, pool))
    } else {
        info!("Audio analysis disabled");
        None
    };

    let state = ServerState {
        config: ServerConfig {
            requests_logging_level: app_config.logging_level,
            port: app_config.port,
            metrics_port: app_config.metrics_port,
            self_host: app_config.self_host.clone(),
            max_upload_bytes: usize::try_from(app_config.max_upload_bytes).unwrap_or(usize::MAX),
        },
        start_time: Instant::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bucket,
        records,
        locator,
        replicator,
        health,
        verifier,
        listens,
    };

    let server = run_server(state, shutdown_token.clone());
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            server.await
        }
    };
    shutdown_token.cancel();

    if let Some((scheduler, pool)) = analysis {
        // The scheduler owns the hand-off sender, so workers exit once it is gone
        let _ = scheduler.await;
        pool.join().await;
        info!("Audio analysis stopped");
    }

    result
}
