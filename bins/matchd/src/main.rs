//! matchd CLI and server binary
//!
//! Entry point for the matchmaking service. Provides commands for
//! initializing, validating, and starting matchd.

mod ingest;

use anyhow::{Context, Result};
use cli::{Cli, Commands, MessagingBackend};
use config::{generate_default_config, load_config, save_config, validate_config, MatchdConfig};
use matchmaking::api::{create_router, ApiState};
use matchmaking::{
    ConnectionRegistry, MatchingEngine, NotificationPipeline, PairMirror, PipelineConfig,
};
use observability::{init_logging, init_metrics, LogFormat, MatchMetrics, MatchSample};
use server::health::health_routes;
use server::{CombinedServer, HealthState, HttpServer, Server, ServerConfig, ShutdownController};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ingest::IngestHandler;

/// Per-request timeout on the HTTP API
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often engine counters are pushed to the metrics recorder
const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start {
            config,
            http,
            ws,
            messaging,
        } => start_command(config, http, ws, messaging).await,
        Commands::Validate { config } => {
            init_logging("matchd", LogFormat::Pretty, "info")?;
            info!("Executing 'validate' command");
            validate_command(config).await
        }
        Commands::Init { output } => {
            init_logging("matchd", LogFormat::Pretty, "info")?;
            info!("Executing 'init' command");
            init_command(output).await
        }
    }
}

async fn start_command<P: AsRef<Path>>(
    config_path: P,
    http_override: Option<u16>,
    ws_override: Option<u16>,
    messaging_override: Option<MessagingBackend>,
) -> Result<()> {
    let config_path = config_path.as_ref();
    let mut config = load_config(config_path)?;

    // Logging settings live in the config, so the subscriber comes up after loading it
    let logging = &config.monitoring.logging;
    let format = LogFormat::parse(&logging.format).unwrap_or_default();
    init_logging(&config.service.name, format, &logging.level)?;
    info!(path = ?config_path, "matchd starting...");

    apply_overrides(&mut config, http_override, ws_override, messaging_override);

    let report = validate_config(&config);

    if !report.warnings.is_empty() {
        warn!("Configuration warnings:");
        for warning in &report.warnings {
            warn!(field = %warning.field, message = %warning.message);
        }
    }

    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start matchd due to configuration errors");
    }

    run_service(config).await
}

/// Apply CLI flags on top of the loaded configuration
fn apply_overrides(
    config: &mut MatchdConfig,
    http: Option<u16>,
    ws: Option<u16>,
    messaging: Option<MessagingBackend>,
) {
    if let Some(port) = http {
        debug!(port, "Overriding HTTP port");
        config.server.http_port = port;
    }
    if let Some(port) = ws {
        debug!(port, "Overriding WebSocket port");
        config.server.ws_port = port;
    }
    if let Some(backend) = messaging {
        debug!(backend = backend.as_str(), "Overriding messaging backend");
        config.messaging.messaging_type = backend.as_str().to_string();
    }
}

async fn run_service(config: MatchdConfig) -> Result<()> {
    let service = config.service.name.clone();

    if config.monitoring.metrics.enabled {
        init_metrics(config.monitoring.metrics.prometheus_port)?;
    }

    let messaging = messaging::create_client(&config.messaging)
        .await
        .context("Failed to create messaging client")?;

    let registry = Arc::new(ConnectionRegistry::with_shards(config.registry.shard_count)?);

    let mirror = config.messaging.mirror_pairs.then(|| PairMirror {
        client: messaging.clone(),
        topic: config.messaging.topic.clone(),
    });
    let pipeline = Arc::new(NotificationPipeline::start(
        PipelineConfig::from(&config.notification),
        registry.clone(),
        mirror,
    )?);

    let engine = Arc::new(MatchingEngine::from_config(
        &config.matching,
        pipeline.clone(),
    )?);
    engine.start()?;

    let shutdown = ShutdownController::with_signals();

    if config.monitoring.metrics.enabled {
        tokio::spawn(report_metrics(
            engine.clone(),
            registry.clone(),
            shutdown.child_token(),
        ));
    }

    let server_config = ServerConfig::from(&config.server);
    let router = create_router(ApiState {
        engine: engine.clone(),
        registry: registry.clone(),
        messaging: messaging.clone(),
        join_topic: config.messaging.join_topic.clone(),
    })
    .merge(health_routes(Arc::new(HealthState::new(service.clone()))));

    let server = CombinedServer::new(service.clone(), server_config.clone())
        .with_http_server(HttpServer::with_defaults(
            server_config.clone(),
            router,
            HTTP_REQUEST_TIMEOUT,
        ))
        .with_ws_handler(Arc::new(IngestHandler::new(engine.clone(), registry.clone())));

    info!(
        service = %service,
        environment = %config.service.environment,
        http_port = ?server_config.http_port,
        ws_port = ?server_config.websocket_port,
        messaging = messaging.backend(),
        buckets = engine.num_buckets(),
        "Starting service"
    );

    let result = server.run(shutdown.child_token()).await;
    shutdown.shutdown();

    engine.stop().await;
    let timeout = Duration::from_millis(config.notification.shutdown_timeout_ms);
    let abandoned = pipeline.shutdown(timeout).await;
    if abandoned > 0 {
        warn!(abandoned, "Pairs left undelivered at shutdown");
    }

    let stats = engine.snapshot();
    info!(
        submitted = stats.submitted,
        pairs = stats.pairs_emitted,
        "matchd stopped"
    );

    result.map_err(Into::into)
}

/// Push engine counters into the metrics recorder until cancelled
async fn report_metrics(
    engine: Arc<MatchingEngine>,
    registry: Arc<ConnectionRegistry>,
    token: CancellationToken,
) {
    let metrics = MatchMetrics::new();
    let mut ticker = tokio::time::interval(METRICS_SAMPLE_INTERVAL);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let engine_stats = engine.snapshot();
                let pipeline_stats = engine.pipeline().snapshot();
                metrics.record(&MatchSample {
                    submitted: engine_stats.submitted,
                    rejected: engine_stats.rejected,
                    pairs_emitted: engine_stats.pairs_emitted,
                    delivered: pipeline_stats.delivered,
                    failed: pipeline_stats.failed,
                    pending_events: engine_stats.pending_events,
                    queued: engine.queued() as u64,
                    connections: registry.len() as u64,
                });
            }
        }
    }
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    let matching = &config.matching;
    let buckets = (matching.max_score + matching.bucket_size - 1) / matching.bucket_size;

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {} ({})", config.service.name, config.service.environment);
    println!(
        "Buckets: {} x {} points (max score {})",
        buckets, matching.bucket_size, matching.max_score
    );
    println!(
        "Notification: ring {} / {} consumers",
        config.notification.ring_buffer_size, config.notification.consumers
    );
    println!("Messaging: {}", config.messaging.messaging_type);
    println!(
        "Ports: HTTP={}, WebSocket={}",
        config.server.http_port, config.server.ws_port
    );

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("This configuration includes:");
    println!("  - Score buckets and scan/sweep timing");
    println!("  - Notification pipeline sizing");
    println!("  - In-memory messaging (switch to redis_stream or redis_pubsub as needed)");
    println!();
    println!("Next steps:");
    println!("  1. Edit the configuration file to customize settings");
    println!("  2. Set any environment variables it references (e.g. MATCHD_ENV)");
    println!(
        "  3. Run 'matchd validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'matchd start --config {:?}' to start the service",
        output_path
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides() {
        let mut config = generate_default_config();
        apply_overrides(&mut config, Some(0), Some(9999), Some(MessagingBackend::RedisStream));

        assert_eq!(config.server.http_port, 0);
        assert_eq!(config.server.ws_port, 9999);
        assert_eq!(config.messaging.messaging_type, "redis_stream");
        assert_eq!(ServerConfig::from(&config.server).http_port, None);
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = generate_default_config();
        let before = config.server.ws_port;
        apply_overrides(&mut config, None, None, None);

        assert_eq!(config.server.ws_port, before);
        assert_eq!(config.messaging.messaging_type, "memory");
    }
}
