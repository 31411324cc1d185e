//! Tiercache Daemon
//!
//! Hosts a cache hierarchy built from a YAML file, runs the periodic monitor
//! and serves Prometheus metrics plus health endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        tiercache daemon                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ CacheConfig  │───▶│ CacheManager │◀───│ CacheMonitor │       │
//! │  │   (YAML)     │    │  (L1..L6)    │    │   (ticker)   │       │
//! │  └──────────────┘    └──────────────┘    └──────┬───────┘       │
//! │                                                 ▼               │
//! │                         /metrics  /healthz  /readyz             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::config::CacheConfig;
use tiercache::monitoring::{CacheMonitor, HealthState, PrometheusExporter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiercache - multi-tier cache hierarchy daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file (defaults apply when absent)
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the monitor interval in seconds
    #[arg(long, env = "TIERCACHE_MONITOR_INTERVAL_SECONDS")]
    monitor_interval_seconds: Option<u64>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!(version = tiercache::VERSION, "Starting tiercache");

    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            info!("No configuration file given, using defaults");
            CacheConfig::default()
        }
    };
    if let Some(secs) = args.monitor_interval_seconds {
        config.monitor.interval_secs = secs;
    }
    config.validate().context("invalid configuration")?;

    let manager = Arc::new(config.build().context("building cache hierarchy")?);
    info!(
        tiers = ?manager.tiers(),
        read_order = ?manager.read_order(),
        "Cache hierarchy ready"
    );

    let exporter = Arc::new(PrometheusExporter::new()?);
    let health = Arc::new(HealthState::new());

    let report = manager.health_check().await;
    if report.status.is_healthy() {
        info!("Initial health check passed");
    } else {
        warn!(failing = ?report.failing(), "Initial health check found unhealthy tiers");
    }
    exporter.update_health(&report);
    health.update(report);

    let shutdown = CancellationToken::new();

    let monitor = Arc::new(
        CacheMonitor::new(Arc::clone(&manager), config.monitor.clone())
            .with_health_state(Arc::clone(&health))
            .with_exporter(Arc::clone(&exporter)),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown.clone()));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_state = Arc::clone(&health);
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_state).await {
            error!("Health server error: {:#}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_exporter = Arc::clone(&exporter);
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_exporter).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    health.set_live(false);
    shutdown.cancel();
    if let Err(e) = monitor_handle.await {
        error!("Monitor task failed: {}", e);
    }

    let swept = manager.clear_expired(None).await;
    info!(swept, "Tiercache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(
            "hyper=warn"
                .parse()
                .unwrap_or_else(|_| Level::WARN.into()),
        );

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

type HttpResponse = Response<Full<Bytes>>;

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

fn health_response(path: &str, state: &HealthState) -> HttpResponse {
    match path {
        "/livez" => {
            if state.is_live() {
                respond(StatusCode::OK, "text/plain", "ok")
            } else {
                respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "shutting down")
            }
        }
        "/readyz" => {
            if state.is_ready() {
                respond(StatusCode::OK, "text/plain", "ok")
            } else {
                respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "not ready")
            }
        }
        "/healthz" => match state.latest() {
            Some(report) => {
                let status = if report.status.is_healthy() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                match serde_json::to_vec(&report) {
                    Ok(body) => respond(status, "application/json", body),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string(),
                    ),
                }
            }
            None => respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "no health check yet"),
        },
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}

async fn run_health_server(addr: &str, state: Arc<HealthState>) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse().context("invalid health server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("health server accept")?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = health_response(req.uri().path(), &state);
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str, exporter: Arc<PrometheusExporter>) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse().context("invalid metrics server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("metrics server accept")?;
        let io = TokioIo::new(stream);
        let exporter = Arc::clone(&exporter);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = match req.uri().path() {
                    "/metrics" => match exporter.gather() {
                        Ok(text) => respond(StatusCode::OK, &exporter.content_type(), text),
                        Err(e) => respond(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "text/plain",
                            e.to_string(),
                        ),
                    },
                    _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
                };
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
