//! USL Agent
//!
//! Serves the USL REST API for an object storage appliance, keeps its volume
//! inventory in sync and exposes health and metrics endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use usl_agent::{
    ApiServer, ApiServerConfig, Error, FileVolumeStore, InMemoryBackend, InMemoryVolumeStore,
    Result, UdsClient, UslConfig, UslDependencies, UslMetrics, UslService,
};
use usl_agent::domain::ports::VolumeStoreRef;

// =============================================================================
// CLI Arguments
// =============================================================================

/// USL Agent - device-management bridge for the object storage appliance
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "USL_CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address (overrides api.rest_addr)
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Friendly system name (overrides product.friendly_name)
    #[arg(long, env = "USL_FRIENDLY_NAME")]
    friendly_name: Option<String>,

    /// Volume record directory (overrides store.path)
    #[arg(long, env = "USL_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// Registration authority URL (overrides uds.url)
    #[arg(long, env = "UDS_URL")]
    uds_url: Option<String>,

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
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args)?;

    info!("Starting USL Agent");
    info!("  Version: {}", usl_agent::VERSION);
    info!("  REST API: {}", config.api.rest_addr);
    info!("  UDS: {}", config.uds.url);
    info!("  Volume cache period: {}s", config.volume_cache.update_period_secs);

    // Collaborators
    let store: VolumeStoreRef = match &config.store.path {
        Some(path) => {
            info!("Volume records stored in {}", path.display());
            Arc::new(FileVolumeStore::with_path(path).await?)
        }
        None => {
            warn!("No store path configured, volume records are kept in memory");
            Arc::new(InMemoryVolumeStore::new())
        }
    };
    warn!("Using the embedded object storage and identity back-end");
    let deps = UslDependencies {
        clients: Arc::new(InMemoryBackend::new()),
        store,
        authority: Arc::new(UdsClient::new(&config.uds.url)?),
    };

    let service = UslService::new(&config, deps).await?;
    info!("USL service initialized for device {}", service.device().uuid);

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics = service.metrics().clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: config.api.rest_addr()?,
    };
    let api_server = Arc::new(ApiServer::new(api_config, service.clone()));

    let server = api_server.clone();
    let mut api_task = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut api_task => {
            match result {
                Ok(Err(e)) => error!("REST server error: {}", e),
                Err(e) => error!("REST server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            api_server.shutdown();
            if let Ok(Err(e)) = api_task.await {
                error!("REST server error: {}", e);
            }
        }
    }

    service.shutdown().await;
    info!("Agent shutdown complete");
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<UslConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            UslConfig::load(path)?
        }
        None => UslConfig::default(),
    };

    if let Some(addr) = &args.api_addr {
        config.api.rest_addr = addr.clone();
    }
    if let Some(name) = &args.friendly_name {
        config.product.friendly_name = name.clone();
    }
    if let Some(path) = &args.store_path {
        config.store.path = Some(path.clone());
    }
    if let Some(url) = &args.uds_url {
        config.uds.url = url.clone();
    }

    config.validate()?;
    Ok(config)
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
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap())
        .add_directive("axum=info".parse().unwrap());

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
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::empty());
            match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => *response.body_mut() = Body::from("ok"),
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: UslMetrics) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match (req.uri().path(), metrics.encode()) {
                        ("/metrics", Ok((content_type, buffer))) => {
                            if let Ok(value) = HeaderValue::from_str(&content_type) {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        ("/metrics", Err(e)) => {
                            error!("Failed to encode metrics: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
