//! tiercache demo
//!
//! Runs a protected two-tier cache under a synthetic workload, serving
//! Prometheus metrics and health over HTTP, and prints JSON reports on exit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          tiercache demo                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workers    │───▶│  Protected   │───▶│  L1  /  L2   │       │
//! │  │  (workload)  │    │  MultiLevel  │    │ Instrumented │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          │                   │                                  │
//! │  /metrics (Prometheus)   /healthz (JSON)    CacheMonitor        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{CacheConfig, CacheProbe, Expiry, Instrumented, LocalTier, SharedTier, Tier, TierRegistry};
use tiercache::error::{Error, Result};
use tiercache::monitoring::{log_alerts, CacheMonitor, MetricSink, MonitorConfig, PrometheusSink};
use tiercache::multilevel::{MultiLevelCache, MultiLevelConfig};
use tiercache::protection::{Protected, ProtectionConfig};

type DemoCache = Protected<MultiLevelCache<String>>;

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - multi-level cache engine demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file with the multi-level cache configuration
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the key pattern of the configuration
    #[arg(long, env = "TIERCACHE_KEY_PATTERN")]
    key_pattern: Option<String>,

    /// Override the write-back pool size of the configuration
    #[arg(long, env = "TIERCACHE_ASYNC_POOL_SIZE")]
    async_pool_size: Option<usize>,

    /// Require both tiers healthy
    #[arg(long, env = "TIERCACHE_STRICT_HEALTH_CHECK")]
    strict_health_check: bool,

    /// Concurrent workload tasks
    #[arg(long, env = "TIERCACHE_WORKERS", default_value = "8")]
    workers: usize,

    /// Size of the key space
    #[arg(long, env = "TIERCACHE_KEYS", default_value = "1000")]
    keys: u64,

    /// Workload duration in seconds
    #[arg(long, env = "TIERCACHE_DURATION_SECONDS", default_value = "30")]
    duration_seconds: u64,

    /// Monitor sampling interval in seconds
    #[arg(long, env = "TIERCACHE_MONITOR_INTERVAL_SECONDS", default_value = "5")]
    monitor_interval_seconds: u64,

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
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting tiercache demo");
    info!("  Workers: {}", args.workers);
    info!("  Key space: {}", args.keys);
    info!("  Duration: {}s", args.duration_seconds);

    let mut config = load_config(args.config.as_ref()).await?;
    if let Some(pattern) = &args.key_pattern {
        config.key_pattern = pattern.clone();
    }
    if let Some(size) = args.async_pool_size {
        config.async_pool_size = size;
    }
    config.strict_health_check |= args.strict_health_check;
    config.validate()?;

    let prometheus = Arc::new(PrometheusSink::new("tiercache")?);
    let metrics: Arc<dyn MetricSink> = prometheus.clone();

    let monitor = Arc::new(CacheMonitor::with_sinks(
        MonitorConfig {
            monitor_interval: Duration::from_secs(args.monitor_interval_seconds.max(1)),
            health_check_interval: Duration::from_secs(args.monitor_interval_seconds.max(1)),
            ..Default::default()
        },
        metrics.clone(),
        log_alerts(),
    )?);

    let registry = instrumented_registry(metrics.clone(), monitor.clone());
    let coordinator = MultiLevelCache::from_registry(&registry, config)?
        .metrics(metrics.clone())
        .build()?;
    let cache: Arc<DemoCache> = Arc::new(Protected::new(coordinator, ProtectionConfig::default())?);

    // Existence filter only admits keys it has been told about
    for key in (0..args.keys).filter(|k| k % 10 != 0) {
        cache.engine().record_key_exists(&key.to_string());
    }
    let _cleanup = cache.spawn_cleanup(Duration::from_secs(30));

    monitor.register("multilevel", &cache);
    monitor.start();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_cache = cache.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_cache).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_sink = prometheus.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_sink).await {
            error!("Metrics server error: {}", e);
        }
    });

    let stop = CancellationToken::new();
    let mut workers = Vec::with_capacity(args.workers);
    for id in 0..args.workers {
        workers.push(tokio::spawn(run_worker(id, cache.clone(), args.keys.max(1), stop.clone())));
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_seconds)) => {
            info!("Workload finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping workload");
        }
    }
    stop.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!("Worker ended abnormally: {}", e);
        }
    }

    monitor.collect_metrics().await;
    let report = json!({
        "stats": cache.stats().await?,
        "protection": cache.engine().stats(),
        "performance": monitor.performance_reports().await,
        "health": cache.inner().health_report().await,
    });
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::Internal(format!("Failed to render report: {}", e)))?;
    println!("{}", rendered);

    monitor.shutdown().await;
    let incomplete = cache.inner().shutdown().await;
    if incomplete > 0 {
        warn!(incomplete, "Some queued writes were dropped");
    }

    info!("tiercache demo shutdown complete");
    Ok(())
}

// =============================================================================
// Setup
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "h2=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

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

async fn load_config(path: Option<&PathBuf>) -> Result<MultiLevelConfig> {
    let Some(path) = path else {
        info!("No configuration file given, using defaults");
        return Ok(MultiLevelConfig {
            key_pattern: "demo:{}".to_string(),
            ..Default::default()
        });
    };
    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    MultiLevelConfig::from_yaml(&yaml)
}

/// Registry whose local tiers are wrapped for metrics, tracing and monitoring
fn instrumented_registry(
    metrics: Arc<dyn MetricSink>,
    monitor: Arc<CacheMonitor>,
) -> TierRegistry<String> {
    let mut registry = TierRegistry::with_defaults();
    let created = AtomicUsize::new(0);
    registry.register("local", move |config: &CacheConfig| {
        let name = format!("l{}", created.fetch_add(1, Ordering::Relaxed) + 1);
        let tier = Instrumented::builder(LocalTier::<String>::with_name(name.clone(), config.clone()))
            .name(name)
            .config(config)
            .metrics(metrics.clone())
            .monitor(monitor.clone())
            .build();
        Ok(Arc::new(tier) as SharedTier<String>)
    });
    registry
}

// =============================================================================
// Workload
// =============================================================================

async fn run_worker(id: usize, cache: Arc<DemoCache>, keys: u64, stop: CancellationToken) {
    let mut operations = 0u64;
    while !stop.is_cancelled() {
        let (key, roll) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..keys), rng.gen_range(0..100u32))
        };
        let name = key.to_string();

        let result = match roll {
            0..=84 => cache
                .get_or_load(&name, Expiry::After(Duration::from_secs(300)), || async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    // Every tenth key has no backing record
                    Ok((key % 10 != 0).then(|| format!("value-{}", key)))
                })
                .await
                .map(|_| ()),
            85..=94 => cache
                .put(&name, format!("fresh-{}", key), Expiry::After(Duration::from_secs(120)))
                .await,
            _ => cache.evict(&name).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!(worker = id, key = %name, "Operation failed: {}", e);
        }

        operations += 1;
        tokio::task::yield_now().await;
    }
    info!(worker = id, operations, "Worker stopped");
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, cache: Arc<DemoCache>) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
        cache: Arc<DemoCache>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/readyz" => {
                let report = cache.inner().health_report().await;
                let status = if report.status.is_operational() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                let body = serde_json::to_vec(&report).unwrap_or_default();
                let mut response = Response::new(Full::new(Bytes::from(body)));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            "/livez" => Response::new(Full::new(Bytes::from("ok"))),
            _ => {
                let mut response = Response::new(Full::new(Bytes::from("not found")));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let cache = cache.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, cache.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, sink: Arc<PrometheusSink>) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
        sink: Arc<PrometheusSink>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match (req.uri().path(), sink.export_text()) {
            ("/metrics", Ok(text)) => {
                let mut response = Response::new(Full::new(Bytes::from(text)));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            ("/metrics", Err(e)) => {
                error!("Failed to export metrics: {}", e);
                let mut response = Response::new(Full::new(Bytes::from("export failed")));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
            _ => {
                let mut response = Response::new(Full::new(Bytes::from("not found")));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let sink = sink.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(req, sink.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
