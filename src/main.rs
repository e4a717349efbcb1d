//! Layered Cache CLI
//!
//! Builds a layered cache from configuration and drives it with line
//! commands read from stdin, for exercising the tiers by hand.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        layered-cache                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    stdin     │───▶│ LayeredCache │───▶│   /metrics   │       │
//! │  │   commands   │    │  (l1 .. lN)  │    │  (optional)  │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use layered_cache::{CacheConfig, LayeredCache, Options, Value};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Layered Cache - tiered cache coordinator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML layer configuration (defaults to two memory layers)
    #[arg(long, env = "LAYERED_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Metrics server bind address (disabled when unset)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

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

    init_logging(&args)?;

    let config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    let cache = LayeredCache::from_config(&config).context("building layered cache")?;

    info!("Starting layered cache");
    info!("  Layers: {}", cache.layer_names().join(" -> "));

    if let Some(addr) = args.metrics_addr.clone() {
        let metrics_cache = cache.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, metrics_cache).await {
                error!("Metrics server error: {:#}", e);
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let reply = match execute(&cache, &line).await {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(e) => format!("ERR {:#}", e),
        };
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("Input closed, shutting down");
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

/// Run one command line; `None` for blank lines
async fn execute(cache: &LayeredCache, line: &str) -> anyhow::Result<Option<String>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((command, rest)) = parts.split_first() else {
        return Ok(None);
    };
    let opts = Options::default();

    let reply = match (command.to_lowercase().as_str(), rest) {
        ("get", [key]) => match cache.read(key, &opts).await {
            Some(value) => value.to_string(),
            None => "(miss)".to_string(),
        },
        ("set", [key, value]) => cache.write(key, Value::from(value.to_string()), &opts).await?.to_string(),
        ("set", [key, value, ttl]) => {
            let ttl: u64 = ttl.parse().context("ttl must be whole seconds")?;
            let opts = Options::new().with_expires_in(Duration::from_secs(ttl));
            cache.write(key, Value::from(value.to_string()), &opts).await?.to_string()
        }
        ("mget", keys) if !keys.is_empty() => {
            let found = cache.read_multi(keys, &opts).await;
            keys.iter()
                .map(|k| match found.get(*k) {
                    Some(v) => format!("{}={}", k, v),
                    None => format!("{}=(miss)", k),
                })
                .collect::<Vec<_>>()
                .join(" ")
        }
        ("incr", [key]) => cache.increment(key, 1, &opts).await?.to_string(),
        ("incr", [key, amount]) => cache.increment(key, parse_amount(amount)?, &opts).await?.to_string(),
        ("decr", [key]) => cache.decrement(key, 1, &opts).await?.to_string(),
        ("decr", [key, amount]) => cache.decrement(key, parse_amount(amount)?, &opts).await?.to_string(),
        ("del", [key]) => cache.delete(key, &opts).await?.to_string(),
        ("delmatch", [pattern]) => cache.delete_matched(pattern, &opts).await?.to_string(),
        ("exists", [key]) => cache.exists(key, &opts).await.to_string(),
        ("clear", []) => {
            cache.clear(&opts).await?;
            "OK".to_string()
        }
        ("cleanup", []) => cache.cleanup(&opts).await?.to_string(),
        ("stats", []) => serde_json::to_string(&cache.metrics())?,
        (other, _) => bail!("unknown command or wrong arguments: {}", other),
    };
    Ok(Some(reply))
}

fn parse_amount(raw: &str) -> anyhow::Result<i64> {
    raw.parse().with_context(|| format!("invalid amount '{}'", raw))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
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
        .add_directive("hyper=warn".parse()?);

    // Logs go to stderr so replies on stdout stay parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, cache: LayeredCache) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
        cache: LayeredCache,
    ) -> hyper::http::Result<Response<Full<Bytes>>> {
        match req.uri().path() {
            "/metrics" => match cache.metrics().to_prometheus() {
                Ok(body) => Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/plain; version=0.0.4")
                    .body(Full::new(Bytes::from(body))),
                Err(e) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from(e.to_string()))),
            },
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found"))),
        }
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address '{}'", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept error")?;

        let io = TokioIo::new(stream);
        let cache = cache.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(req, cache.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
