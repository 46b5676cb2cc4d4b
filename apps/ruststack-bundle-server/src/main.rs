//! RustStack Bundle Server - bundled multi-file upload over `multipart/related`.
//!
//! Accepts one `POST` per bundle, commits every part as a separate file under
//! the data directory, and exposes a health check endpoint for orchestration
//! systems.
//!
//! # Usage
//!
//! ```text
//! GATEWAY_LISTEN=0.0.0.0:8080 DATA_DIR=/srv/files ruststack-bundle-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:8080` | Bind address |
//! | `DATA_DIR` | `/var/lib/ruststack-bundle` | Storage root |
//! | `BUNDLE_PATH` | `/files/bundle` | Bundle endpoint path |
//! | `BUNDLE_ERROR_POLICY` | `isolate` | `isolate` (207) or `abort` (200 size map) |
//! | `BUNDLE_COMMIT_MODE` | `staged` | `staged` or `direct` |
//! | `BUNDLE_MAX_PART_SIZE` | `268435456` | Largest accepted part in bytes |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

mod handler;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ruststack_bundle_core::{BundleConfig, RustStackBundle};
use ruststack_bundle_http::dispatch::BundleHandler;
use ruststack_bundle_http::service::{BundleHttpConfig, BundleHttpService};

use crate::handler::BundleCommitHandler;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Build the [`BundleHttpConfig`] from the application [`BundleConfig`].
fn build_http_config(config: &BundleConfig) -> BundleHttpConfig {
    BundleHttpConfig {
        bundle_path: config.bundle_path.clone(),
        error_policy: config.error_policy,
        max_part_size: config.max_part_size,
    }
}

/// Run the accept loop, serving connections until a shutdown signal is received.
async fn serve<H: BundleHandler>(
    listener: TcpListener,
    service: BundleHttpService<H>,
) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    // In-flight bundles finish committing before exit.
    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

/// Perform a health check by connecting to the server and requesting the health endpoint.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET /_health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") && response.contains("\"status\":\"running\"") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --health-check flag for Docker HEALTHCHECK.
    if std::env::args().any(|a| a == "--health-check") {
        let config = BundleConfig::from_env();
        let addr = config.gateway_listen.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    let config = BundleConfig::from_env();

    init_tracing(&config.log_level)?;

    info!(
        gateway_listen = %config.gateway_listen,
        data_dir = %config.data_dir,
        bundle_path = %config.bundle_path,
        error_policy = %config.error_policy,
        commit_mode = %config.commit_mode,
        max_part_size = config.max_part_size,
        version = VERSION,
        "starting RustStack Bundle Server",
    );

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("failed to create data directory {}", config.data_dir))?;

    let http_config = build_http_config(&config);
    let provider = RustStackBundle::new(config.clone());
    let service = BundleHttpService::new(BundleCommitHandler(provider), http_config);

    let addr: SocketAddr = config
        .gateway_listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.gateway_listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    serve(listener, service).await
}
