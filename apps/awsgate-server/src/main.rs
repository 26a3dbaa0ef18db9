//! awsgate server: a SigV4 intercepting reverse proxy for AWS endpoints.
//!
//! Verifies every inbound request's SigV4 signature against a local key
//! table, dispatches it to the provider registered for its virtual host, and
//! forwards it re-signed to the origin.
//!
//! # Usage
//!
//! ```text
//! GATEWAY_KEYS='{"AKID":"secret"}' GATEWAY_HOSTS='{"s3.proxy.local":"s3.us-east-1.amazonaws.com"}' awsgate-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:8080` | Bind address |
//! | `SERVICES` | `s3` | Comma-separated providers to register, in order |
//! | `KEYS_ENV` | `GATEWAY_KEYS` | Env var holding the key id → secret JSON object |
//! | `HOSTS_ENV` | `GATEWAY_HOSTS` | Env var holding the inbound host → origin host JSON object |
//! | `SERVICE_HOSTS_ENV` | `GATEWAY_SERVICE_HOSTS` | Env var holding the inbound host → service JSON object |
//! | `UPSTREAM_SCHEME` | `https` | Scheme used to reach origins |
//! | `UPSTREAM_TIMEOUT_SECS` | `60` | Origin response header timeout |
//! | `BODY_BUFFER_CHUNKS` | `16` | Chunks buffered per duplicated body stream |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use awsgate_core::{GatewayConfig, SharedLookup, StaticLookup};
use awsgate_http::service::HEALTH_CHECK_PATH;
use awsgate_http::{
    AwsProxy, PassthroughProvider, ProxyService, S3Provider, ServiceRegistry, UpstreamClient,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

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

/// Register one provider per service name, in order. `s3` gets the S3
/// provider with operation classification; everything else passes through.
fn build_registry(services: &[String]) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    for name in services {
        if name == "s3" {
            registry.register(S3Provider::new());
        } else {
            registry.register(PassthroughProvider::new(name.clone()));
        }
    }
    registry
}

/// Load a JSON lookup table from the env var named `var`.
fn load_lookup(var: &str, what: &str) -> Result<StaticLookup<String>> {
    let lookup = StaticLookup::from_env_json(var)
        .with_context(|| format!("failed to load {what} from {var}"))?;
    info!(var, entries = lookup.len(), "loaded {what}");
    Ok(lookup)
}

fn build_proxy(config: &GatewayConfig) -> Result<AwsProxy> {
    let keys = load_lookup(&config.keys_env, "access keys")?;
    if keys.is_empty() {
        warn!(var = %config.keys_env, "no access keys configured, every request will be rejected");
    }
    let hosts = load_lookup(&config.hosts_env, "origin hosts")?;
    let service_hosts = load_lookup(&config.service_hosts_env, "service hosts")?;

    let upstream = UpstreamClient::new(&config.upstream_scheme, config.upstream_timeout())
        .context("failed to build upstream client")?;

    let keys: SharedLookup = Arc::new(keys);
    let mut builder = AwsProxy::builder(build_registry(&config.services), keys)
        .host_lookup(Arc::new(hosts))
        .upstream(upstream)
        .duplicate_capacity(config.body_buffer_chunks);
    if !service_hosts.is_empty() {
        builder = builder.service_lookup(Arc::new(service_hosts));
    }
    builder.build().context("failed to build proxy")
}

/// Run the accept loop, serving connections until a shutdown signal is received.
async fn serve(listener: TcpListener, service: ProxyService) -> Result<()> {
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

    // Wait for in-flight requests to complete.
    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

/// Probe the running server's health endpoint. Succeeds on `200 OK`.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request =
        format!("GET {HEALTH_CHECK_PATH} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.starts_with("HTTP/1.1 200") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env().context("invalid configuration")?;

    // Handle --health-check flag for container health checks.
    if std::env::args().any(|a| a == "--health-check") {
        let addr = config.listen.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&config.log_level)?;

    let proxy = build_proxy(&config)?;
    let service_names: Vec<String> = proxy
        .registry()
        .service_names()
        .into_iter()
        .map(str::to_owned)
        .collect();

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        %addr,
        services = ?service_names,
        upstream_scheme = %config.upstream_scheme,
        version = VERSION,
        "starting awsgate server",
    );

    serve(listener, ProxyService::new(proxy)).await
}
