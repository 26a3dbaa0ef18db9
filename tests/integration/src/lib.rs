//! End-to-end tests for the awsgate proxy.
//!
//! Each test boots two servers on loopback ephemeral ports: an origin that
//! verifies SigV4 itself and records what it received, and the proxy, whose
//! host lookup points `s3.proxy.test` at the origin. Requests are signed for
//! the proxy host and sent with `reqwest`.
//!
//! ```text
//! cargo test -p awsgate-integration
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Context, Result};
use awsgate_auth::{
    hash_payload, parse_authorization_header, request_host, sign_request, verify_request,
};
use awsgate_core::{SharedLookup, StaticLookup};
use awsgate_http::{AwsProxy, ProxyService, ServiceRegistry, UpstreamClient};
use bytes::Bytes;
use http::header::{AUTHORIZATION, HOST};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::warn;

/// Access key id known to both the proxy and the origin.
pub const KEY_ID: &str = "AKIDEXAMPLE";
/// Secret for [`KEY_ID`].
pub const SECRET: &str = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";
/// Virtual host clients address; mapped to the origin by the host lookup.
pub const PROXY_HOST: &str = "s3.proxy.test";
/// Fixed request timestamp.
pub const TIMESTAMP: &str = "20240101T120000Z";

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// What the origin saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Path and query as received.
    pub path_and_query: String,
    /// `Host` header.
    pub host: String,
    /// Signature from the `Authorization` header.
    pub signature: String,
    /// Whether the signature verified for the origin's own host.
    pub verified: bool,
    /// Full request body.
    pub body: Bytes,
}

/// A loopback origin that checks SigV4 and echoes the request line.
#[derive(Debug)]
pub struct Origin {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl Origin {
    /// Start an origin on an ephemeral port.
    pub async fn start() -> Result<Self> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let svc = service_fn(move |req| origin_response(req, Arc::clone(&recorded)));
                tokio::spawn(async move {
                    let http = HttpConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = http.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(error = %e, "origin connection error");
                    }
                });
            }
        });

        Ok(Self {
            addr,
            requests,
            task,
        })
    }

    /// `host:port` of the origin.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn origin_response(
    req: http::Request<Incoming>,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "origin failed to read body");
            Bytes::new()
        }
    };

    let host = request_host(&parts).unwrap_or_default().to_owned();
    let auth = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| parse_authorization_header(raw).ok());
    let body_hash_ok = parts
        .headers
        .get("x-amz-content-sha256")
        .is_none_or(|declared| declared.as_bytes() == hash_payload(&body).as_bytes());
    let verified = body_hash_ok
        && auth
            .as_ref()
            .is_some_and(|auth| verify_request(&parts, auth, SECRET, &host).is_ok());

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| "/".to_owned(), ToString::to_string);
    let line = format!("origin saw {} {path_and_query}", parts.method);

    recorded.lock().push(RecordedRequest {
        method: parts.method.clone(),
        path_and_query,
        host,
        signature: auth.map(|auth| auth.signature).unwrap_or_default(),
        verified,
        body,
    });

    let mut response = http::Response::new(Full::new(Bytes::from(line)));
    if !verified {
        *response.status_mut() = StatusCode::FORBIDDEN;
    }
    response
        .headers_mut()
        .insert("x-origin", HeaderValue::from_static("loopback"));
    Ok(response)
}

/// The proxy served on an ephemeral port.
#[derive(Debug)]
pub struct Gateway {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Gateway {
    /// Serve `proxy` on loopback.
    pub async fn start(proxy: AwsProxy) -> Result<Self> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let service = ProxyService::new(proxy);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let svc = service.clone();
                tokio::spawn(async move {
                    let http = HttpConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = http.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(error = %e, "gateway connection error");
                    }
                });
            }
        });

        Ok(Self { addr, task })
    }

    /// Base URL of the gateway.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Build a proxy that verifies against [`KEY_ID`]/[`SECRET`] and forwards
/// [`PROXY_HOST`] to `origin_host` over plain HTTP.
pub fn proxy_to(origin_host: &str, registry: ServiceRegistry) -> Result<AwsProxy> {
    let keys: SharedLookup = Arc::new(StaticLookup::from_pairs([(KEY_ID, SECRET.to_owned())]));
    let hosts: SharedLookup = Arc::new(StaticLookup::from_pairs([(
        PROXY_HOST,
        origin_host.to_owned(),
    )]));
    let upstream = UpstreamClient::new("http", Duration::from_secs(5))?;

    Ok(AwsProxy::builder(registry, keys)
        .host_lookup(hosts)
        .upstream(upstream)
        .build()?)
}

/// A client request signed for a virtual host.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// Method.
    pub method: Method,
    /// Path and query.
    pub path: String,
    /// Headers including `Host` and `Authorization`.
    pub headers: HeaderMap,
    /// Body.
    pub body: Bytes,
}

impl SignedRequest {
    /// Sign `method path` with `body` for `host`, using `key_id` and `secret`.
    pub fn new(
        method: Method,
        host: &str,
        path: &str,
        body: impl Into<Bytes>,
        key_id: &str,
        secret: &str,
    ) -> Result<Self> {
        let body = body.into();
        let (mut parts, ()) = http::Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, host)
            .header("x-amz-date", TIMESTAMP)
            .header("x-amz-content-sha256", hash_payload(&body))
            .body(())?
            .into_parts();

        let mut auth = parse_authorization_header(&format!(
            "AWS4-HMAC-SHA256 Credential={key_id}/20240101/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=0"
        ))?;
        auth.signature = sign_request(&parts, &auth, secret, host)?;
        parts
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_str(&auth.to_string())?);

        Ok(Self {
            method,
            path: path.to_owned(),
            headers: parts.headers,
            body,
        })
    }

    /// Sign for [`PROXY_HOST`] with the known key.
    pub fn for_proxy(method: Method, path: &str, body: impl Into<Bytes>) -> Result<Self> {
        Self::new(method, PROXY_HOST, path, body, KEY_ID, SECRET)
    }

    /// The signature carried in `Authorization`.
    #[must_use]
    pub fn signature(&self) -> String {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| parse_authorization_header(raw).ok())
            .map(|auth| auth.signature)
            .unwrap_or_default()
    }

    /// Send through `gateway`.
    pub async fn send(&self, gateway: &Gateway) -> Result<reqwest::Response> {
        reqwest::Client::new()
            .request(self.method.clone(), gateway.url(&self.path))
            .headers(self.headers.clone())
            .body(self.body.clone())
            .send()
            .await
            .context("request to gateway failed")
    }
}

/// Parse a JSON error body.
pub async fn error_body(response: reqwest::Response) -> Result<serde_json::Value> {
    Ok(response.json().await?)
}

mod test_errors;
mod test_forward;
mod test_handlers;
