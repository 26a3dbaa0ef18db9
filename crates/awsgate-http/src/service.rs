//! hyper `Service` front for the proxy engine.
//!
//! Each connection's requests go through [`ProxyService`], which answers the
//! internal health check itself and hands everything else to [`AwsProxy`].
//! The engine (or a handler that hijacked the request) delivers the response
//! through a [`ChannelSink`]; whichever arrives first is returned to hyper.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use hyper::body::Incoming;
use hyper::service::Service;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::body::{ProxyBody, boxed, full};
use crate::proxy::{AwsProxy, ProxyOutcome};
use crate::sink::ChannelSink;

/// Path answered without authentication for liveness probes.
pub const HEALTH_CHECK_PATH: &str = "/.internal/hc";

/// hyper service wrapping an [`AwsProxy`].
#[derive(Debug, Clone)]
pub struct ProxyService {
    proxy: AwsProxy,
}

impl ProxyService {
    /// Serve requests through `proxy`.
    #[must_use]
    pub fn new(proxy: AwsProxy) -> Self {
        Self { proxy }
    }
}

impl Service<http::Request<Incoming>> for ProxyService {
    type Response = http::Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let proxy = self.proxy.clone();

        Box::pin(async move {
            let started = Instant::now();
            let method = req.method().clone();
            let path = req.uri().path().to_owned();

            let response = if is_health_check(&method, &path) {
                health_check_response()
            } else {
                run_engine(proxy, req.map(boxed)).await
            };

            info!(
                %method,
                path,
                status = response.status().as_u16(),
                latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "request completed"
            );
            Ok(response)
        })
    }
}

enum First {
    Engine(ProxyOutcome),
    Sink(Result<http::Response<ProxyBody>, oneshot::error::RecvError>),
}

/// Run the engine until a response is available for the client.
///
/// A hijacking handler may send its response before it returns; the rest of
/// the engine then keeps running in the background.
pub(crate) async fn run_engine(
    proxy: AwsProxy,
    request: http::Request<ProxyBody>,
) -> http::Response<ProxyBody> {
    let (sink, mut rx) = ChannelSink::channel();
    let mut engine = Box::pin(async move { proxy.handle(request, Box::new(sink)).await });

    let first = tokio::select! {
        outcome = &mut engine => First::Engine(outcome),
        response = &mut rx => First::Sink(response),
    };

    match first {
        First::Sink(Ok(response)) => {
            tokio::spawn(engine);
            response
        }
        First::Sink(Err(_)) => {
            error!("response sink dropped without a response");
            tokio::spawn(engine);
            internal_error_response()
        }
        First::Engine(outcome) => rx.try_recv().unwrap_or_else(|_| {
            error!(?outcome, "engine finished without writing a response");
            internal_error_response()
        }),
    }
}

fn is_health_check(method: &Method, path: &str) -> bool {
    *method == Method::GET && path == HEALTH_CHECK_PATH
}

fn health_check_response() -> http::Response<ProxyBody> {
    let mut response = http::Response::new(full("ok"));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn internal_error_response() -> http::Response<ProxyBody> {
    let mut response = http::Response::new(full("internal error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
