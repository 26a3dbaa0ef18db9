//! The proxy engine.
//!
//! [`AwsProxy::handle`] drives one request through its lifecycle:
//!
//! 1. Parse `Authorization` and `x-amz-date` (400 on failure).
//! 2. Resolve the secret for the key id (403 when unknown, 500 when the
//!    lookup fails).
//! 3. Verify the signature against the original host and path (403).
//! 4. Resolve the provider for the inbound host (502).
//! 5. Run the provider (500, or the mapped upstream status).
//! 6. Stream the provider's response, unless it hijacked the sink.
//!
//! Every failure before streaming becomes a JSON error body written to the
//! sink. After a hijack the engine writes nothing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use awsgate_auth::{
    AuthError, parse_authorization_header, request_host, request_timestamp, verify_request,
};
use awsgate_core::SharedLookup;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderValue, StatusCode};
use http_body_util::BodyExt;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::body::{ProxyBody, full};
use crate::error::ProxyError;
use crate::provider::{ProviderContext, ServiceProvider, host_candidates};
use crate::registry::ServiceRegistry;
use crate::request::{DEFAULT_DUPLICATE_CAPACITY, ProxiedRequest, RequestCredentials};
use crate::sink::ResponseSink;
use crate::upstream::UpstreamClient;

/// Header carrying the request id on error responses.
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// How a request ended, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The provider's response was handed to the sink.
    Streamed(StatusCode),
    /// A handler took over the sink; the engine wrote nothing.
    Hijacked,
    /// The engine wrote an error response with this status.
    Failed(StatusCode),
}

impl ProxyOutcome {
    /// Status written by the engine, if it wrote one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Streamed(status) | Self::Failed(status) => Some(*status),
            Self::Hijacked => None,
        }
    }
}

struct ProxyInner {
    registry: ServiceRegistry,
    keys: SharedLookup,
    host_lookup: Option<SharedLookup>,
    service_lookup: Option<SharedLookup>,
    upstream: UpstreamClient,
    duplicate_capacity: usize,
}

/// The SigV4 intercepting proxy. Cheap to clone; all state is read-only.
#[derive(Clone)]
pub struct AwsProxy {
    inner: Arc<ProxyInner>,
}

impl fmt::Debug for AwsProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsProxy")
            .field("registry", &self.inner.registry)
            .field("host_lookup", &self.inner.host_lookup.is_some())
            .field("service_lookup", &self.inner.service_lookup.is_some())
            .field("upstream", &self.inner.upstream)
            .field("duplicate_capacity", &self.inner.duplicate_capacity)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AwsProxy`].
pub struct AwsProxyBuilder {
    registry: ServiceRegistry,
    keys: SharedLookup,
    host_lookup: Option<SharedLookup>,
    service_lookup: Option<SharedLookup>,
    upstream: Option<UpstreamClient>,
    duplicate_capacity: usize,
}

impl fmt::Debug for AwsProxyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsProxyBuilder")
            .field("registry", &self.registry)
            .field("duplicate_capacity", &self.duplicate_capacity)
            .finish_non_exhaustive()
    }
}

impl AwsProxyBuilder {
    /// Inbound host → origin host table used by default forwarding.
    #[must_use]
    pub fn host_lookup(mut self, lookup: SharedLookup) -> Self {
        self.host_lookup = Some(lookup);
        self
    }

    /// Inbound host → service name table consulted before provider matching.
    #[must_use]
    pub fn service_lookup(mut self, lookup: SharedLookup) -> Self {
        self.service_lookup = Some(lookup);
        self
    }

    /// Client for origin calls. Defaults to HTTPS with a 60 second timeout.
    #[must_use]
    pub fn upstream(mut self, upstream: UpstreamClient) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Per-reader chunk capacity for body duplication.
    #[must_use]
    pub fn duplicate_capacity(mut self, chunks: usize) -> Self {
        self.duplicate_capacity = chunks.max(1);
        self
    }

    /// Build the proxy.
    pub fn build(self) -> Result<AwsProxy, ProxyError> {
        let upstream = match self.upstream {
            Some(upstream) => upstream,
            None => UpstreamClient::new("https", DEFAULT_UPSTREAM_TIMEOUT)?,
        };
        debug!(
            services = ?self.registry.service_names(),
            scheme = %upstream.scheme(),
            timeout_ms = u64::try_from(upstream.timeout().as_millis()).unwrap_or(u64::MAX),
            "proxy built"
        );
        Ok(AwsProxy {
            inner: Arc::new(ProxyInner {
                registry: self.registry,
                keys: self.keys,
                host_lookup: self.host_lookup,
                service_lookup: self.service_lookup,
                upstream,
                duplicate_capacity: self.duplicate_capacity,
            }),
        })
    }
}

impl AwsProxy {
    /// Start building a proxy over `registry`, verifying against `keys`.
    #[must_use]
    pub fn builder(registry: ServiceRegistry, keys: SharedLookup) -> AwsProxyBuilder {
        AwsProxyBuilder {
            registry,
            keys,
            host_lookup: None,
            service_lookup: None,
            upstream: None,
            duplicate_capacity: DEFAULT_DUPLICATE_CAPACITY,
        }
    }

    /// The providers this proxy dispatches to.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    /// Run one request to completion, writing the response to `sink`.
    ///
    /// Dropping the returned future cancels lookups, the origin call and any
    /// body duplication started for the request.
    pub async fn handle(
        &self,
        request: http::Request<ProxyBody>,
        sink: Box<dyn ResponseSink>,
    ) -> ProxyOutcome {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("proxy", request_id = %request_id);
        self.dispatch(request, sink, request_id)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        request: http::Request<ProxyBody>,
        sink: Box<dyn ResponseSink>,
        request_id: String,
    ) -> ProxyOutcome {
        let (parts, body) = request.into_parts();

        let credentials = match self.authenticate(&parts).await {
            Ok(credentials) => credentials,
            Err(err) => return respond_error(Some(sink), &err, &request_id),
        };

        let mut req = ProxiedRequest::new(
            http::Request::from_parts(parts, body),
            credentials,
            sink,
            self.inner.upstream.clone(),
        )
        .with_request_id(request_id.clone())
        .with_duplicate_capacity(self.inner.duplicate_capacity);

        let host = req.original_host().to_owned();
        let provider = match self.service_hint(&host).await {
            Ok(Some(provider)) => provider,
            Ok(None) => match self.inner.registry.resolve(&req) {
                Some(provider) => provider,
                None => {
                    let err = ProxyError::ProviderNotFound(host);
                    return respond_error(req.take_sink(), &err, &request_id);
                }
            },
            Err(err) => return respond_error(req.take_sink(), &err, &request_id),
        };
        debug!(service = provider.name(), host = %host, "resolved service provider");

        let ctx = ProviderContext::new(request_id.clone(), self.inner.host_lookup.clone());
        let result = provider.handle(&ctx, &mut req).await;
        req.detach_fan_out();

        if req.is_hijacked() {
            if let Err(err) = result {
                error!(service = provider.name(), error = %err, "hijacking handler failed");
            }
            return ProxyOutcome::Hijacked;
        }

        match result {
            Ok(response) => stream_response(req.take_sink(), response, &request_id),
            Err(err) => respond_error(req.take_sink(), &err, &request_id),
        }
    }

    /// Parse, look up and verify the inbound credentials.
    async fn authenticate(&self, parts: &Parts) -> Result<RequestCredentials, ProxyError> {
        let raw = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(ProxyError::MissingAuthorization)?
            .to_str()
            .map_err(|_| AuthError::MalformedHeader("Authorization is not visible ASCII".to_owned()))?;
        let auth = parse_authorization_header(raw)?;
        let timestamp = request_timestamp(&parts.headers)?.to_owned();
        let host = request_host(parts)
            .ok_or_else(|| AuthError::MalformedHeader("missing Host".to_owned()))?
            .to_owned();

        let key_id = auth.credential.key_id.clone();
        let Some(key_secret) = self.inner.keys.lookup(&key_id).await? else {
            return Err(ProxyError::KeyNotFound(key_id));
        };

        verify_request(parts, &auth, &key_secret, &host)?;
        debug!(key_id = %key_id, scope = %auth.credential.scope(), "request verified");

        Ok(RequestCredentials {
            auth,
            timestamp,
            key_secret,
        })
    }

    /// The provider the service lookup names for `host`, if it names a
    /// registered one.
    async fn service_hint(
        &self,
        host: &str,
    ) -> Result<Option<Arc<dyn ServiceProvider>>, ProxyError> {
        let Some(lookup) = &self.inner.service_lookup else {
            return Ok(None);
        };
        for candidate in host_candidates(host) {
            if let Some(service) = lookup.lookup(&candidate).await? {
                if let Some(provider) = self.inner.registry.get(&service) {
                    return Ok(Some(provider));
                }
                warn!(host, service = %service, "service lookup names an unregistered provider");
            }
        }
        Ok(None)
    }
}

fn stream_response(
    sink: Option<Box<dyn ResponseSink>>,
    response: http::Response<ProxyBody>,
    request_id: &str,
) -> ProxyOutcome {
    let status = response.status();
    let Some(sink) = sink else {
        error!(%status, "response sink missing for a request that was not hijacked");
        return ProxyOutcome::Failed(StatusCode::INTERNAL_SERVER_ERROR);
    };

    let id = request_id.to_owned();
    let response = response.map(|body| {
        body.map_err(move |err| {
            // Headers are already out; the connection is abandoned.
            warn!(request_id = %id, error = %err, "response body stream failed");
            err
        })
        .boxed_unsync()
    });

    if let Err(err) = sink.send(response) {
        debug!(%status, error = %err, "client went away before the response was written");
    }
    ProxyOutcome::Streamed(status)
}

fn respond_error(
    sink: Option<Box<dyn ResponseSink>>,
    err: &ProxyError,
    request_id: &str,
) -> ProxyOutcome {
    let status = err.status_code();
    if status.is_server_error() {
        error!(%status, code = err.error_code(), error = %err, "request failed");
    } else {
        warn!(%status, code = err.error_code(), error = %err, "request rejected");
    }

    let Some(sink) = sink else {
        return ProxyOutcome::Failed(status);
    };

    let body = serde_json::json!({
        "Code": err.error_code(),
        "Message": err.to_string(),
        "RequestId": request_id,
    });
    let mut response = http::Response::new(full(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if let Err(send_err) = sink.send(response) {
        debug!(%status, error = %send_err, "client went away before the error was written");
    }
    ProxyOutcome::Failed(status)
}
