//! The per-call unit of work handed to service providers.
//!
//! A [`ProxiedRequest`] owns the verified inbound request, the credentials it
//! was signed with, and (until a handler hijacks it) the client response sink.
//! Providers use it to inspect the body, forward the request to an origin
//! with a fresh signature, or take over the response entirely.

use std::fmt;
use std::sync::LazyLock;

use awsgate_auth::{AuthorizationHeader, request_host, sign_request};
use http::header::{AUTHORIZATION, HOST};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Uri};
use http_body_util::BodyExt;
use regex::{NoExpand, Regex};
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use crate::body::{self, ProxyBody};
use crate::error::ProxyError;
use crate::sink::ResponseSink;
use crate::upstream::UpstreamClient;

/// Chunks each duplicated reader may buffer unless configured otherwise.
pub const DEFAULT_DUPLICATE_CAPACITY: usize = 16;

static SIGNATURE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Signature=[^,\s]+").expect("signature pattern is valid"));

/// What the engine learned while verifying the inbound signature.
#[derive(Clone)]
pub struct RequestCredentials {
    /// The parsed `Authorization` header.
    pub auth: AuthorizationHeader,
    /// The `x-amz-date` timestamp the request was signed at.
    pub timestamp: String,
    /// The secret resolved for the key id.
    pub key_secret: String,
}

impl fmt::Debug for RequestCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCredentials")
            .field("key_id", &self.auth.credential.key_id)
            .field("scope", &self.auth.credential.scope())
            .field("timestamp", &self.timestamp)
            .field("key_secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// One inbound call, verified and ready for dispatch.
pub struct ProxiedRequest {
    request_id: String,
    parts: Parts,
    body: Option<ProxyBody>,
    original_host: String,
    credentials: RequestCredentials,
    sink: Option<Box<dyn ResponseSink>>,
    hijacked: bool,
    upstream: UpstreamClient,
    duplicate_capacity: usize,
    fan_out: Vec<AbortHandle>,
}

impl ProxiedRequest {
    /// Wrap a verified request. The original host is captured here, before
    /// any forwarding rewrites it.
    #[must_use]
    pub fn new(
        request: http::Request<ProxyBody>,
        credentials: RequestCredentials,
        sink: Box<dyn ResponseSink>,
        upstream: UpstreamClient,
    ) -> Self {
        let (parts, body) = request.into_parts();
        let original_host = request_host(&parts).unwrap_or_default().to_owned();

        Self {
            request_id: Uuid::new_v4().to_string(),
            parts,
            body: Some(body),
            original_host,
            credentials,
            sink: Some(sink),
            hijacked: false,
            upstream,
            duplicate_capacity: DEFAULT_DUPLICATE_CAPACITY,
            fan_out: Vec::new(),
        }
    }

    /// Use `request_id` for logs and error bodies instead of a fresh one.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the per-reader chunk capacity used by [`Self::duplicate_body`].
    #[must_use]
    pub fn with_duplicate_capacity(mut self, chunks: usize) -> Self {
        self.duplicate_capacity = chunks.max(1);
        self
    }

    /// Id used in logs and `x-amz-request-id`.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Request URI. Absolute once the request has been forwarded.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Mutable URI, e.g. to rewrite the path before forwarding. The next
    /// forward signs whatever the URI holds at that point.
    pub fn uri_mut(&mut self) -> &mut Uri {
        &mut self.parts.uri
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    /// The host the client addressed, before any rewrite.
    #[must_use]
    pub fn original_host(&self) -> &str {
        &self.original_host
    }

    /// The host the request currently targets.
    #[must_use]
    pub fn host(&self) -> &str {
        request_host(&self.parts).unwrap_or(&self.original_host)
    }

    /// The parsed `Authorization` header. After a forward its signature is
    /// the re-computed one.
    #[must_use]
    pub fn authorization(&self) -> &AuthorizationHeader {
        &self.credentials.auth
    }

    /// The `x-amz-date` timestamp.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.credentials.timestamp
    }

    /// Region from the credential scope.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.credentials.auth.credential.region
    }

    /// Service from the credential scope.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.credentials.auth.credential.service
    }

    /// Access key id the request was signed with.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.credentials.auth.credential.key_id
    }

    /// Whether a handler has taken over the response sink.
    #[must_use]
    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }

    /// Take the body for direct consumption. Nothing is left to forward.
    pub fn take_body(&mut self) -> Result<ProxyBody, ProxyError> {
        self.body.take().ok_or(ProxyError::BodyConsumed)
    }

    /// Install `body` as the body the next forward sends, dropping any body
    /// still held. A retry puts back the copy kept by [`Self::duplicate_body`].
    pub fn set_body(&mut self, body: ProxyBody) {
        self.body = Some(body);
    }

    /// Split the body so it can be read here and still be forwarded.
    ///
    /// Returns the inspection stream and keeps the forwarding stream as the
    /// request body. Both must be drained or dropped: a reader that is held
    /// but never polled stalls the other one (see [`crate::body`]). Calling
    /// this again duplicates the current forwarding stream.
    pub fn duplicate_body(&mut self) -> Result<ProxyBody, ProxyError> {
        let source = self.take_body()?;
        let (forward, inspect, task) = body::duplicate(source, self.duplicate_capacity);
        self.fan_out.push(task.abort_handle());
        self.body = Some(forward.boxed_unsync());
        Ok(inspect.boxed_unsync())
    }

    /// Forward the request to `target_host` with a signature recomputed for it.
    ///
    /// The credential scope (date, region, service) is unchanged; only the
    /// host and URL move. The `Signature=` field of the outgoing
    /// `Authorization` header is replaced with the new value. The origin
    /// response is returned with its body still streaming.
    ///
    /// The body is consumed; a second call fails with
    /// [`ProxyError::BodyConsumed`] unless a body was installed in between.
    /// To retry, call [`Self::duplicate_body`] before the first attempt and
    /// [`Self::set_body`] with the kept copy before the next one.
    pub async fn forward_and_resign(
        &mut self,
        target_host: &str,
    ) -> Result<http::Response<ProxyBody>, ProxyError> {
        if self.body.is_none() {
            return Err(ProxyError::BodyConsumed);
        }

        let uri = self
            .upstream
            .target_uri(target_host, self.parts.uri.path_and_query())?;
        let host = HeaderValue::from_str(target_host)
            .map_err(|_| ProxyError::InvalidTarget(target_host.to_owned()))?;
        self.parts.uri = uri;
        self.parts.headers.insert(HOST, host);

        let signature = sign_request(
            &self.parts,
            &self.credentials.auth,
            &self.credentials.key_secret,
            target_host,
        )?;
        let authorization = self.resigned_authorization(&signature)?;
        self.parts.headers.insert(AUTHORIZATION, authorization);
        self.credentials.auth.signature = signature;

        debug!(
            request_id = %self.request_id,
            original_host = %self.original_host,
            target_host,
            "forwarding re-signed request"
        );

        let body = self.take_body()?;
        self.upstream
            .send(
                self.parts.method.clone(),
                &self.parts.uri,
                self.parts.headers.clone(),
                body,
            )
            .await
    }

    /// Take exclusive ownership of the client response sink.
    ///
    /// After this the engine writes nothing to the client, not even an error
    /// response; the caller must send the response itself. A second call
    /// fails with [`ProxyError::AlreadyHijacked`].
    pub fn hijack(&mut self) -> Result<Box<dyn ResponseSink>, ProxyError> {
        if self.hijacked {
            return Err(ProxyError::AlreadyHijacked);
        }
        let sink = self.sink.take().ok_or(ProxyError::AlreadyHijacked)?;
        self.hijacked = true;
        Ok(sink)
    }

    /// Reclaim the sink for the engine's own response. `None` once hijacked.
    pub(crate) fn take_sink(&mut self) -> Option<Box<dyn ResponseSink>> {
        if self.hijacked {
            return None;
        }
        self.sink.take()
    }

    /// Let body fan-out tasks outlive this request value. Called once the
    /// handler finished normally and its streams may still be in flight.
    pub(crate) fn detach_fan_out(&mut self) {
        self.fan_out.clear();
    }

    /// The original `Authorization` value with only its signature swapped.
    fn resigned_authorization(&self, signature: &str) -> Result<HeaderValue, ProxyError> {
        let replacement = format!("Signature={signature}");
        let value = match self
            .parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        {
            Some(original) if SIGNATURE_PARAM.is_match(original) => SIGNATURE_PARAM
                .replace(original, NoExpand(&replacement))
                .into_owned(),
            _ => {
                let mut auth = self.credentials.auth.clone();
                auth.signature = signature.to_owned();
                auth.to_string()
            }
        };
        HeaderValue::from_str(&value)
            .map_err(|e| ProxyError::handler(format!("re-signed Authorization header: {e}")))
    }
}

impl Drop for ProxiedRequest {
    fn drop(&mut self) {
        // Still armed only if the request was abandoned mid-dispatch.
        for task in self.fan_out.drain(..) {
            task.abort();
        }
    }
}

impl fmt::Debug for ProxiedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxiedRequest")
            .field("request_id", &self.request_id)
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("original_host", &self.original_host)
            .field("credentials", &self.credentials)
            .field("hijacked", &self.hijacked)
            .field("body_available", &self.body.is_some())
            .finish_non_exhaustive()
    }
}
