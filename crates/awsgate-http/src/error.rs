//! Error type for the proxy request lifecycle.
//!
//! Every variant maps to one client-visible status via
//! [`ProxyError::status_code`]; the engine renders it as a JSON error body
//! unless the request was hijacked, in which case the error is only logged.

use std::error::Error as StdError;
use std::time::Duration;

use awsgate_auth::AuthError;
use awsgate_core::LookupError;
use http::StatusCode;

/// Errors raised while proxying one request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request carries no `Authorization` header.
    #[error("missing Authorization header")]
    MissingAuthorization,

    /// The `Authorization` header or `x-amz-date` could not be parsed.
    #[error(transparent)]
    MalformedHeader(AuthError),

    /// The key lookup answered and has no secret for this key id.
    #[error("unknown access key id: {0}")]
    KeyNotFound(String),

    /// A lookup backend failed.
    #[error("lookup failed: {0}")]
    LookupInfra(#[source] LookupError),

    /// The recomputed signature differs from the declared one.
    #[error("the request signature does not match the signature computed for it")]
    InvalidSignature,

    /// No registered provider accepts the inbound host.
    #[error("no service provider handles host {0:?}")]
    ProviderNotFound(String),

    /// A provider or operation handler failed.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn StdError + Send + Sync>),

    /// The origin could not be reached or the transport failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    /// The origin did not send response headers in time.
    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    /// The forward target does not form a valid URI or `Host` value.
    #[error("invalid forward target: {0}")]
    InvalidTarget(String),

    /// The request body was already consumed by an earlier forward or take.
    #[error("request body already consumed")]
    BodyConsumed,

    /// `hijack` was called twice on the same request.
    #[error("response sink already hijacked")]
    AlreadyHijacked,

    /// The client side of the response sink is gone.
    #[error("response sink closed")]
    SinkClosed,
}

impl ProxyError {
    /// Wrap any handler-side failure.
    pub fn handler(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Handler(err.into())
    }

    /// HTTP status the client sees for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingAuthorization | Self::MalformedHeader(_) => StatusCode::BAD_REQUEST,
            Self::KeyNotFound(_) | Self::InvalidSignature => StatusCode::FORBIDDEN,
            Self::ProviderNotFound(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::LookupInfra(_)
            | Self::Handler(_)
            | Self::InvalidTarget(_)
            | Self::BodyConsumed
            | Self::AlreadyHijacked
            | Self::SinkClosed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// AWS-style error code for the JSON error body.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingAuthorization => "MissingSecurityHeader",
            Self::MalformedHeader(_) => "AuthorizationHeaderMalformed",
            Self::KeyNotFound(_) => "InvalidAccessKeyId",
            Self::InvalidSignature => "SignatureDoesNotMatch",
            Self::ProviderNotFound(_) => "ServiceNotFound",
            Self::Upstream(_) => "BadGateway",
            Self::UpstreamTimeout(_) => "GatewayTimeout",
            Self::LookupInfra(_)
            | Self::Handler(_)
            | Self::InvalidTarget(_)
            | Self::BodyConsumed
            | Self::AlreadyHijacked
            | Self::SinkClosed => "InternalError",
        }
    }
}

impl From<AuthError> for ProxyError {
    fn from(err: AuthError) -> Self {
        if err.is_malformed() {
            Self::MalformedHeader(err)
        } else {
            Self::InvalidSignature
        }
    }
}

impl From<LookupError> for ProxyError {
    fn from(err: LookupError) -> Self {
        Self::LookupInfra(err)
    }
}
