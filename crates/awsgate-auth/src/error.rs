//! Error types for SigV4 parsing and verification.

/// Errors produced while parsing or checking a SigV4-signed request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The `Authorization` header is absent, not valid UTF-8, or lacks one of
    /// `Credential`, `SignedHeaders`, `Signature`.
    #[error("malformed Authorization header: {0}")]
    MalformedHeader(String),

    /// The header names an algorithm other than `AWS4-HMAC-SHA256`.
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The `Credential` value is not `keyid/date/region/service/aws4_request`.
    #[error("invalid credential scope: {0}")]
    InvalidCredential(String),

    /// `x-amz-date` is missing or not in `YYYYMMDDTHHMMSSZ` form.
    #[error("invalid request timestamp: {0}")]
    InvalidTimestamp(String),

    /// The recomputed signature differs from the declared one.
    #[error("signature does not match")]
    SignatureMismatch,
}

impl AuthError {
    /// Whether this error means the request could not be parsed at all, as
    /// opposed to parsing fine and failing verification.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::SignatureMismatch)
    }
}
