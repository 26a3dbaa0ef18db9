//! AWS Signature Version 4 codec for awsgate.
//!
//! Pure functions, no I/O: the proxy uses them twice per forwarded request,
//! once to verify the inbound signature against the locally held secret and
//! once to re-sign the request for the origin host it is forwarded to.
//!
//! ```rust
//! use awsgate_auth::{derive_signing_key, sign};
//! use awsgate_auth::canonical::build_canonical_request;
//! use awsgate_auth::sigv4::build_string_to_sign;
//!
//! let canonical = build_canonical_request(
//!     "GET",
//!     "/bucket/key",
//!     "",
//!     &[("host", "s3.example.com"), ("x-amz-date", "20240101T000000Z")],
//!     &["host", "x-amz-date"],
//!     "UNSIGNED-PAYLOAD",
//! );
//! let sts = build_string_to_sign("20240101T000000Z", "us-east-1", "s3", &canonical);
//! let key = derive_signing_key("secret", "20240101", "us-east-1", "s3");
//! assert_eq!(sign(&key, &sts).len(), 64);
//! ```
//!
//! # Modules
//!
//! - [`canonical`] - canonical request construction
//! - [`header`] - `Authorization` header parsing and rendering
//! - [`sigv4`] - string-to-sign, key derivation, request-level sign/verify
//! - [`error`] - [`AuthError`]

pub mod canonical;
pub mod error;
pub mod header;
pub mod sigv4;

pub use error::AuthError;
pub use header::{AuthorizationCredential, AuthorizationHeader, parse_authorization_header};
pub use sigv4::{
    derive_signing_key, hash_payload, payload_hash_token, request_host, request_timestamp, sign,
    sign_request, verify_request,
};
