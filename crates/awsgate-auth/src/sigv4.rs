//! SigV4 string-to-sign, key derivation and signatures.
//!
//! The full signature of a request is
//!
//! ```text
//! sign(derive_signing_key(secret, date8, region, service),
//!      build_string_to_sign(timestamp, region, service, canonical_request))
//! ```
//!
//! where `date8` is the first eight characters of the `x-amz-date` timestamp.
//! [`sign_request`] and [`verify_request`] run that pipeline against an
//! [`http::request::Parts`] with an explicit effective host, which is how the
//! proxy verifies the inbound request and then re-signs it for a new origin.

use hmac::{Hmac, KeyInit, Mac};
use http::HeaderMap;
use http::request::Parts;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::canonical::{UNSIGNED_PAYLOAD, build_canonical_request};
use crate::error::AuthError;
use crate::header::{ALGORITHM, AuthorizationHeader, SCOPE_TERMINATOR};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request timestamp.
pub const AMZ_DATE: &str = "x-amz-date";

/// Header carrying the client-declared payload hash.
pub const AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";

/// Timestamp layout of `x-amz-date`.
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Build the string to sign for a canonical request.
///
/// ```
/// use awsgate_auth::sigv4::build_string_to_sign;
///
/// let sts = build_string_to_sign("20130524T000000Z", "us-east-1", "s3", "GET\n/\n\n\n\n\n");
/// assert!(sts.starts_with("AWS4-HMAC-SHA256\n20130524T000000Z\n20130524/us-east-1/s3/aws4_request\n"));
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    region: &str,
    service: &str,
    canonical_request: &str,
) -> String {
    let date = timestamp.get(..8).unwrap_or(timestamp);
    let hashed = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{date}/{region}/{service}/{SCOPE_TERMINATOR}\n{hashed}")
}

/// Derive the per-day, per-scope signing key.
///
/// ```text
/// k_date    = HMAC("AWS4" + secret, date8)
/// k_region  = HMAC(k_date, region)
/// k_service = HMAC(k_region, service)
/// k_signing = HMAC(k_service, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    [region, service, SCOPE_TERMINATOR].iter().fold(
        hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes()),
        |key, input| hmac_sha256(&key, input.as_bytes()),
    )
}

/// Lowercase hex HMAC-SHA256 of `string_to_sign` under `signing_key`.
#[must_use]
pub fn sign(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

/// Lowercase hex SHA-256 of a payload, the value clients put in
/// `x-amz-content-sha256` when they sign the body.
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// The payload token for the canonical request: the client's
/// `x-amz-content-sha256` value, or `UNSIGNED-PAYLOAD` when it sent none.
#[must_use]
pub fn payload_hash_token(headers: &HeaderMap) -> &str {
    headers
        .get(AMZ_CONTENT_SHA256)
        .and_then(|value| value.to_str().ok())
        .map_or(UNSIGNED_PAYLOAD, str::trim)
}

/// The request's `x-amz-date` value, checked against `YYYYMMDDTHHMMSSZ`.
pub fn request_timestamp(headers: &HeaderMap) -> Result<&str, AuthError> {
    let raw = headers
        .get(AMZ_DATE)
        .ok_or_else(|| AuthError::InvalidTimestamp(format!("missing {AMZ_DATE} header")))?
        .to_str()
        .map_err(|_| AuthError::InvalidTimestamp(format!("{AMZ_DATE} is not ASCII")))?
        .trim();

    chrono::NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| AuthError::InvalidTimestamp(format!("{raw}: {e}")))?;

    Ok(raw)
}

/// The host a request was addressed to: the `Host` header, or the URI
/// authority for HTTP/2 requests that carry `:authority` only.
#[must_use]
pub fn request_host(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
        .or_else(|| parts.uri.authority().map(http::uri::Authority::as_str))
}

/// Compute the signature `parts` would carry if it had been sent to `host`
/// with the scope declared in `auth`.
pub fn sign_request(
    parts: &Parts,
    auth: &AuthorizationHeader,
    secret: &str,
    host: &str,
) -> Result<String, AuthError> {
    let timestamp = request_timestamp(&parts.headers)?;
    let signed_headers = auth.sorted_signed_headers();

    let mut header_pairs: Vec<(&str, &str)> = Vec::with_capacity(signed_headers.len());
    for (idx, &name) in signed_headers.iter().enumerate() {
        if idx > 0 && signed_headers[idx - 1] == name {
            continue;
        }
        if name == "host" {
            header_pairs.push((name, host));
            continue;
        }
        header_pairs.extend(
            parts
                .headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(|value| (name, value)),
        );
    }

    let canonical_request = build_canonical_request(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().unwrap_or(""),
        &header_pairs,
        &signed_headers,
        payload_hash_token(&parts.headers),
    );
    debug!(canonical_request, "built canonical request");

    let region = &auth.credential.region;
    let service = &auth.credential.service;
    let string_to_sign = build_string_to_sign(timestamp, region, service, &canonical_request);
    let date = timestamp.get(..8).unwrap_or(timestamp);
    let key = derive_signing_key(secret, date, region, service);

    Ok(sign(&key, &string_to_sign))
}

/// Check the signature declared in `auth` against the one recomputed for
/// `host`. The comparison is constant time.
pub fn verify_request(
    parts: &Parts,
    auth: &AuthorizationHeader,
    secret: &str,
    host: &str,
) -> Result<(), AuthError> {
    let expected = sign_request(parts, auth, secret, host)?;
    let provided = auth.signature.to_ascii_lowercase();

    if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
        debug!(key_id = %auth.credential.key_id, "signature verified");
        Ok(())
    } else {
        debug!(key_id = %auth.credential.key_id, host, "signature mismatch");
        Err(AuthError::SignatureMismatch)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
