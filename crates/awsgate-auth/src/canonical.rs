//! Canonical request construction for SigV4.
//!
//! The canonical request is the exact byte string both sides hash before
//! signing:
//!
//! ```text
//! METHOD\n
//! /canonical/uri\n
//! canonical=query\n
//! name:value\n ... \n
//! \n
//! signed;header;names\n
//! payload-hash-token
//! ```
//!
//! It is rebuilt for every verification and every re-sign, never cached.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Everything except the RFC 3986 unreserved characters gets percent-encoded.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Payload token used when the client did not send `x-amz-content-sha256`.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Build the canonical request string.
///
/// `headers` holds the request headers as `(name, value)` pairs; names are
/// matched case-insensitively. The caller is responsible for placing the
/// effective host under `host`. `signed_headers` may arrive in any order: it
/// is sorted here so the declared order in `SignedHeaders=` never influences
/// the result.
///
/// # Examples
///
/// ```
/// use awsgate_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/bucket/key",
///     "",
///     &[("host", "s3.example.com"), ("x-amz-date", "20240101T000000Z")],
///     &["x-amz-date", "host"],
///     "UNSIGNED-PAYLOAD",
/// );
/// assert!(canonical.contains("\nhost;x-amz-date\n"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &[(&str, &str)],
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    let mut names: Vec<String> = signed_headers
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();
    names.sort_unstable();
    names.dedup();

    let canonical_headers = canonical_headers(headers, &names);
    let signed = names.join(";");

    format!(
        "{method}\n{uri}\n{query}\n{canonical_headers}\n\n{signed}\n{payload_hash}",
        uri = canonical_uri(path),
        query = canonical_query(query),
    )
}

/// Canonical form of a request path.
///
/// Segments are decoded and re-encoded so a path that arrived already
/// percent-encoded is not encoded twice. `/` separators are kept.
///
/// ```
/// use awsgate_auth::canonical::canonical_uri;
///
/// assert_eq!(canonical_uri(""), "/");
/// assert_eq!(canonical_uri("/a b/c%20d"), "/a%20b/c%20d");
/// ```
#[must_use]
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }

    path.split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical form of a raw query string.
///
/// Names and values are decoded and re-encoded with uppercase hex, so `/`
/// becomes `%2F` and `%7e` becomes `~` no matter how the client spelled them.
/// Pairs are then sorted by encoded name, then by encoded value.
///
/// ```
/// use awsgate_auth::canonical::canonical_query;
///
/// assert_eq!(canonical_query("uploads&a=2&a=1"), "a=1&a=2&uploads=");
/// assert_eq!(canonical_query("prefix=a/b"), "prefix=a%2Fb");
/// ```
#[must_use]
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (encode_component(name), encode_component(value))
        })
        .collect();
    pairs.sort_unstable();

    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-decode `raw`, then encode everything outside the unreserved set.
fn encode_component(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    utf8_percent_encode(&decoded, UNRESERVED).to_string()
}

/// Render `name:value` lines for the (already sorted, lowercase) signed names.
///
/// Repeated headers are joined with `,`. A signed header the request does not
/// carry renders with an empty value; the signature comparison then fails
/// instead of the canonical form silently losing a line.
fn canonical_headers(headers: &[(&str, &str)], sorted_names: &[String]) -> String {
    let mut values: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = normalize_value(value);
        values
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    sorted_names
        .iter()
        .map(|name| {
            let value = values.get(name).map_or("", String::as_str);
            format!("{name}:{value}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim a header value and squeeze inner whitespace runs to one space.
fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
