//! Parsing and re-serialization of the SigV4 `Authorization` header.
//!
//! ```text
//! AWS4-HMAC-SHA256 Credential=AKID/20130524/us-east-1/s3/aws4_request,
//!   SignedHeaders=host;range;x-amz-date, Signature=<64 hex chars>
//! ```
//!
//! Fields are separated by any run of whitespace and/or commas, so both the
//! SDK form (`, `) and hand-written variants with doubled spaces parse.

use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;

/// The only algorithm this codec speaks.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Literal that terminates every credential scope.
pub const SCOPE_TERMINATOR: &str = "aws4_request";

/// The `Credential=` component: `keyid/date/region/service/aws4_request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCredential {
    /// Access key id used to look up the secret.
    pub key_id: String,
    /// Scope date, `YYYYMMDD`.
    pub date: String,
    /// Scope region, e.g. `us-east-1`.
    pub region: String,
    /// Scope service, e.g. `s3`.
    pub service: String,
    /// Always `aws4_request`.
    pub terminator: String,
}

impl AuthorizationCredential {
    /// The credential scope without the key id: `date/region/service/aws4_request`.
    #[must_use]
    pub fn scope(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.date, self.region, self.service, self.terminator
        )
    }
}

impl FromStr for AuthorizationCredential {
    type Err = AuthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = raw.split('/').collect();
        let [key_id, date, region, service, terminator] = segments.as_slice() else {
            return Err(AuthError::InvalidCredential(format!(
                "expected 5 segments, got {}",
                segments.len()
            )));
        };

        if *terminator != SCOPE_TERMINATOR {
            return Err(AuthError::InvalidCredential(format!(
                "scope must end with {SCOPE_TERMINATOR}, got {terminator}"
            )));
        }
        if key_id.is_empty() || date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AuthError::InvalidCredential(
                "key id must be non-empty and date must be YYYYMMDD".to_owned(),
            ));
        }

        Ok(Self {
            key_id: (*key_id).to_owned(),
            date: (*date).to_owned(),
            region: (*region).to_owned(),
            service: (*service).to_owned(),
            terminator: (*terminator).to_owned(),
        })
    }
}

impl fmt::Display for AuthorizationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.key_id, self.date, self.region, self.service, self.terminator
        )
    }
}

/// A parsed `Authorization` header.
///
/// `signed_headers` keeps the order the client declared. Canonicalization
/// sorts its own copy, see [`AuthorizationHeader::sorted_signed_headers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    /// The `Credential=` component.
    pub credential: AuthorizationCredential,
    /// Lowercase header names from `SignedHeaders=`.
    pub signed_headers: Vec<String>,
    /// Hex signature from `Signature=`.
    pub signature: String,
}

impl AuthorizationHeader {
    /// Signed header names in ascending order, as canonicalization needs them.
    #[must_use]
    pub fn sorted_signed_headers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.signed_headers.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl FromStr for AuthorizationHeader {
    type Err = AuthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_authorization_header(raw)
    }
}

impl fmt::Display for AuthorizationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ALGORITHM} Credential={}, SignedHeaders={}, Signature={}",
            self.credential,
            self.signed_headers.join(";"),
            self.signature
        )
    }
}

/// Parse a raw `Authorization` header value.
///
/// Unknown `key=value` fields are ignored.
///
/// # Examples
///
/// ```
/// use awsgate_auth::parse_authorization_header;
///
/// let auth = parse_authorization_header(
///     "AWS4-HMAC-SHA256 Credential=AKID/20240101/us-east-1/s3/aws4_request,  \
///      SignedHeaders=host;x-amz-date, Signature=abc123",
/// )
/// .unwrap();
/// assert_eq!(auth.credential.key_id, "AKID");
/// assert_eq!(auth.signed_headers, ["host", "x-amz-date"]);
/// ```
pub fn parse_authorization_header(raw: &str) -> Result<AuthorizationHeader, AuthError> {
    let mut tokens = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty());

    let algorithm = tokens
        .next()
        .ok_or_else(|| AuthError::MalformedHeader("empty header".to_owned()))?;
    if algorithm != ALGORITHM {
        return Err(AuthError::UnsupportedAlgorithm(algorithm.to_owned()));
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "Credential" => credential = Some(value),
            "SignedHeaders" => signed_headers = Some(value),
            "Signature" => signature = Some(value),
            _ => {}
        }
    }

    let credential = credential
        .ok_or_else(|| AuthError::MalformedHeader("missing Credential".to_owned()))?
        .parse::<AuthorizationCredential>()?;

    let signed_headers: Vec<String> = signed_headers
        .ok_or_else(|| AuthError::MalformedHeader("missing SignedHeaders".to_owned()))?
        .split(';')
        .filter(|name| !name.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if signed_headers.is_empty() {
        return Err(AuthError::MalformedHeader("empty SignedHeaders".to_owned()));
    }

    let signature = signature
        .filter(|sig| !sig.is_empty())
        .ok_or_else(|| AuthError::MalformedHeader("missing Signature".to_owned()))?;

    Ok(AuthorizationHeader {
        credential,
        signed_headers,
        signature: signature.to_owned(),
    })
}
