//! Outbound client for forwarded requests.
//!
//! Request and response bodies are streamed through; neither is collected
//! into memory. Hop-by-hop headers are connection-scoped and are stripped in
//! both directions.

use std::io;
use std::time::Duration;

use futures::TryStreamExt;
use http::header::{CONNECTION, HeaderName};
use http::uri::{PathAndQuery, Scheme};
use http::{HeaderMap, Method, Uri};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use tracing::debug;

use crate::body::ProxyBody;
use crate::error::ProxyError;

/// Headers that only apply to a single transport hop.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let nominated: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in nominated {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// HTTP client used to reach origin hosts.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    scheme: Scheme,
    timeout: Duration,
}

impl UpstreamClient {
    /// Build a client that talks `scheme` (`http` or `https`) and waits at
    /// most `timeout` for origin response headers.
    pub fn new(scheme: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let scheme = match scheme {
            "https" => Scheme::HTTPS,
            "http" => Scheme::HTTP,
            other => {
                return Err(ProxyError::InvalidTarget(format!(
                    "unsupported upstream scheme {other:?}"
                )));
            }
        };

        // Origin redirects go back to the client untouched.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ProxyError::Upstream)?;

        Ok(Self {
            client,
            scheme,
            timeout,
        })
    }

    /// Scheme used for forwarded requests.
    #[must_use]
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Header timeout for origin calls.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The absolute URI for `path_and_query` on `host`.
    pub fn target_uri(
        &self,
        host: &str,
        path_and_query: Option<&PathAndQuery>,
    ) -> Result<Uri, ProxyError> {
        let path_and_query = path_and_query.map_or("/", PathAndQuery::as_str);
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(host)
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::InvalidTarget(format!("{host}: {e}")))
    }

    /// Send a request and return the origin response with its body still
    /// streaming.
    pub async fn send(
        &self,
        method: Method,
        uri: &Uri,
        mut headers: HeaderMap,
        body: ProxyBody,
    ) -> Result<http::Response<ProxyBody>, ProxyError> {
        strip_hop_by_hop(&mut headers);

        let request = self
            .client
            .request(method, uri.to_string())
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));

        let mut response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(self.timeout))?
            .map_err(ProxyError::Upstream)?;

        let status = response.status();
        debug!(%uri, %status, "origin responded");

        let mut headers = std::mem::take(response.headers_mut());
        strip_hop_by_hop(&mut headers);

        let stream = response
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(io::Error::other);

        let mut forwarded = http::Response::new(StreamBody::new(stream).boxed_unsync());
        *forwarded.status_mut() = status;
        *forwarded.headers_mut() = headers;
        Ok(forwarded)
    }
}
