//! The object-storage provider.
//!
//! Classification only needs the method, the path shape and a few query keys.
//! Bucket and key come from the path; virtual-hosted bucket names stay in the
//! host and are forwarded untouched.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use percent_encoding::percent_decode_str;

use crate::provider::{Operation, OperationHandler, OperationHandlers, ServiceProvider};
use crate::request::ProxiedRequest;

/// S3 operations the provider recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3Operation {
    /// `GET /bucket?list-type=2`
    ListObjectsV2,
    /// `POST /bucket/key?uploads`
    CreateMultipartUpload,
    /// `GET /bucket?uploads`
    ListMultipartUploads,
    /// `GET /bucket/key`
    GetObject,
    /// `PUT /bucket/key`
    PutObject,
    /// `DELETE /bucket/key`
    DeleteObject,
    /// `PUT /bucket`
    CreateBucket,
    /// `DELETE /bucket`
    DeleteBucket,
    /// `GET /bucket`
    ListObjects,
    /// No rule matched.
    Unknown,
}

impl S3Operation {
    /// The AWS operation name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListObjectsV2 => "ListObjectsV2",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::ListMultipartUploads => "ListMultipartUploads",
            Self::GetObject => "GetObject",
            Self::PutObject => "PutObject",
            Self::DeleteObject => "DeleteObject",
            Self::CreateBucket => "CreateBucket",
            Self::DeleteBucket => "DeleteBucket",
            Self::ListObjects => "ListObjects",
            Self::Unknown => "Unknown",
        }
    }

    /// Classify a request. Rules are checked in order: `list-type` query,
    /// `uploads` query, object path, bucket path.
    #[must_use]
    pub fn classify(method: &Method, path: &str, query: Option<&str>) -> Self {
        let query = query.unwrap_or("");
        if query_has_key(query, "list-type") {
            return Self::ListObjectsV2;
        }
        if query_has_key(query, "uploads") {
            return if *method == Method::POST {
                Self::CreateMultipartUpload
            } else {
                Self::ListMultipartUploads
            };
        }

        let (bucket, key) = bucket_and_key(path);
        if !bucket.is_empty() && !key.is_empty() && !path.ends_with('/') {
            return match *method {
                Method::GET => Self::GetObject,
                Method::PUT => Self::PutObject,
                Method::DELETE => Self::DeleteObject,
                _ => Self::Unknown,
            };
        }
        if !bucket.is_empty() && key.is_empty() {
            return match *method {
                Method::PUT => Self::CreateBucket,
                Method::DELETE => Self::DeleteBucket,
                Method::GET => Self::ListObjects,
                _ => Self::Unknown,
            };
        }
        Self::Unknown
    }
}

impl fmt::Display for S3Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<S3Operation> for Operation {
    fn from(op: S3Operation) -> Self {
        match op {
            S3Operation::Unknown => Operation::UNKNOWN,
            other => Operation::from(other.as_str()),
        }
    }
}

/// Split a path into `(bucket, key)`: strip one leading `/` and split on the
/// first remaining `/`. The key may be empty.
#[must_use]
pub fn bucket_and_key(path: &str) -> (&str, &str) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    trimmed.split_once('/').unwrap_or((trimmed, ""))
}

fn query_has_key(query: &str, key: &str) -> bool {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').map_or(pair, |(k, _)| k))
        .any(|k| percent_decode_str(k).decode_utf8_lossy() == key)
}

/// Provider for `s3.` hosts.
#[derive(Debug, Clone, Default)]
pub struct S3Provider {
    handlers: OperationHandlers,
    origin: Option<String>,
}

impl S3Provider {
    /// A provider that forwards everything to `s3.amazonaws.com`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward to `origin` instead of `s3.amazonaws.com` when the host lookup
    /// has no entry.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Run `handler` instead of forwarding for `operation`.
    pub fn register_operation_handler(
        &mut self,
        operation: S3Operation,
        handler: Arc<dyn OperationHandler>,
    ) -> &mut Self {
        self.handlers.register(operation, handler);
        self
    }
}

#[async_trait]
impl ServiceProvider for S3Provider {
    fn name(&self) -> &str {
        "s3"
    }

    fn classify(&self, req: &ProxiedRequest) -> Operation {
        S3Operation::classify(req.method(), req.uri().path(), req.uri().query()).into()
    }

    fn operation_handler(&self, operation: &Operation) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(operation)
    }

    fn default_origin(&self) -> String {
        self.origin
            .clone()
            .unwrap_or_else(|| "s3.amazonaws.com".to_owned())
    }
}
