//! SigV4 intercepting proxy engine.
//!
//! - **Engine** ([`proxy`]): [`AwsProxy`] verifies the inbound signature,
//!   resolves a [`ServiceProvider`] and streams its response.
//! - **Requests** ([`request`]): [`ProxiedRequest`] lets providers duplicate
//!   the body, forward re-signed to an origin, or hijack the response.
//! - **Providers** ([`provider`], [`s3`], [`registry`]): per-service
//!   matching, operation classification and overrides, in registration order.
//! - **Plumbing** ([`body`], [`sink`], [`upstream`]): streaming bodies,
//!   the single-use response sink and the origin client.
//! - **Service** ([`service`]): [`ProxyService`] adapts the engine to hyper.
//!
//! # Architecture
//!
//! ```text
//! HTTP Request
//!   -> ProxyService (health check)
//!     -> AwsProxy: parse Authorization -> key lookup -> verify
//!     -> ServiceRegistry::resolve (service lookup hint first)
//!     -> ServiceProvider::handle (override, or forward_and_resign)
//!   <- streamed origin response, JSON error, or hijacked sink
//! ```

pub mod body;
pub mod error;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod request;
pub mod s3;
pub mod service;
pub mod sink;
pub mod upstream;

pub use body::{ProxyBody, duplicate};
pub use error::ProxyError;
pub use provider::{
    Operation, OperationHandler, OperationHandlers, PassthroughProvider, ProviderContext,
    ServiceProvider,
};
pub use proxy::{AwsProxy, AwsProxyBuilder, ProxyOutcome};
pub use registry::ServiceRegistry;
pub use request::{ProxiedRequest, RequestCredentials};
pub use s3::{S3Operation, S3Provider};
pub use service::ProxyService;
pub use sink::{ChannelSink, ResponseSink};
pub use upstream::UpstreamClient;
