//! Service providers: the per-service capability set the engine dispatches to.
//!
//! A provider decides whether it serves a request ([`ServiceProvider::matches`]),
//! names the operation ([`ServiceProvider::classify`]) and produces the
//! response ([`ServiceProvider::handle`]). The default `handle` runs a
//! registered [`OperationHandler`] for the operation if there is one, and
//! otherwise forwards the request re-signed to the service's origin.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use awsgate_core::SharedLookup;
use tracing::debug;

use crate::body::ProxyBody;
use crate::error::ProxyError;
use crate::request::ProxiedRequest;

/// An operation name such as `GetObject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Operation(Cow<'static, str>);

impl Operation {
    /// Sentinel for requests no classification rule recognises.
    pub const UNKNOWN: Self = Self(Cow::Borrowed("Unknown"));

    /// Build an operation name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The operation name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is [`Self::UNKNOWN`].
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Operation {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Operation {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// Replacement behaviour for one operation of a provider.
///
/// Handlers get the request mutably: they may inspect or duplicate the body,
/// call [`ProxiedRequest::forward_and_resign`] (again after
/// [`ProxiedRequest::set_body`], to retry),
/// or [`ProxiedRequest::hijack`] the response entirely.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Produce the response for this operation.
    async fn handle(
        &self,
        ctx: &ProviderContext,
        req: &mut ProxiedRequest,
    ) -> Result<http::Response<ProxyBody>, ProxyError>;
}

/// Explicit operation → handler table.
#[derive(Default, Clone)]
pub struct OperationHandlers {
    handlers: HashMap<Operation, Arc<dyn OperationHandler>>,
}

impl OperationHandlers {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `operation`, returning the one it replaces.
    pub fn register(
        &mut self,
        operation: impl Into<Operation>,
        handler: Arc<dyn OperationHandler>,
    ) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.insert(operation.into(), handler)
    }

    /// The handler registered for `operation`.
    #[must_use]
    pub fn get(&self, operation: &Operation) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(operation).cloned()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for OperationHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations: Vec<&str> = self.handlers.keys().map(Operation::as_str).collect();
        operations.sort_unstable();
        f.debug_struct("OperationHandlers")
            .field("operations", &operations)
            .finish()
    }
}

/// Per-request dependencies handed to providers and handlers.
#[derive(Clone)]
pub struct ProviderContext {
    request_id: String,
    host_lookup: Option<SharedLookup>,
}

impl ProviderContext {
    /// Build a context. Without a host lookup every request goes to the
    /// provider's default origin.
    #[must_use]
    pub fn new(request_id: impl Into<String>, host_lookup: Option<SharedLookup>) -> Self {
        Self {
            request_id: request_id.into(),
            host_lookup,
        }
    }

    /// Id of the request being handled.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The origin host for `inbound_host`: the host lookup's answer, or
    /// `fallback` when it has none.
    ///
    /// The lookup is tried with the lowercased host and then without its
    /// port.
    pub async fn resolve_target(
        &self,
        inbound_host: &str,
        fallback: &str,
    ) -> Result<String, ProxyError> {
        if let Some(lookup) = &self.host_lookup {
            for candidate in host_candidates(inbound_host) {
                if let Some(target) = lookup.lookup(&candidate).await? {
                    debug!(request_id = %self.request_id, inbound_host, %target, "resolved origin host");
                    return Ok(target);
                }
            }
        }
        Ok(fallback.to_owned())
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("request_id", &self.request_id)
            .field("host_lookup", &self.host_lookup.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Lookup keys for a host: lowercased as-is, then without the port.
pub(crate) fn host_candidates(host: &str) -> Vec<String> {
    let host = host.to_ascii_lowercase();
    let bare = match host.rsplit_once(':') {
        // Bracketed IPv6 literals keep their colons.
        Some((name, port)) if !name.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            Some(name.to_owned())
        }
        _ => None,
    };
    let mut candidates = vec![host];
    candidates.extend(bare);
    candidates
}

/// A proxied AWS service.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Service name, e.g. `s3`.
    fn name(&self) -> &str;

    /// Whether this provider serves `req`. By default, true when the inbound
    /// host contains `<name>.`.
    fn matches(&self, req: &ProxiedRequest) -> bool {
        let needle = format!("{}.", self.name());
        req.original_host().to_ascii_lowercase().contains(&needle)
    }

    /// Best-effort operation name; [`Operation::UNKNOWN`] when unrecognised.
    fn classify(&self, _req: &ProxiedRequest) -> Operation {
        Operation::UNKNOWN
    }

    /// Override registered for `operation`, if any.
    fn operation_handler(&self, _operation: &Operation) -> Option<Arc<dyn OperationHandler>> {
        None
    }

    /// Origin used when the host lookup has no entry for the inbound host.
    fn default_origin(&self) -> String {
        format!("{}.amazonaws.com", self.name())
    }

    /// Produce the response for `req`.
    async fn handle(
        &self,
        ctx: &ProviderContext,
        req: &mut ProxiedRequest,
    ) -> Result<http::Response<ProxyBody>, ProxyError> {
        let operation = self.classify(req);
        if let Some(handler) = self.operation_handler(&operation) {
            debug!(request_id = %ctx.request_id(), service = self.name(), %operation, "running operation handler");
            return handler.handle(ctx, req).await;
        }

        let inbound = req.original_host().to_owned();
        let target = ctx.resolve_target(&inbound, &self.default_origin()).await?;
        debug!(request_id = %ctx.request_id(), service = self.name(), %operation, %target, "forwarding to origin");
        req.forward_and_resign(&target).await
    }
}

/// A provider that only forwards: default matching, no classification, no
/// overrides.
#[derive(Debug, Clone)]
pub struct PassthroughProvider {
    name: String,
}

impl PassthroughProvider {
    /// A passthrough provider for service `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ServiceProvider for PassthroughProvider {
    fn name(&self) -> &str {
        &self.name
    }
}
