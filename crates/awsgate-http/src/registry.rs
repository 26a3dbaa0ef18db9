//! Ordered set of service providers.
//!
//! Resolution walks providers in registration order and returns the first
//! whose [`ServiceProvider::matches`] accepts the request, so overlapping
//! predicates always resolve the same way.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::provider::ServiceProvider;
use crate::request::ProxiedRequest;

/// Providers keyed by service name, kept in registration order.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    providers: Vec<Arc<dyn ServiceProvider>>,
}

impl ServiceRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider`. See [`Self::register_shared`].
    pub fn register<P>(&mut self, provider: P) -> &mut Self
    where
        P: ServiceProvider + 'static,
    {
        self.register_shared(Arc::new(provider))
    }

    /// Register `provider` under its name. A provider already registered
    /// under that name is replaced in place, keeping its position.
    pub fn register_shared(&mut self, provider: Arc<dyn ServiceProvider>) -> &mut Self {
        let name = provider.name().to_owned();
        if let Some(slot) = self.providers.iter_mut().find(|p| p.name() == name) {
            warn!(service = %name, "replacing registered service provider");
            *slot = provider;
        } else {
            debug!(service = %name, position = self.providers.len(), "registered service provider");
            self.providers.push(provider);
        }
        self
    }

    /// The first provider, in registration order, that matches `req`.
    #[must_use]
    pub fn resolve(&self, req: &ProxiedRequest) -> Option<Arc<dyn ServiceProvider>> {
        self.providers.iter().find(|p| p.matches(req)).cloned()
    }

    /// The provider registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Registered service names, in order.
    #[must_use]
    pub fn service_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}
