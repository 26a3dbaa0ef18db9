//! Key/value lookup collaborators.
//!
//! The proxy resolves three things per request through these: the secret for
//! an access key id, the origin host for an inbound virtual host, and
//! optionally the service name for an inbound host. Backends may be remote,
//! so lookups are async; dropping the returned future abandons the lookup.
//!
//! ```
//! use awsgate_core::{Lookup, StaticLookup};
//!
//! let keys = StaticLookup::from_pairs([("AKIDEXAMPLE", "secret".to_owned())]);
//! # tokio_test::block_on(async {
//! assert_eq!(keys.lookup("AKIDEXAMPLE").await.unwrap().as_deref(), Some("secret"));
//! assert!(keys.lookup("AKIDOTHER").await.unwrap().is_none());
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

/// Failure of the lookup backend itself. "No such key" is not an error: it is
/// reported as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The backend could not be reached or answered with garbage.
    #[error("lookup backend unavailable: {0}")]
    Unavailable(String),
}

/// A read-only key/value source.
#[async_trait]
pub trait Lookup<V: Send>: Send + Sync {
    /// Resolve `key`. `Ok(None)` means the backend answered and has no entry.
    async fn lookup(&self, key: &str) -> Result<Option<V>, LookupError>;
}

/// Type-erased string lookup, the form the proxy holds.
pub type SharedLookup = Arc<dyn Lookup<String>>;

/// In-memory lookup built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct StaticLookup<V> {
    entries: HashMap<String, V>,
}

impl<V> Default for StaticLookup<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> StaticLookup<V> {
    /// An empty lookup; every key resolves to `None`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs. Later duplicates win.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the lookup has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StaticLookup<String> {
    /// Parse a JSON object of string to string, e.g. `{"AKID":"secret"}`.
    ///
    /// `source` names where the JSON came from, for error messages.
    pub fn from_json(raw: &str, source: &str) -> GatewayResult<Self> {
        let entries: HashMap<String, String> = serde_json::from_str(raw).map_err(|e| {
            GatewayError::Config(format!("{source} must be a JSON object of strings: {e}"))
        })?;
        Ok(Self { entries })
    }

    /// Load from the JSON object held in environment variable `var`.
    ///
    /// An unset or blank variable yields an empty lookup.
    pub fn from_env_json(var: &str) -> GatewayResult<Self> {
        match std::env::var(var) {
            Ok(raw) if !raw.trim().is_empty() => {
                let lookup = Self::from_json(&raw, var)?;
                debug!(var, entries = lookup.len(), "loaded lookup from environment");
                Ok(lookup)
            }
            _ => Ok(Self::new()),
        }
    }
}

#[async_trait]
impl<V> Lookup<V> for StaticLookup<V>
where
    V: Clone + Send + Sync,
{
    async fn lookup(&self, key: &str) -> Result<Option<V>, LookupError> {
        Ok(self.entries.get(key).cloned())
    }
}
