//! Gateway configuration.
//!
//! All configuration is driven by environment variables. Defaults are applied
//! first, then each variable that is set overrides its field.

use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Configuration for one gateway process.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Bind address (`GATEWAY_LISTEN`).
    pub listen: String,
    /// Log filter used when `RUST_LOG` is unset (`LOG_LEVEL`).
    pub log_level: String,
    /// Providers to register, in registration order (`SERVICES`).
    pub services: Vec<String>,
    /// Name of the env var holding the key id to secret JSON map (`KEYS_ENV`).
    pub keys_env: String,
    /// Name of the env var holding the inbound host to origin host JSON map (`HOSTS_ENV`).
    pub hosts_env: String,
    /// Name of the env var holding the inbound host to service JSON map (`SERVICE_HOSTS_ENV`).
    pub service_hosts_env: String,
    /// Scheme for forwarded requests, `https` or `http` (`UPSTREAM_SCHEME`).
    pub upstream_scheme: String,
    /// How long to wait for origin response headers (`UPSTREAM_TIMEOUT_SECS`).
    pub upstream_timeout_secs: u64,
    /// Per-stream chunk capacity for body duplication (`BODY_BUFFER_CHUNKS`).
    pub body_buffer_chunks: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_owned(),
            log_level: "info".to_owned(),
            services: vec!["s3".to_owned()],
            keys_env: "GATEWAY_KEYS".to_owned(),
            hosts_env: "GATEWAY_HOSTS".to_owned(),
            service_hosts_env: "GATEWAY_SERVICE_HOSTS".to_owned(),
            upstream_scheme: "https".to_owned(),
            upstream_timeout_secs: 60,
            body_buffer_chunks: 16,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_source(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_source<F>(var: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = var("GATEWAY_LISTEN") {
            config.listen = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = var("SERVICES") {
            config.services = parse_services_value(&v);
        }
        if let Some(v) = var("KEYS_ENV") {
            config.keys_env = v;
        }
        if let Some(v) = var("HOSTS_ENV") {
            config.hosts_env = v;
        }
        if let Some(v) = var("SERVICE_HOSTS_ENV") {
            config.service_hosts_env = v;
        }
        if let Some(v) = var("UPSTREAM_SCHEME") {
            config.upstream_scheme = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = var("UPSTREAM_TIMEOUT_SECS") {
            config.upstream_timeout_secs = parse_number("UPSTREAM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("BODY_BUFFER_CHUNKS") {
            config.body_buffer_chunks = parse_number("BODY_BUFFER_CHUNKS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> GatewayResult<()> {
        if !matches!(self.upstream_scheme.as_str(), "http" | "https") {
            return Err(GatewayError::Config(format!(
                "UPSTREAM_SCHEME must be http or https, got {}",
                self.upstream_scheme
            )));
        }
        if self.body_buffer_chunks == 0 {
            return Err(GatewayError::Config(
                "BODY_BUFFER_CHUNKS must be at least 1".to_owned(),
            ));
        }
        if self.services.is_empty() {
            return Err(GatewayError::Config("SERVICES lists no services".to_owned()));
        }
        Ok(())
    }

    /// [`Self::upstream_timeout_secs`] as a [`Duration`].
    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

/// Parse a comma-separated services string.
///
/// Names are trimmed and lowercased, duplicates dropped keeping the first
/// occurrence. A blank value yields the default (`s3`).
#[must_use]
pub fn parse_services_value(raw: &str) -> Vec<String> {
    let mut services: Vec<String> = Vec::new();
    for name in raw.split(',').map(|s| s.trim().to_ascii_lowercase()) {
        if !name.is_empty() && !services.contains(&name) {
            services.push(name);
        }
    }
    if services.is_empty() {
        services.push("s3".to_owned());
    }
    services
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> GatewayResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| GatewayError::Config(format!("{name} must be a non-negative integer, got {raw}")))
}
