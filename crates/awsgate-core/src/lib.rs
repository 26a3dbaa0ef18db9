//! Shared building blocks for awsgate.
//!
//! Environment-driven configuration, the setup error type, and the
//! key/value [`Lookup`] collaborators the proxy consults per request
//! (key id to secret, inbound host to origin host, inbound host to service).

mod config;
mod error;
pub mod lookup;

pub use config::{GatewayConfig, parse_services_value};
pub use error::{GatewayError, GatewayResult};
pub use lookup::{Lookup, LookupError, SharedLookup, StaticLookup};
