//! # Configuration Modules
//!
//! This module aggregates the typed configuration for the stream transport:
//! the Redis connection settings, the consumer server settings and the
//! publisher registration. Every value is defaulted and validated before it
//! is handed to a connection, so a bad input never reaches the network.

// // Statements: Exporting sub-modules to make them accessible via lib_streams::configs
/// Redis connection settings (URL, host/port overrides, credentials, timeouts).
pub mod config_redis;

/// Consumer server and publisher registration settings.
pub mod config_streams;

/// Conversion of `validator` reports into `ConfigurationError`.
pub mod validation;

pub use config_redis::RedisConfig;
pub use config_streams::{StreamConfig, StreamRegistration, StreamServerConfig};
pub use validation::{from_serde_error, from_validation_errors, issue_messages};
