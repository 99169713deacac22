//! # Stream Registration Settings
//!
//! `StreamServerConfig` describes what a consumer server reads (streams, group,
//! consumer name, block timeout, batch size); `StreamRegistration` names the
//! stream a publisher appends to. Both are validated at the point they are
//! registered.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::config_redis::RedisConfig;
use super::validation::{from_serde_error, from_validation_errors};
use crate::errors::ConfigurationError;

pub const DEFAULT_STREAM_ID: &str = "mystream";
pub const DEFAULT_GROUP: &str = "streams_group";
pub const DEFAULT_CONSUMER: &str = "consumer-1";

fn default_stream_id() -> String {
    DEFAULT_STREAM_ID.to_string()
}
fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}
fn default_consumer() -> String {
    DEFAULT_CONSUMER.to_string()
}
fn default_block_timeout_ms() -> i64 {
    5_000
}
fn default_batch_size() -> i64 {
    1
}
fn default_shutdown_grace_ms() -> i64 {
    6_000
}
fn default_retry_delay_ms() -> i64 {
    1_000
}

/// One stream to consume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StreamConfig {
    #[validate(length(min = 1, message = "Stream name cannot be empty"))]
    pub name: String,
}

impl From<&str> for StreamConfig {
    fn from(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

/// Settings for a consumer server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StreamServerConfig {
    /// Streams to consume from. A single group and consumer name is used for all of them.
    #[validate(length(min = 1, message = "At least one stream must be configured"), nested)]
    pub streams: Vec<StreamConfig>,

    #[serde(default = "default_group")]
    #[validate(length(min = 1, message = "Consumer group name cannot be empty"))]
    pub group: String,

    #[serde(default = "default_consumer")]
    #[validate(length(min = 1, message = "Consumer name cannot be empty"))]
    pub consumer: String,

    /// How long one read may block waiting for entries. `0` blocks until an entry arrives.
    #[serde(default = "default_block_timeout_ms")]
    #[validate(range(min = 0, message = "Block timeout must be non-negative"))]
    pub block_timeout_ms: i64,

    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, message = "Batch size must be at least 1"))]
    pub batch_size: i64,

    #[serde(default)]
    #[validate(nested)]
    pub redis: Option<RedisConfig>,

    /// Time allowed for an in-flight iteration to finish after a shutdown signal.
    #[serde(default = "default_shutdown_grace_ms")]
    #[validate(range(min = 0, message = "Shutdown grace period must be non-negative"))]
    pub shutdown_grace_ms: i64,

    /// Pause after a failed read before the next attempt.
    #[serde(default = "default_retry_delay_ms")]
    #[validate(range(min = 0, message = "Retry delay must be non-negative"))]
    pub retry_delay_ms: i64,
}

impl StreamServerConfig {
    /// Defaults for everything except the stream list. Not validated.
    pub fn for_streams<I, S>(streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            streams: streams
                .into_iter()
                .map(|name| StreamConfig { name: name.into() })
                .collect(),
            group: default_group(),
            consumer: default_consumer(),
            block_timeout_ms: default_block_timeout_ms(),
            batch_size: default_batch_size(),
            redis: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }

    pub fn parse(input: serde_json::Value) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_value(input).map_err(|e| from_serde_error(&e))?;
        config.validated()
    }

    pub fn validated(self) -> Result<Self, ConfigurationError> {
        self.validate().map_err(|e| from_validation_errors(&e))?;
        Ok(self)
    }

    pub fn stream_names(&self) -> Vec<String> {
        self.streams.iter().map(|s| s.name.clone()).collect()
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms.max(0) as u64)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1) as usize
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms.max(0) as u64)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.max(0) as u64)
    }

    /// Connection settings, falling back to defaults when none were given.
    pub fn redis_config(&self) -> RedisConfig {
        self.redis.clone().unwrap_or_default()
    }
}

/// Target stream for a publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StreamRegistration {
    #[serde(default = "default_stream_id")]
    #[validate(length(min = 1, message = "Stream ID cannot be empty"))]
    pub stream_id: String,
}

impl Default for StreamRegistration {
    fn default() -> Self {
        Self { stream_id: default_stream_id() }
    }
}

impl StreamRegistration {
    pub fn new(stream_id: impl Into<String>) -> Result<Self, ConfigurationError> {
        Self { stream_id: stream_id.into() }.validated()
    }

    pub fn parse(input: serde_json::Value) -> Result<Self, ConfigurationError> {
        let registration: Self = serde_json::from_value(input).map_err(|e| from_serde_error(&e))?;
        registration.validated()
    }

    pub fn validated(self) -> Result<Self, ConfigurationError> {
        self.validate().map_err(|e| from_validation_errors(&e))?;
        Ok(self)
    }
}
