use anyhow::{Context, Result};
use clap::Parser;
use lib_streams::configs::config_streams::{DEFAULT_CONSUMER, DEFAULT_GROUP, DEFAULT_STREAM_ID};
use lib_streams::configs::{RedisConfig, StreamRegistration, StreamServerConfig};
use lib_streams::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_streams.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Redis Streams demo server: publishes user_created events and consumes them", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PORT", help = "HTTP port for the demo endpoints.")]
    pub port: Option<u16>,

    #[clap(long, env = "CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LOG_DIR", help = "Directory for rolled log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL", help = "Logging level or filter (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LOG_JSON", help = "Write console logs as JSON.")]
    pub log_json: Option<bool>,

    #[clap(long, env = "REDIS_URL", help = "Redis connection URL.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "STREAM", help = "Stream to publish to and consume from.")]
    pub stream: Option<String>,

    #[clap(long, env = "GROUP", help = "Consumer group name.")]
    pub group: Option<String>,

    #[clap(long, env = "CONSUMER", help = "Consumer name within the group.")]
    pub consumer: Option<String>,

    #[clap(long, env = "BLOCK_TIMEOUT_MS", allow_negative_numbers = true, help = "How long one read blocks waiting for entries (0 waits indefinitely).")]
    pub block_timeout_ms: Option<i64>,

    #[clap(long, env = "BATCH_SIZE", allow_negative_numbers = true, help = "Maximum entries per read.")]
    pub batch_size: Option<i64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_json: other.log_json.or(self.log_json),
            redis_url: other.redis_url.or(self.redis_url),
            stream: other.stream.or(self.stream),
            group: other.group.or(self.group),
            consumer: other.consumer.or(self.consumer),
            block_timeout_ms: other.block_timeout_ms.or(self.block_timeout_ms),
            batch_size: other.batch_size.or(self.batch_size),
        }
    }

    pub fn defaults() -> Config {
        Config {
            port: Some(3000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_json: Some(false),
            redis_url: Some(lib_streams::configs::config_redis::DEFAULT_REDIS_URL.to_string()),
            stream: Some(DEFAULT_STREAM_ID.to_string()),
            group: Some(DEFAULT_GROUP.to_string()),
            consumer: Some(DEFAULT_CONSUMER.to_string()),
            block_timeout_ms: Some(5_000),
            batch_size: Some(1),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(3000)
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    fn stream_name(&self) -> String {
        self.stream.clone().unwrap_or_else(|| DEFAULT_STREAM_ID.to_string())
    }

    /// Validated connection settings.
    pub fn redis_config(&self) -> Result<RedisConfig, ConfigurationError> {
        match &self.redis_url {
            Some(url) => RedisConfig::from_url(url.clone()),
            None => RedisConfig::default().validated(),
        }
    }

    /// Validated consumer server settings for the configured stream.
    pub fn server_config(&self) -> Result<StreamServerConfig, ConfigurationError> {
        let mut server = StreamServerConfig::for_streams([self.stream_name()]);
        if let Some(group) = &self.group {
            server.group = group.clone();
        }
        if let Some(consumer) = &self.consumer {
            server.consumer = consumer.clone();
        }
        if let Some(block) = self.block_timeout_ms {
            server.block_timeout_ms = block;
        }
        if let Some(batch) = self.batch_size {
            server.batch_size = batch;
        }
        server.redis = Some(self.redis_config()?);
        server.validated()
    }

    /// Validated publisher target.
    pub fn registration(&self) -> Result<StreamRegistration, ConfigurationError> {
        StreamRegistration::new(self.stream_name())
    }
}

/// Reads a JSON config file. A missing file yields `None`.
pub fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let file_config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(Some(file_config))
}

/// Layers defaults, then the config file, then environment/CLI values.
pub fn load_config(cli: Config) -> Result<Config> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }

    Ok(current_config.merge(cli))
}
