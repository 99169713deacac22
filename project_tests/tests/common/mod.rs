#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lib_streams::configs::{StreamRegistration, StreamServerConfig};
use lib_streams::connections::{MemoryStore, StreamStore};
use lib_streams::streams::StreamPublisher;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const STREAM: &str = "mystream";
pub const GROUP: &str = "test_group";
pub const CONSUMER: &str = "consumer-1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub value: String,
    pub user_id: i64,
}

impl UserCreated {
    pub fn new(user_id: i64) -> Self {
        Self { value: "hello world".to_string(), user_id }
    }
}

/// Fast timings so tests do not wait on defaults.
pub fn server_config() -> StreamServerConfig {
    let mut config = StreamServerConfig::for_streams([STREAM]);
    config.group = GROUP.to_string();
    config.consumer = CONSUMER.to_string();
    config.block_timeout_ms = 50;
    config.retry_delay_ms = 10;
    config.shutdown_grace_ms = 2_000;
    config
}

/// A second handle onto the same in-process streams, for a server to own.
pub fn server_store(store: &MemoryStore) -> Arc<dyn StreamStore> {
    Arc::new(store.new_connection())
}

pub fn publisher(store: &Arc<MemoryStore>) -> StreamPublisher {
    let store: Arc<dyn StreamStore> = store.clone();
    StreamPublisher::new(store, StreamRegistration::new(STREAM).expect("valid stream id"))
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
