//! # Redis Stream Connection Manager
//!
//! Owns one auto-reconnecting multiplexed Redis connection
//! (`redis::aio::ConnectionManager`) and implements [`StreamStore`] on top of
//! the stream commands `XADD`, `XGROUP CREATE`, `XREADGROUP`, `XACK` and
//! `XPENDING`.
//!
//! Connection-level events are published on a broadcast channel and logged.
//! They are diagnostics only and never change control flow.
//!
//! A blocking `XREADGROUP` holds up every other command pipelined on the same
//! multiplexed connection, so a consumer server should get its own instance
//! built with [`StreamConnection::for_blocking_reads`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::{StreamPendingReply, StreamReadReply};
use redis::{Client, RedisError, RedisResult};
use tokio::sync::{broadcast, Mutex};

use super::stream_store::{ReadCursor, StreamEntry, StreamStore};
use crate::configs::RedisConfig;
use crate::errors::{ConfigurationError, StreamError, StreamResult};

/// Connection lifecycle notifications, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { address: String },
    Error { address: String, reason: String },
    Closed { address: String },
}

enum ConnState {
    Idle,
    Open(ConnectionManager),
    Closed,
}

/// The process-wide (or subtree-wide) Redis connection.
pub struct StreamConnection {
    client: Client,
    config: RedisConfig,
    address: String,
    /// `None` disables the per-command response timeout (blocking reads with no bound).
    response_timeout: Option<Duration>,
    state: Mutex<ConnState>,
    closed: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
}

impl StreamConnection {
    /// Validates the configuration and prepares the client. Nothing is dialled yet.
    pub fn new(config: RedisConfig) -> Result<Self, ConfigurationError> {
        let config = config.validated()?;
        let url = config.connection_url()?;
        let address = config.address();
        let client = Client::open(url.as_str())
            .map_err(|e| ConfigurationError::new("url", format!("{:?}", address), e.to_string()))?;
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            client,
            response_timeout: Some(config.command_timeout()),
            config,
            address,
            state: Mutex::new(ConnState::Idle),
            closed: AtomicBool::new(false),
            events,
        })
    }

    /// A connection whose response timeout leaves room for `XREADGROUP ... BLOCK block`.
    ///
    /// A zero `block` means reads may wait indefinitely, so the response
    /// timeout is disabled.
    pub fn for_blocking_reads(config: RedisConfig, block: Duration) -> Result<Self, ConfigurationError> {
        let mut connection = Self::new(config)?;
        connection.response_timeout = if block.is_zero() {
            None
        } else {
            Some(connection.config.command_timeout() + block)
        };
        Ok(connection)
    }

    /// A copy of the configuration this connection was built from.
    pub fn config(&self) -> RedisConfig {
        self.config.clone()
    }

    /// Subscribes to connection events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn open(&self, state: &mut ConnState) -> StreamResult<ConnectionManager> {
        // A single dial attempt, so a refused connection reports its own cause.
        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(Some(self.config.connect_timeout()))
            .set_response_timeout(self.response_timeout);

        let connecting = self.client.get_connection_manager_with_config(manager_config);
        let manager = match tokio::time::timeout(self.config.connect_timeout(), connecting).await {
            Ok(Ok(manager)) => manager,
            Ok(Err(e)) => return Err(self.connect_failed(e.to_string())),
            Err(_) => {
                return Err(self.connect_failed(format!(
                    "timed out after {}ms",
                    self.config.connect_timeout().as_millis()
                )))
            }
        };

        *state = ConnState::Open(manager.clone());
        tracing::info!(address = %self.address, "Connected to Redis");
        self.emit(ConnectionEvent::Connected { address: self.address.clone() });
        Ok(manager)
    }

    fn connect_failed(&self, reason: String) -> StreamError {
        tracing::error!(address = %self.address, %reason, "Redis connection failed");
        self.emit(ConnectionEvent::Error {
            address: self.address.clone(),
            reason: reason.clone(),
        });
        StreamError::Connection {
            address: self.address.clone(),
            reason,
        }
    }

    /// A clone of the live connection, dialling it first if needed.
    async fn handle(&self) -> StreamResult<ConnectionManager> {
        let mut state = self.state.lock().await;
        if let ConnState::Open(manager) = &*state {
            return Ok(manager.clone());
        }
        if matches!(*state, ConnState::Closed) {
            return Err(StreamError::ConnectionClosed);
        }
        self.open(&mut state).await
    }

    fn command_error(&self, command: &'static str, err: RedisError) -> StreamError {
        if self.closed.load(Ordering::SeqCst) {
            return StreamError::ConnectionClosed;
        }
        if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
            tracing::warn!(address = %self.address, command, error = %err, "Redis connection error");
            self.emit(ConnectionEvent::Error {
                address: self.address.clone(),
                reason: err.to_string(),
            });
        }
        StreamError::Command {
            command,
            reason: err.to_string(),
        }
    }
}

fn into_entries(reply: StreamReadReply) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    for key in reply.keys {
        for stream_id in key.ids {
            let mut fields: Vec<(String, String)> = stream_id
                .map
                .keys()
                .filter_map(|name| stream_id.get::<String>(name).map(|value| (name.clone(), value)))
                .collect();
            fields.sort();
            entries.push(StreamEntry {
                stream: key.key.clone(),
                id: stream_id.id.clone(),
                fields,
            });
        }
    }
    entries
}

#[async_trait]
impl StreamStore for StreamConnection {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> StreamResult<()> {
        self.handle().await.map(|_| ())
    }

    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> StreamResult<String> {
        let mut conn = self.handle().await?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(*name).arg(*value);
        }
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("XADD", e))?;
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> StreamResult<()> {
        let mut conn = self.handle().await?;
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Err(StreamError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
            Err(e) => Err(self.command_error("XGROUP CREATE", e)),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, ReadCursor)],
        count: usize,
        block: Option<Duration>,
    ) -> StreamResult<Vec<StreamEntry>> {
        let mut conn = self.handle().await?;
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS");
        for (stream, _) in cursors {
            cmd.arg(stream.as_str());
        }
        for (_, cursor) in cursors {
            cmd.arg(cursor.as_id());
        }

        // A timed-out block replies nil.
        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("XREADGROUP", e))?;

        Ok(reply.map(into_entries).unwrap_or_default())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64> {
        let mut conn = self.handle().await?;
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(*id);
        }
        let acked: u64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("XACK", e))?;
        Ok(acked)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> StreamResult<u64> {
        let mut conn = self.handle().await?;
        let reply: StreamPendingReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error("XPENDING", e))?;
        Ok(reply.count() as u64)
    }

    async fn close(&self) -> StreamResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, ConnState::Closed)
        };

        if let ConnState::Open(mut conn) = previous {
            let quit = async {
                let result: RedisResult<()> = redis::cmd("QUIT").query_async(&mut conn).await;
                result
            };
            match tokio::time::timeout(self.config.command_timeout(), quit).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(address = %self.address, error = %e, "QUIT failed"),
                Err(_) => tracing::debug!(address = %self.address, "QUIT timed out"),
            }
        }

        tracing::info!(address = %self.address, "Redis connection closed");
        self.emit(ConnectionEvent::Closed { address: self.address.clone() });
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
