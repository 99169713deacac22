//! # Consumer Group Server
//!
//! Joins a consumer group on one or more streams and runs a poll loop on its
//! own task. Every delivered entry is routed by its `pattern` field to the
//! registered handler. The payload is checked against the handler's schema,
//! the handler runs to completion, and only then is the entry acknowledged.
//! Entries that cannot be processed stay pending and are delivered again.
//!
//! ## Lifecycle
//!
//! `CREATED → LISTENING → POLLING → STOPPING → STOPPED`
//!
//! - [`ConsumerServer::listen`] connects, ensures the group exists on every
//!   stream, spawns the poll loop and reports readiness.
//! - [`ConsumerServer::on_shutdown`] stops the loop, gives an in-flight entry
//!   up to the grace period to finish, then closes the connection.
//! - [`ConsumerServer::close`] closes the connection directly. It is idempotent.
//!
//! ## Redelivery
//!
//! `>` reads only return entries never delivered to the group. Before its
//! first blocking read, and after any batch that left an entry pending, the
//! loop pages through this consumer's pending history so those entries are
//! retried, including ones delivered before a restart. While a pass leaves
//! entries pending, another one runs every `retry_delay`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::publisher::{DATA_FIELD, PATTERN_FIELD};
use super::registry::{HandlerRegistry, MessageHandler};
use super::schema::PayloadSchema;
use crate::configs::StreamServerConfig;
use crate::connections::{ReadCursor, StreamConnection, StreamEntry, StreamStore};
use crate::errors::{ConfigurationError, StreamError, StreamResult};

/// Group creation start position: the beginning of the stream.
const GROUP_START_ID: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    Polling,
    Stopping,
    Stopped,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Created => "CREATED",
            ServerState::Listening => "LISTENING",
            ServerState::Polling => "POLLING",
            ServerState::Stopping => "STOPPING",
            ServerState::Stopped => "STOPPED",
        }
    }
}

/// How one entry was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acked,
    /// No handler for the pattern; the entry stays pending.
    Unregistered,
}

pub struct ConsumerServer {
    config: StreamServerConfig,
    store: Arc<dyn StreamStore>,
    registry: HandlerRegistry,
    state: watch::Sender<ServerState>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    span: tracing::Span,
}

impl ConsumerServer {
    /// Builds a server with its own Redis connection sized for blocking reads.
    pub fn new(config: StreamServerConfig) -> Result<Self, ConfigurationError> {
        let config = config.validated()?;
        let connection = StreamConnection::for_blocking_reads(config.redis_config(), config.block_timeout())?;
        Self::with_store(config, Arc::new(connection))
    }

    /// Builds a server over an existing store. The server closes it on shutdown.
    pub fn with_store(config: StreamServerConfig, store: Arc<dyn StreamStore>) -> Result<Self, ConfigurationError> {
        let config = config.validated()?;
        let span = tracing::info_span!(
            "consumer_server",
            group = %config.group,
            consumer = %config.consumer,
        );
        let (state, _) = watch::channel(ServerState::Created);

        Ok(Self {
            config,
            store,
            registry: HandlerRegistry::new(),
            state,
            stop: CancellationToken::new(),
            task: Mutex::new(None),
            span,
        })
    }

    /// Replaces the span the server and its poll loop log under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> StreamServerConfig {
        self.config.clone()
    }

    /// The connection the server reads from. Dependents must not close it.
    pub fn store(&self) -> Arc<dyn StreamStore> {
        Arc::clone(&self.store)
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn ensure_registrable(&self) -> StreamResult<()> {
        if self.state() == ServerState::Created {
            Ok(())
        } else {
            Err(StreamError::RegistryFrozen)
        }
    }

    /// Registers a JSON handler for `pattern`. Only allowed before [`listen`](Self::listen).
    pub fn register_handler<S, F, Fut>(&mut self, pattern: impl Into<String>, schema: S, handler: F) -> StreamResult<()>
    where
        S: PayloadSchema + 'static,
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.ensure_registrable()?;
        self.registry.register(pattern, schema, handler);
        Ok(())
    }

    /// Registers a [`MessageHandler`] implementor for `pattern`.
    pub fn register_message_handler<S, H>(&mut self, pattern: impl Into<String>, schema: S, handler: H) -> StreamResult<()>
    where
        S: PayloadSchema + 'static,
        H: MessageHandler + 'static,
    {
        self.ensure_registrable()?;
        self.registry.register_handler(pattern, schema, handler);
        Ok(())
    }

    /// Registers a typed handler for `pattern`. Only allowed before [`listen`](Self::listen).
    pub fn on<T, F, Fut>(&mut self, pattern: impl Into<String>, handler: F) -> StreamResult<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + validator::Validate + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.ensure_registrable()?;
        self.registry.on(pattern, handler);
        Ok(())
    }

    /// Connects, ensures the group exists and starts polling.
    ///
    /// `on_ready` runs once the poll loop is scheduled; `listen` does not wait
    /// for the loop. Fails with `InvalidState` unless the server is `CREATED`.
    pub async fn listen<F>(&self, on_ready: F) -> StreamResult<()>
    where
        F: FnOnce(),
    {
        if let Err(actual) = self.transition(ServerState::Created, ServerState::Listening) {
            return Err(StreamError::InvalidState {
                expected: ServerState::Created.as_str(),
                actual: actual.as_str(),
            });
        }

        if let Err(e) = self.prepare().instrument(self.span.clone()).await {
            let _ = self.transition(ServerState::Listening, ServerState::Created);
            return Err(e);
        }

        let poll = PollLoop {
            store: Arc::clone(&self.store),
            registry: Arc::new(self.registry.clone()),
            streams: self.config.stream_names(),
            group: self.config.group.clone(),
            consumer: self.config.consumer.clone(),
            batch_size: self.config.batch_size(),
            block: self.config.block_timeout(),
            retry_delay: self.config.retry_delay(),
            stop: self.stop.clone(),
        };
        let handle = tokio::spawn(poll.run().instrument(self.span.clone()));
        *self.task.lock().await = Some(handle);

        // A shutdown that raced with startup wins; the loop sees the stop token and exits.
        if let Err(actual) = self.transition(ServerState::Listening, ServerState::Polling) {
            return Err(StreamError::InvalidState {
                expected: ServerState::Listening.as_str(),
                actual: actual.as_str(),
            });
        }
        self.span.in_scope(|| {
            tracing::info!(
                streams = ?self.config.stream_names(),
                handlers = ?self.registry.patterns(),
                "Consumer server polling"
            );
        });
        on_ready();
        Ok(())
    }

    /// Moves `from` to `to`, or reports the state actually found.
    fn transition(&self, from: ServerState, to: ServerState) -> Result<(), ServerState> {
        let mut actual = from;
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                actual = *state;
                false
            }
        });
        if moved { Ok(()) } else { Err(actual) }
    }

    async fn prepare(&self) -> StreamResult<()> {
        self.store.connect().await?;
        for stream in self.config.stream_names() {
            ensure_group(self.store.as_ref(), &stream, &self.config.group).await?;
        }
        Ok(())
    }

    /// Runs the shutdown sequence for a received process signal.
    ///
    /// The poll loop stops at its next check, an in-flight entry gets up to
    /// `shutdown_grace_ms` to finish, then the connection is closed.
    pub async fn on_shutdown(&self, signal: &str) -> StreamResult<()> {
        let claimed = self.state.send_if_modified(|state| {
            if matches!(*state, ServerState::Stopping | ServerState::Stopped) {
                false
            } else {
                *state = ServerState::Stopping;
                true
            }
        });
        if !claimed {
            return Ok(());
        }

        self.span
            .in_scope(|| tracing::info!(%signal, "Shutdown signal received, draining consumer"));

        self.stop.cancel();
        let task = self.task.lock().await.take();
        if let Some(mut handle) = task {
            match tokio::time::timeout(self.config.shutdown_grace(), &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.span.in_scope(|| tracing::error!(error = %e, "Poll task ended abnormally"));
                }
                Err(_) => {
                    self.span.in_scope(|| {
                        tracing::warn!(
                            grace_ms = self.config.shutdown_grace_ms,
                            "Poll task still running after grace period, aborting"
                        )
                    });
                    handle.abort();
                }
            }
        }

        let closed = self.store.close().await;
        self.state.send_replace(ServerState::Stopped);
        self.span.in_scope(|| tracing::info!("Consumer server stopped"));
        closed
    }

    /// Closes the connection. Safe to call repeatedly and after shutdown.
    pub async fn close(&self) -> StreamResult<()> {
        self.stop.cancel();
        let result = self.store.close().await;
        let previous = self.state.send_replace(ServerState::Stopped);
        if previous != ServerState::Stopped {
            self.span.in_scope(|| tracing::info!("Consumer server closed"));
        }
        result
    }
}

/// Creates `group` on `stream` starting at the beginning. An existing group is success.
pub async fn ensure_group(store: &dyn StreamStore, stream: &str, group: &str) -> StreamResult<()> {
    match store.create_group(stream, group, GROUP_START_ID).await {
        Ok(()) => {
            tracing::info!(%stream, %group, "Consumer group created");
            Ok(())
        }
        Err(StreamError::GroupExists { .. }) => {
            tracing::debug!(%stream, %group, "Consumer group already exists");
            Ok(())
        }
        Err(e) => {
            tracing::error!(%stream, %group, error = %e, "Consumer group creation failed");
            Err(e)
        }
    }
}

/// Validates, handles and acknowledges one entry.
///
/// `Unregistered` and every error leave the entry pending.
pub async fn dispatch_entry(
    store: &dyn StreamStore,
    registry: &HandlerRegistry,
    group: &str,
    entry: &StreamEntry,
) -> StreamResult<DispatchOutcome> {
    let malformed = |reason: &str| StreamError::MalformedEntry {
        stream: entry.stream.clone(),
        id: entry.id.clone(),
        reason: reason.to_string(),
    };

    let pattern = entry
        .field(PATTERN_FIELD)
        .ok_or_else(|| malformed("missing pattern field"))?;
    let Some(registration) = registry.get(pattern) else {
        return Ok(DispatchOutcome::Unregistered);
    };

    let raw = entry
        .field(DATA_FIELD)
        .ok_or_else(|| malformed("missing data field"))?;
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| malformed(&format!("data is not JSON: {}", e)))?;
    let data = registration.schema.parse(&value)?;

    let handled = AssertUnwindSafe(registration.handler.handle(data))
        .catch_unwind()
        .await;
    match handled {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(StreamError::Handler {
                pattern: pattern.to_string(),
                source: e.into(),
            })
        }
        Err(_) => {
            return Err(StreamError::Handler {
                pattern: pattern.to_string(),
                source: "handler panicked".into(),
            })
        }
    }

    store.ack(&entry.stream, group, &[entry.id.as_str()]).await?;
    Ok(DispatchOutcome::Acked)
}

/// State owned by the spawned poll task.
struct PollLoop {
    store: Arc<dyn StreamStore>,
    registry: Arc<HandlerRegistry>,
    streams: Vec<String>,
    group: String,
    consumer: String,
    batch_size: usize,
    block: Duration,
    retry_delay: Duration,
    stop: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        let new_entries: Vec<(String, ReadCursor)> = self
            .streams
            .iter()
            .map(|stream| (stream.clone(), ReadCursor::New))
            .collect();
        // When the next pass over this consumer's pending history is due.
        let mut recover_at = Some(Instant::now());

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            if recover_at.is_some_and(|at| Instant::now() >= at) {
                match self.recover_pending().await {
                    Ok(true) => recover_at = Some(Instant::now() + self.retry_delay),
                    Ok(false) => recover_at = None,
                    Err(e) if self.is_terminal(&e) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Pending recovery failed, retrying");
                        self.pause().await;
                        continue;
                    }
                }
            }

            let read = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                read = self.store.read_group(
                    &self.group,
                    &self.consumer,
                    &new_entries,
                    self.batch_size,
                    Some(self.block_until(recover_at)),
                ) => read,
            };

            match read {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    if self.process(entries).await {
                        recover_at.get_or_insert_with(Instant::now);
                    }
                }
                Err(e) if self.is_terminal(&e) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Stream read failed, retrying");
                    self.pause().await;
                }
            }
        }

        tracing::info!("Poll loop stopped");
    }

    /// Blocking window for the next `>` read, cut short when a recovery pass is due.
    fn block_until(&self, recover_at: Option<Instant>) -> Duration {
        let Some(at) = recover_at else {
            return self.block;
        };
        let wait = at
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));
        if self.block.is_zero() {
            wait
        } else {
            self.block.min(wait)
        }
    }

    /// Pages through this consumer's pending entries once. Returns true if any
    /// entry is still pending afterwards.
    async fn recover_pending(&self) -> StreamResult<bool> {
        let mut left_pending = false;
        let mut cursors: Vec<(String, ReadCursor)> = self
            .streams
            .iter()
            .map(|stream| (stream.clone(), ReadCursor::history()))
            .collect();

        while !cursors.is_empty() && !self.stop.is_cancelled() {
            let entries = self
                .store
                .read_group(&self.group, &self.consumer, &cursors, self.batch_size, None)
                .await?;
            if entries.is_empty() {
                break;
            }

            tracing::debug!(count = entries.len(), "Redelivering pending entries");
            cursors = cursors
                .into_iter()
                .filter_map(|(stream, _)| {
                    let last = entries.iter().rev().find(|entry| entry.stream == stream)?;
                    Some((stream, ReadCursor::After(last.id.clone())))
                })
                .collect();
            left_pending |= self.process(entries).await;
        }
        Ok(left_pending)
    }

    /// Dispatches a batch in delivery order. Returns true if any entry was left pending.
    async fn process(&self, entries: Vec<StreamEntry>) -> bool {
        let mut left_pending = false;

        for (index, entry) in entries.iter().enumerate() {
            if self.stop.is_cancelled() {
                tracing::info!(
                    remaining = entries.len() - index,
                    "Stopping mid-batch, remaining entries stay pending"
                );
                return true;
            }

            let pattern = entry.field(PATTERN_FIELD).unwrap_or_default();
            match dispatch_entry(self.store.as_ref(), &self.registry, &self.group, entry).await {
                Ok(DispatchOutcome::Acked) => {
                    tracing::debug!(stream = %entry.stream, entry_id = %entry.id, %pattern, "Entry acknowledged");
                }
                Ok(DispatchOutcome::Unregistered) => {
                    left_pending = true;
                    tracing::warn!(
                        stream = %entry.stream,
                        group = %self.group,
                        consumer = %self.consumer,
                        entry_id = %entry.id,
                        %pattern,
                        "No handler registered for pattern, entry left pending"
                    );
                }
                Err(e) => {
                    left_pending = true;
                    tracing::error!(
                        stream = %entry.stream,
                        group = %self.group,
                        consumer = %self.consumer,
                        entry_id = %entry.id,
                        %pattern,
                        error = %e,
                        "Entry processing failed, entry left pending"
                    );
                }
            }
        }

        left_pending
    }

    /// Errors that end the loop instead of being retried.
    fn is_terminal(&self, err: &StreamError) -> bool {
        if err.is_connection_closed() || self.stop.is_cancelled() {
            tracing::debug!(error = %err, "Connection closed, leaving poll loop");
            return true;
        }
        false
    }

    async fn pause(&self) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = tokio::time::sleep(self.retry_delay) => {}
        }
    }
}

/// Resolves with the signal name on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term_signal) => {
                    term_signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryStore;
    use crate::streams::schema::{AnyPayload, TypedSchema};
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;
    use validator::Validate;

    #[derive(Debug, Serialize, Deserialize, Validate)]
    #[serde(rename_all = "camelCase")]
    struct UserCreated {
        value: String,
        user_id: i64,
    }

    fn config() -> StreamServerConfig {
        let mut config = StreamServerConfig::for_streams(["events"]);
        config.group = "g".to_string();
        config.consumer = "c".to_string();
        config.block_timeout_ms = 50;
        config.retry_delay_ms = 10;
        config.shutdown_grace_ms = 500;
        config
    }

    fn entry(pattern: Option<&str>, data: Option<&str>) -> StreamEntry {
        let mut fields = Vec::new();
        if let Some(data) = data {
            fields.push((DATA_FIELD.to_string(), data.to_string()));
        }
        if let Some(pattern) = pattern {
            fields.push((PATTERN_FIELD.to_string(), pattern.to_string()));
        }
        StreamEntry { stream: "events".into(), id: "1-0".into(), fields }
    }

    async fn delivered(store: &MemoryStore, data: &str, pattern: &str) -> StreamEntry {
        store.append("events", &[(PATTERN_FIELD, pattern), (DATA_FIELD, data)]).await.unwrap();
        store
            .read_group("g", "c", &[("events".to_string(), ReadCursor::New)], 1, None)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_ensure_group_is_idempotent() {
        let store = MemoryStore::new();
        ensure_group(&store, "events", "g").await.unwrap();
        ensure_group(&store, "events", "g").await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_acks_after_handler() {
        let store = MemoryStore::new();
        store.create_group("events", "g", "0").await.unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new();
        registry.register("user_created", TypedSchema::<UserCreated>::new(), move |data: Value| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(data);
                Ok(())
            }
        });

        let entry = delivered(&store, r#"{"value":"hello world","userId":1}"#, "user_created").await;
        let outcome = dispatch_entry(&store, &registry, "g", &entry).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Acked);
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "value": "hello world", "userId": 1 })]);
        assert_eq!(store.pending_count("events", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_leaves_pending_on_failures() {
        let store = MemoryStore::new();
        store.create_group("events", "g", "0").await.unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register("typed", TypedSchema::<UserCreated>::new(), |_: Value| async { Ok(()) });
        registry.register("failing", AnyPayload, |_: Value| async { Err(anyhow::anyhow!("boom")) });

        let unknown = delivered(&store, "{}", "unknown_pattern").await;
        assert_eq!(
            dispatch_entry(&store, &registry, "g", &unknown).await.unwrap(),
            DispatchOutcome::Unregistered
        );

        let invalid = delivered(&store, r#"{"value":1}"#, "typed").await;
        assert!(matches!(
            dispatch_entry(&store, &registry, "g", &invalid).await,
            Err(StreamError::Validation(_))
        ));

        let failing = delivered(&store, "{}", "failing").await;
        let err = dispatch_entry(&store, &registry, "g", &failing).await.unwrap_err();
        assert!(matches!(err, StreamError::Handler { .. }));
        assert!(err.to_string().contains("boom"));

        assert_eq!(store.pending_count("events", "g").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_malformed_entries() {
        let store = MemoryStore::new();
        let mut registry = HandlerRegistry::new();
        registry.register("p", AnyPayload, |_: Value| async { Ok(()) });

        let no_pattern = entry(None, Some("{}"));
        assert!(matches!(
            dispatch_entry(&store, &registry, "g", &no_pattern).await,
            Err(StreamError::MalformedEntry { .. })
        ));
        let bad_json = entry(Some("p"), Some("{not json"));
        assert!(matches!(
            dispatch_entry(&store, &registry, "g", &bad_json).await,
            Err(StreamError::MalformedEntry { .. })
        ));
        let no_data = entry(Some("p"), None);
        assert!(matches!(
            dispatch_entry(&store, &registry, "g", &no_data).await,
            Err(StreamError::MalformedEntry { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_contains_handler_panic() {
        let store = MemoryStore::new();
        store.create_group("events", "g", "0").await.unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register("p", AnyPayload, |_: Value| async {
            if true {
                panic!("handler bug");
            }
            Ok(())
        });

        let entry = delivered(&store, "{}", "p").await;
        let err = dispatch_entry(&store, &registry, "g", &entry).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_eq!(store.pending_count("events", "g").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_state_machine_and_frozen_registry() {
        let store: Arc<dyn StreamStore> = Arc::new(MemoryStore::new());
        let mut server = ConsumerServer::with_store(config(), store).unwrap();
        assert_eq!(server.state(), ServerState::Created);
        server.register_handler("p", AnyPayload, |_: Value| async { Ok(()) }).unwrap();

        let mut ready = false;
        server.listen(|| ready = true).await.unwrap();
        assert!(ready);
        assert_eq!(server.state(), ServerState::Polling);

        let err = server.listen(|| {}).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidState { actual: "POLLING", .. }));
        assert!(matches!(
            server.register_handler("q", AnyPayload, |_: Value| async { Ok(()) }),
            Err(StreamError::RegistryFrozen)
        ));

        server.on_shutdown("SIGTERM").await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.store().is_closed());

        server.on_shutdown("SIGTERM").await.unwrap();
        server.close().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_listen_fails_on_closed_store() {
        let store = Arc::new(MemoryStore::new());
        store.close().await.unwrap();
        let server = ConsumerServer::with_store(config(), store).unwrap();
        let mut ready = false;
        assert!(server.listen(|| ready = true).await.is_err());
        assert!(!ready);
        assert_eq!(server.state(), ServerState::Created);
    }

    #[test]
    fn test_invalid_config_rejected_before_connecting() {
        let mut cfg = config();
        cfg.streams.clear();
        let store: Arc<dyn StreamStore> = Arc::new(MemoryStore::new());
        let err = ConsumerServer::with_store(cfg, store).err().unwrap();
        assert_eq!(err.field, "streams");
    }
}
