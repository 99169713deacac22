//! # In-Process Stream Store
//!
//! A [`StreamStore`] that keeps streams in memory with the consumer-group
//! behaviour of Redis Streams:
//!
//! - ids are `<n>-0` with `n` increasing per stream;
//! - each group keeps a last-delivered cursor and a pending-entries list that
//!   records the owning consumer and the delivery count;
//! - `>` reads hand out undelivered entries and advance the cursor, explicit
//!   id reads replay the calling consumer's own pending entries;
//! - blocking `>` reads wake up when an entry is appended or the store closes.
//!
//! Handles made with [`MemoryStore::new_connection`] share the data but close
//! independently, which stands in for separate processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::stream_store::{ReadCursor, StreamEntry, StreamStore};
use crate::errors::{StreamError, StreamResult};

#[derive(Debug, Clone)]
struct StoredEntry {
    seq: u64,
    fields: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: Vec<StoredEntry>,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct MemoryData {
    streams: Mutex<HashMap<String, StreamLog>>,
    appended: Notify,
}

/// In-memory stream store handle.
pub struct MemoryStore {
    data: Arc<MemoryData>,
    closed: AtomicBool,
    closing: Arc<Notify>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn format_id(seq: u64) -> String {
    format!("{}-0", seq)
}

fn parse_id(command: &'static str, id: &str) -> StreamResult<u64> {
    let millis = id.split('-').next().unwrap_or(id);
    millis.parse::<u64>().map_err(|_| StreamError::Command {
        command,
        reason: format!("ERR Invalid stream ID specified as stream command argument: {}", id),
    })
}

fn no_group(command: &'static str, stream: &str, group: &str) -> StreamError {
    StreamError::Command {
        command,
        reason: format!(
            "NOGROUP No such key '{}' or consumer group '{}'",
            stream, group
        ),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(MemoryData::default()),
            closed: AtomicBool::new(false),
            closing: Arc::new(Notify::new()),
        }
    }

    /// Another open handle onto the same streams.
    pub fn new_connection(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            closed: AtomicBool::new(false),
            closing: Arc::new(Notify::new()),
        }
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<String, StreamLog>> {
        self.data
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StreamError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Number of entries in a stream (0 if absent).
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams().get(stream).map(|log| log.entries.len()).unwrap_or(0)
    }

    /// Ids pending for `consumer` in `group`, oldest first.
    pub fn pending_ids(&self, stream: &str, group: &str, consumer: &str) -> Vec<String> {
        self.streams()
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|state| {
                state
                    .pending
                    .iter()
                    .filter(|(_, pending)| pending.consumer == consumer)
                    .map(|(seq, _)| format_id(*seq))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// How many times an entry has been delivered to its group.
    pub fn delivery_count(&self, stream: &str, group: &str, id: &str) -> Option<u32> {
        let seq = parse_id("XPENDING", id).ok()?;
        self.streams()
            .get(stream)?
            .groups
            .get(group)?
            .pending
            .get(&seq)
            .map(|pending| pending.deliveries)
    }

    fn collect(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, ReadCursor)],
        count: usize,
    ) -> StreamResult<Vec<StreamEntry>> {
        let mut streams = self.streams();

        // Every stream must have the group and every id must parse before any
        // delivery state changes.
        for (stream, cursor) in cursors {
            if !streams.get(stream).is_some_and(|log| log.groups.contains_key(group)) {
                return Err(no_group("XREADGROUP", stream, group));
            }
            if let ReadCursor::After(id) = cursor {
                parse_id("XREADGROUP", id)?;
            }
        }

        let mut delivered = Vec::new();
        for (stream, cursor) in cursors {
            let log = streams
                .get_mut(stream)
                .ok_or_else(|| no_group("XREADGROUP", stream, group))?;
            let StreamLog { entries, groups, .. } = log;
            let state = groups
                .get_mut(group)
                .ok_or_else(|| no_group("XREADGROUP", stream, group))?;

            match cursor {
                ReadCursor::New => {
                    let fresh: Vec<&StoredEntry> = entries
                        .iter()
                        .filter(|entry| entry.seq > state.last_delivered)
                        .take(count)
                        .collect();
                    for entry in fresh {
                        state.last_delivered = entry.seq;
                        state.pending.insert(
                            entry.seq,
                            PendingEntry {
                                consumer: consumer.to_string(),
                                deliveries: 1,
                            },
                        );
                        delivered.push(StreamEntry {
                            stream: stream.clone(),
                            id: format_id(entry.seq),
                            fields: entry.fields.clone(),
                        });
                    }
                }
                ReadCursor::After(id) => {
                    let after = parse_id("XREADGROUP", id)?;
                    let owned: Vec<u64> = state
                        .pending
                        .range(after + 1..)
                        .filter(|(_, pending)| pending.consumer == consumer)
                        .map(|(seq, _)| *seq)
                        .take(count)
                        .collect();
                    for seq in owned {
                        if let Some(pending) = state.pending.get_mut(&seq) {
                            pending.deliveries += 1;
                        }
                        let fields = entries
                            .iter()
                            .find(|entry| entry.seq == seq)
                            .map(|entry| entry.fields.clone())
                            .unwrap_or_default();
                        delivered.push(StreamEntry {
                            stream: stream.clone(),
                            id: format_id(seq),
                            fields,
                        });
                    }
                }
            }
        }

        Ok(delivered)
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    fn address(&self) -> String {
        "memory://local".to_string()
    }

    async fn connect(&self) -> StreamResult<()> {
        self.ensure_open()
    }

    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> StreamResult<String> {
        self.ensure_open()?;
        let id = {
            let mut streams = self.streams();
            let log = streams.entry(stream.to_string()).or_default();
            log.last_seq += 1;
            log.entries.push(StoredEntry {
                seq: log.last_seq,
                fields: fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
            });
            format_id(log.last_seq)
        };
        self.data.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> StreamResult<()> {
        self.ensure_open()?;
        let mut streams = self.streams();
        let log = streams.entry(stream.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Err(StreamError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        let last_delivered = if start_id == "$" {
            log.last_seq
        } else {
            parse_id("XGROUP CREATE", start_id)?
        };
        log.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, ReadCursor)],
        count: usize,
        block: Option<Duration>,
    ) -> StreamResult<Vec<StreamEntry>> {
        let blocking = block.is_some() && cursors.iter().any(|(_, c)| *c == ReadCursor::New);
        let deadline = block
            .filter(|b| !b.is_zero())
            .map(|b| Instant::now() + b);

        loop {
            // Registered before checking so an append in between is not missed.
            let appended = self.data.appended.notified();
            let closing = self.closing.notified();

            self.ensure_open()?;
            let delivered = self.collect(group, consumer, cursors, count.max(1))?;
            if !delivered.is_empty() || !blocking {
                return Ok(delivered);
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(Vec::new());
                    }
                    tokio::select! {
                        _ = appended => {}
                        _ = closing => {}
                        _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
                    }
                }
                None => {
                    tokio::select! {
                        _ = appended => {}
                        _ = closing => {}
                    }
                }
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64> {
        self.ensure_open()?;
        let mut streams = self.streams();
        let Some(state) = streams.get_mut(stream).and_then(|log| log.groups.get_mut(group)) else {
            return Ok(0);
        };
        let mut acked = 0;
        for id in ids {
            if state.pending.remove(&parse_id("XACK", id)?).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> StreamResult<u64> {
        self.ensure_open()?;
        self.streams()
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|state| state.pending.len() as u64)
            .ok_or_else(|| no_group("XPENDING", stream, group))
    }

    async fn close(&self) -> StreamResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closing.notify_waiters();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
