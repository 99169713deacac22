//! # Stream Store Capability
//!
//! The operations the transport needs from a log-structured store with
//! consumer groups. Identifiers are opaque strings in the store's native
//! `<millis>-<seq>` format; the transport never keeps a cursor of its own.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::StreamResult;

/// Where a group read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group (`>`).
    New,
    /// This consumer's own pending entries with an id greater than the one given.
    After(String),
}

impl ReadCursor {
    /// The id argument sent to the store.
    pub fn as_id(&self) -> &str {
        match self {
            ReadCursor::New => ">",
            ReadCursor::After(id) => id,
        }
    }

    /// Start of this consumer's pending history.
    pub fn history() -> Self {
        ReadCursor::After("0".to_string())
    }
}

/// One entry delivered by a group read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub stream: String,
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    /// Value of a named field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A connection to a stream store.
///
/// Implementations own their connection; dependents borrow it through an
/// `Arc` and must not close it themselves.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Target address with credentials masked.
    fn address(&self) -> String;

    /// Opens the connection. Idempotent while open; fails once closed.
    async fn connect(&self) -> StreamResult<()>;

    /// Appends an entry and returns the store-assigned id.
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> StreamResult<String>;

    /// Creates `group` on `stream` (creating the stream if absent) starting at `start_id`.
    ///
    /// Fails with `StreamError::GroupExists` when the group is already there.
    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> StreamResult<()>;

    /// Reads up to `count` entries per stream for `consumer` in `group`.
    ///
    /// `block` of `None` returns immediately; `Some(ZERO)` waits until an entry
    /// arrives. Blocking only applies to [`ReadCursor::New`] reads. A read that
    /// times out returns an empty list.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, ReadCursor)],
        count: usize,
        block: Option<Duration>,
    ) -> StreamResult<Vec<StreamEntry>>;

    /// Acknowledges ids for a group; returns how many were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64>;

    /// Number of delivered but unacknowledged entries for a group.
    async fn pending_count(&self, stream: &str, group: &str) -> StreamResult<u64>;

    /// Closes the connection exactly once. Later calls are no-ops.
    async fn close(&self) -> StreamResult<()>;

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_ids() {
        assert_eq!(ReadCursor::New.as_id(), ">");
        assert_eq!(ReadCursor::history().as_id(), "0");
        assert_eq!(ReadCursor::After("5-0".into()).as_id(), "5-0");
    }

    #[test]
    fn test_entry_field_lookup() {
        let entry = StreamEntry {
            stream: "s".into(),
            id: "1-0".into(),
            fields: vec![("pattern".into(), "p".into()), ("data".into(), "{}".into())],
        };
        assert_eq!(entry.field("pattern"), Some("p"));
        assert_eq!(entry.field("missing"), None);
    }
}
