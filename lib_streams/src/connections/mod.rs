//! # Connections Module
//!
//! This module owns the single long-lived store connection used by the
//! publisher and the consumer server. Both talk to it through the
//! [`StreamStore`] capability so the same code runs against Redis in
//! production and against an in-process store in tests.

/// The stream store capability and its entry/cursor types.
pub mod stream_store;

/// Redis-backed connection manager.
pub mod stream_redis;

/// In-process store with Redis consumer-group semantics.
pub mod stream_memory;

pub use stream_memory::MemoryStore;
pub use stream_redis::{ConnectionEvent, StreamConnection};
pub use stream_store::{ReadCursor, StreamEntry, StreamStore};
