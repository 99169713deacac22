//! # Stream Transport
//!
//! The producer and consumer halves of the transport. A [`StreamPublisher`]
//! appends validated payloads; a [`ConsumerServer`] reads them back through a
//! consumer group and routes each one to the handler registered for its
//! pattern.

/// Payload schemas shared by publishers and handlers.
pub mod schema;

/// Pattern to handler mapping.
pub mod registry;

/// Schema-checked appends to a stream.
pub mod publisher;

/// Consumer-group poll loop with graceful shutdown.
pub mod server;

pub use publisher::{StreamPublisher, DATA_FIELD, PATTERN_FIELD};
pub use registry::{HandlerRegistration, HandlerRegistry, MessageHandler};
pub use schema::{AnyPayload, PayloadSchema, TypedSchema};
pub use server::{dispatch_entry, ensure_group, shutdown_signal, ConsumerServer, DispatchOutcome, ServerState};
