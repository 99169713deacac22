//! # Error Taxonomy
//!
//! Every fallible operation in this crate reports one of the types below.
//! Configuration problems surface before any connection attempt, connection
//! problems name the (masked) target address, and payload problems carry the
//! list of schema issues that rejected the payload.

use std::fmt;
use thiserror::Error;

/// A configuration field failed validation.
///
/// Only the first failing field (ordered by its dotted path) is promoted to
/// `field`/`value`/`expected`; every issue found is kept in `details`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Redis configuration error for field \"{field}\": {expected}. Received: {value}.{}", details_suffix(.details))]
pub struct ConfigurationError {
    /// Dotted path of the offending field (e.g. `redis.port`).
    pub field: String,
    /// The received value rendered as JSON, or `"unknown"`.
    pub value: String,
    /// Human-readable description of the expected format.
    pub expected: String,
    /// All issues as `path: message` pairs.
    pub details: Vec<String>,
}

fn details_suffix(details: &[String]) -> String {
    if details.is_empty() {
        String::new()
    } else {
        format!(" Details: {}", details.join(", "))
    }
}

impl ConfigurationError {
    /// Builds an error for a single field with no further details.
    pub fn new(field: impl Into<String>, value: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
            details: Vec::new(),
        }
    }
}

/// A payload did not satisfy its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Individual problems reported by the schema.
    pub issues: Vec<String>,
}

impl ValidationError {
    pub fn new(issues: Vec<String>) -> Self {
        Self { issues }
    }

    pub fn single(issue: impl Into<String>) -> Self {
        Self { issues: vec![issue.into()] }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            write!(f, "Invalid payload")
        } else {
            write!(f, "Invalid payload: {}", self.issues.join("; "))
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors raised by the connection manager, the publisher and the consumer server.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to connect to Redis at {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Consumer group \"{group}\" already exists on stream \"{stream}\"")]
    GroupExists { stream: String, group: String },

    #[error("Redis command {command} failed: {reason}")]
    Command { command: &'static str, reason: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Malformed entry {id} on stream \"{stream}\": {reason}")]
    MalformedEntry { stream: String, id: String, reason: String },

    #[error("No handler registered for pattern \"{pattern}\"")]
    UnregisteredPattern { pattern: String },

    #[error("Handler for pattern \"{pattern}\" failed: {source}")]
    Handler {
        pattern: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid server state: expected {expected}, found {actual}")]
    InvalidState { expected: &'static str, actual: &'static str },

    #[error("Handlers cannot be registered once the server is listening")]
    RegistryFrozen,
}

impl StreamError {
    /// True for errors that mean the connection was deliberately closed.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, StreamError::ConnectionClosed)
    }
}

/// Convenience alias used throughout the crate.
pub type StreamResult<T> = Result<T, StreamError>;
