//! # lib_streams
//!
//! Event transport over Redis Streams consumer groups. Modules are gated by
//! Cargo features so a binary only pulls in what it uses:
//!
//! - `configs`: typed, validated connection and stream settings
//! - `connections`: the Redis connection manager and an in-process store
//! - `streams`: publisher, consumer server and handler registry
//! - `loggers`: `tracing` subscriber bootstrap

pub mod errors;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "streams")]
pub mod streams;

#[cfg(feature = "loggers")]
pub mod loggers;

pub use errors::{ConfigurationError, StreamError, StreamResult, ValidationError};
