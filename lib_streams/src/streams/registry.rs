//! # Handler Registry
//!
//! Maps a routing pattern to the handler that processes it and the schema its
//! payload must satisfy. Lookup is an exact string match. The registry is
//! filled before the server starts listening and only read afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use validator::Validate;

use super::schema::{PayloadSchema, TypedSchema};

/// Processes one validated payload.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, data: Value) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle(&self, data: Value) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin((self)(data))
    }
}

/// A handler together with the schema of the payloads it accepts.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub handler: Arc<dyn MessageHandler>,
    pub schema: Arc<dyn PayloadSchema>,
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure receiving the schema's normalised JSON.
    ///
    /// Registering a pattern twice replaces the earlier handler.
    pub fn register<S, F, Fut>(&mut self, pattern: impl Into<String>, schema: S, handler: F)
    where
        S: PayloadSchema + 'static,
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(pattern, schema, handler);
    }

    /// Registers any [`MessageHandler`] implementor.
    pub fn register_handler<S, H>(&mut self, pattern: impl Into<String>, schema: S, handler: H)
    where
        S: PayloadSchema + 'static,
        H: MessageHandler + 'static,
    {
        let pattern = pattern.into();
        if self.handlers.contains_key(&pattern) {
            tracing::warn!(%pattern, "Replacing existing handler");
        }
        self.handlers.insert(
            pattern,
            HandlerRegistration {
                handler: Arc::new(handler),
                schema: Arc::new(schema),
            },
        );
    }

    /// Registers a handler receiving a typed payload checked by [`TypedSchema<T>`].
    pub fn on<T, F, Fut>(&mut self, pattern: impl Into<String>, handler: F)
    where
        T: Serialize + DeserializeOwned + Validate + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(pattern, TypedSchema::<T>::new(), move |data: Value| {
            let handler = Arc::clone(&handler);
            async move {
                let typed: T = serde_json::from_value(data)?;
                handler(typed).await
            }
        });
    }

    pub fn get(&self, pattern: &str) -> Option<&HandlerRegistration> {
        self.handlers.get(pattern)
    }

    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.handlers.keys().cloned().collect();
        patterns.sort();
        patterns
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
