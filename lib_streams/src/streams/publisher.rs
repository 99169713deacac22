//! # Stream Publisher
//!
//! Appends schema-checked payloads to one stream. Each entry carries two
//! string fields, `pattern` (routing key) and `data` (the normalised payload
//! as JSON). Nothing is written when the payload is rejected.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use super::schema::PayloadSchema;
use crate::configs::StreamRegistration;
use crate::connections::StreamStore;
use crate::errors::{StreamError, StreamResult, ValidationError};

pub const PATTERN_FIELD: &str = "pattern";
pub const DATA_FIELD: &str = "data";

pub struct StreamPublisher {
    store: Arc<dyn StreamStore>,
    registration: StreamRegistration,
    span: tracing::Span,
}

impl StreamPublisher {
    /// The store is shared; the publisher never closes it.
    pub fn new(store: Arc<dyn StreamStore>, registration: StreamRegistration) -> Self {
        let span = tracing::info_span!("stream_publisher", stream = %registration.stream_id);
        Self { store, registration, span }
    }

    /// Replaces the span events are recorded under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.registration.stream_id
    }

    /// Validates `data` against `schema` and appends it under `pattern`.
    ///
    /// Returns the store-assigned entry id. One append per call, no retries.
    pub async fn send_payload(
        &self,
        pattern: &str,
        schema: &dyn PayloadSchema,
        data: &Value,
    ) -> StreamResult<String> {
        self.append_checked(pattern, schema, data)
            .instrument(self.span.clone())
            .await
    }

    async fn append_checked(
        &self,
        pattern: &str,
        schema: &dyn PayloadSchema,
        data: &Value,
    ) -> StreamResult<String> {
        if pattern.is_empty() {
            return Err(ValidationError::single("pattern: Pattern cannot be empty").into());
        }

        let normalised = match schema.parse(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%pattern, error = %e, "Payload rejected, nothing published");
                return Err(e.into());
            }
        };
        let encoded = serde_json::to_string(&normalised)
            .map_err(|e| StreamError::Serialization(e.to_string()))?;

        let id = self
            .store
            .append(
                &self.registration.stream_id,
                &[(PATTERN_FIELD, pattern), (DATA_FIELD, encoded.as_str())],
            )
            .await?;
        tracing::debug!(%pattern, entry_id = %id, "Published entry");
        Ok(id)
    }

    /// Serializes a typed value, then behaves like [`send_payload`](Self::send_payload).
    pub async fn send<T: Serialize>(
        &self,
        pattern: &str,
        schema: &dyn PayloadSchema,
        data: &T,
    ) -> StreamResult<String> {
        let value = serde_json::to_value(data).map_err(|e| StreamError::Serialization(e.to_string()))?;
        self.send_payload(pattern, schema, &value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{MemoryStore, ReadCursor};
    use crate::streams::schema::TypedSchema;
    use serde::Deserialize;
    use serde_json::json;
    use validator::Validate;

    #[derive(Debug, Serialize, Deserialize, Validate)]
    #[serde(rename_all = "camelCase")]
    struct UserCreated {
        value: String,
        user_id: i64,
    }

    fn publisher(store: &Arc<MemoryStore>) -> StreamPublisher {
        let store: Arc<dyn StreamStore> = store.clone();
        StreamPublisher::new(store, StreamRegistration::new("users").unwrap())
    }

    #[tokio::test]
    async fn test_valid_payload_appends_one_entry() {
        let store = Arc::new(MemoryStore::new());
        store.create_group("users", "g", "0").await.unwrap();
        let id = publisher(&store)
            .send_payload(
                "user_created",
                &TypedSchema::<UserCreated>::new(),
                &json!({ "value": "hello world", "userId": 1 }),
            )
            .await
            .unwrap();
        assert_eq!(id, "1-0");

        let entries = store
            .read_group("g", "c", &[("users".to_string(), ReadCursor::New)], 10, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field(PATTERN_FIELD), Some("user_created"));
        let data: Value = serde_json::from_str(entries[0].field(DATA_FIELD).unwrap()).unwrap();
        assert_eq!(data, json!({ "value": "hello world", "userId": 1 }));
    }

    #[tokio::test]
    async fn test_invalid_payload_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let err = publisher(&store)
            .send_payload("user_created", &TypedSchema::<UserCreated>::new(), &json!({ "value": 3 }))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));
        assert_eq!(store.stream_len("users"), 0);
    }

    #[tokio::test]
    async fn test_empty_pattern_rejected() {
        let store = Arc::new(MemoryStore::new());
        let err = publisher(&store)
            .send("", &TypedSchema::<UserCreated>::new(), &UserCreated { value: "x".into(), user_id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));
        assert_eq!(store.stream_len("users"), 0);
    }

    #[tokio::test]
    async fn test_closed_store_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.close().await.unwrap();
        let err = publisher(&store)
            .send_payload("p", &crate::streams::schema::AnyPayload, &json!(1))
            .await
            .unwrap_err();
        assert!(err.is_connection_closed());
    }
}
