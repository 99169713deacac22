//! # Payload Schemas
//!
//! A schema checks a JSON payload and returns its normalised form. The
//! publisher serializes the normalised value, and the consumer hands it to the
//! handler, so both sides agree on one shape per pattern.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use validator::Validate;

use crate::configs::issue_messages;
use crate::errors::ValidationError;

/// Validates and normalises a payload.
pub trait PayloadSchema: Send + Sync {
    fn parse(&self, data: &Value) -> Result<Value, ValidationError>;
}

/// Schema derived from a Rust type.
///
/// The payload is deserialized into `T`, checked with its `validator` rules and
/// serialized back. Fields `T` does not declare are dropped on the way.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedSchema<{}>", std::any::type_name::<T>())
    }
}

impl<T> TypedSchema<T>
where
    T: Serialize + DeserializeOwned + Validate,
{
    /// Parses straight into `T`.
    pub fn parse_typed(&self, data: &Value) -> Result<T, ValidationError> {
        let typed: T = serde_json::from_value(data.clone())
            .map_err(|e| ValidationError::single(e.to_string()))?;
        typed
            .validate()
            .map_err(|e| ValidationError::new(issue_messages(&e)))?;
        Ok(typed)
    }
}

impl<T> PayloadSchema for TypedSchema<T>
where
    T: Serialize + DeserializeOwned + Validate,
{
    fn parse(&self, data: &Value) -> Result<Value, ValidationError> {
        let typed = self.parse_typed(data)?;
        serde_json::to_value(&typed).map_err(|e| ValidationError::single(e.to_string()))
    }
}

/// Accepts any JSON value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyPayload;

impl PayloadSchema for AnyPayload {
    fn parse(&self, data: &Value) -> Result<Value, ValidationError> {
        Ok(data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, Validate)]
    #[serde(rename_all = "camelCase")]
    struct UserCreated {
        #[validate(length(min = 1, message = "value cannot be empty"))]
        value: String,
        user_id: i64,
    }

    #[test]
    fn test_typed_schema_accepts_and_strips_unknown_fields() {
        let schema = TypedSchema::<UserCreated>::new();
        let parsed = schema
            .parse(&json!({ "value": "hello world", "userId": 1, "extra": true }))
            .unwrap();
        assert_eq!(parsed, json!({ "value": "hello world", "userId": 1 }));
    }

    #[test]
    fn test_typed_schema_rejects_wrong_type() {
        let schema = TypedSchema::<UserCreated>::new();
        let err = schema.parse(&json!({ "value": "x", "userId": "one" })).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.to_string().starts_with("Invalid payload"));
    }

    #[test]
    fn test_typed_schema_runs_validation_rules() {
        let schema = TypedSchema::<UserCreated>::new();
        let err = schema.parse(&json!({ "value": "", "userId": 1 })).unwrap_err();
        assert_eq!(err.issues, vec!["value: value cannot be empty".to_string()]);
    }

    #[test]
    fn test_any_payload_passes_through() {
        let value = json!([1, "two", null]);
        assert_eq!(AnyPayload.parse(&value).unwrap(), value);
    }
}
