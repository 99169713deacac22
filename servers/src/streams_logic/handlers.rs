use lib_streams::errors::StreamResult;
use lib_streams::streams::ConsumerServer;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const USER_CREATED: &str = "user_created";

/// Payload of a `user_created` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    #[validate(length(min = 1, message = "value cannot be empty"))]
    pub value: String,
    pub user_id: i64,
}

async fn on_user_created(event: UserCreated) -> anyhow::Result<()> {
    tracing::info!(user_id = event.user_id, value = %event.value, "Received user_created event");
    Ok(())
}

/// Registers every handler the demo consumes.
pub fn register(server: &mut ConsumerServer) -> StreamResult<()> {
    server.on::<UserCreated, _, _>(USER_CREATED, on_user_created)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_streams::configs::StreamServerConfig;
    use lib_streams::connections::{MemoryStore, StreamStore};
    use lib_streams::streams::TypedSchema;
    use lib_streams::streams::PayloadSchema;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_user_created_schema_matches_wire_shape() {
        let schema = TypedSchema::<UserCreated>::new();
        let parsed = schema.parse(&json!({ "value": "hello world", "userId": 1 })).unwrap();
        assert_eq!(parsed, json!({ "value": "hello world", "userId": 1 }));
        assert!(schema.parse(&json!({ "value": "hello world", "user_id": 1 })).is_err());
    }

    #[test]
    fn test_register_on_fresh_server() {
        let store: Arc<dyn StreamStore> = Arc::new(MemoryStore::new());
        let mut server = ConsumerServer::with_store(StreamServerConfig::for_streams(["mystream"]), store).unwrap();
        register(&mut server).unwrap();
    }
}
