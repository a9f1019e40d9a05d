// mimir-core/src/ports/storage.rs
//
// Durable storage contracts for the Persistent Store (§4.G): one JSON
// record per entity (`projects/pipelines/jobs/schedules`), and a
// dedicated binary backend for large context blobs above the inline
// threshold (§9).

use crate::infrastructure::error::InfrastructureError;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(&self, collection: &str, id: &str, value: &Value) -> Result<(), InfrastructureError>;
    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, InfrastructureError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), InfrastructureError>;
    async fn list(&self, collection: &str) -> Result<Vec<Value>, InfrastructureError>;
}

#[async_trait]
pub trait BinaryStore: Send + Sync {
    async fn save_binary(&self, key: &str, bytes: &[u8]) -> Result<(), InfrastructureError>;
    async fn load_binary(&self, key: &str) -> Result<Option<Vec<u8>>, InfrastructureError>;
    async fn delete_binary(&self, key: &str) -> Result<(), InfrastructureError>;
}
