// mimir-core/src/infrastructure/store/mod.rs
//
// The Persistent Store (§4.G): one JSON file per record under
// `<base>/<collection>/<id>.json`, plus binaries under
// `<base>/context_data/binaries/<key>`. Writes go through
// `infrastructure::fs::atomic_write` (temp file + rename, §6).

use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::fs::atomic_write;
use crate::ports::storage::{BinaryStore, RecordStore};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    base_path: PathBuf,
}

impl JsonRecordStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn record_path(&self, collection: &str, id: &str) -> PathBuf {
        self.base_path.join(collection).join(format!("{id}.json"))
    }

    fn binary_path(&self, key: &str) -> PathBuf {
        self.base_path.join("context_data").join("binaries").join(key)
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    #[instrument(skip(self, value))]
    async fn save(&self, collection: &str, id: &str, value: &Value) -> Result<(), InfrastructureError> {
        let path = self.record_path(collection, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(value)?;
        atomic_write(&path, body)?;
        debug!(?path, "record saved");
        Ok(())
    }

    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, InfrastructureError> {
        let path = self.record_path(collection, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), InfrastructureError> {
        let path = self.record_path(collection, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, InfrastructureError> {
        let dir = self.base_path.join(collection);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                let bytes = tokio::fs::read(entry.path()).await?;
                out.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl BinaryStore for JsonRecordStore {
    async fn save_binary(&self, key: &str, bytes: &[u8]) -> Result<(), InfrastructureError> {
        let path = self.binary_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        atomic_write(&path, bytes)?;
        Ok(())
    }

    async fn load_binary(&self, key: &str) -> Result<Option<Vec<u8>>, InfrastructureError> {
        match tokio::fs::read(self.binary_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_binary(&self, key: &str) -> Result<(), InfrastructureError> {
        match tokio::fs::remove_file(self.binary_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
