use crate::error::AurixResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single value held by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub value: serde_json::Value,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Key-scoped side-channel store for agent-level memory.
///
/// The pipeline only writes to it; caching, eviction and persistence are the
/// implementation's concern.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store `value` under `key`, optionally namespaced by `scope`.
    async fn set_agent_memory(
        &self,
        key: &str,
        value: serde_json::Value,
        scope: Option<&str>,
    ) -> AurixResult<()>;

    /// Read back the value stored under `key` and `scope`.
    async fn get_agent_memory(
        &self,
        key: &str,
        scope: Option<&str>,
    ) -> AurixResult<Option<MemoryRecord>>;
}

/// Process-local [`MemoryStore`] that keeps every key in a map.
pub struct InMemoryStore {
    records: RwLock<HashMap<(Option<String>, String), MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored keys across all scopes.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn set_agent_memory(
        &self,
        key: &str,
        value: serde_json::Value,
        scope: Option<&str>,
    ) -> AurixResult<()> {
        let mut records = self.records.write();
        let slot = (scope.map(str::to_string), key.to_string());
        let version = records.get(&slot).map_or(0, |r| r.version) + 1;
        records.insert(
            slot,
            MemoryRecord {
                key: key.to_string(),
                scope: scope.map(str::to_string),
                value,
                version,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_agent_memory(
        &self,
        key: &str,
        scope: Option<&str>,
    ) -> AurixResult<Option<MemoryRecord>> {
        let records = self.records.read();
        Ok(records
            .get(&(scope.map(str::to_string), key.to_string()))
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());

        store
            .set_agent_memory("delegation_history", json!({"delegations": []}), None)
            .await
            .unwrap();
        let record = store
            .get_agent_memory("delegation_history", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.value["delegations"], json!([]));
    }

    #[tokio::test]
    async fn test_overwrite_bumps_version() {
        let store = InMemoryStore::new();
        store.set_agent_memory("k", json!(1), None).await.unwrap();
        store.set_agent_memory("k", json!(2), None).await.unwrap();
        let record = store.get_agent_memory("k", None).await.unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.value, json!(2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = InMemoryStore::new();
        store
            .set_agent_memory("k", json!("a"), Some("project_a"))
            .await
            .unwrap();
        assert!(store.get_agent_memory("k", None).await.unwrap().is_none());
        assert!(store
            .get_agent_memory("k", Some("project_b"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.len(), 1);
    }
}
