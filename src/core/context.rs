//! Shared state - per-run namespaced key/value store

use crate::core::stage::StateSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A stored value and when it was last written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

/// In-memory map of namespace -> key -> entry.
///
/// Each run owns exactly one namespace, so namespaces never share mutable
/// state. Writes are last-write-wins per key.
#[derive(Debug, Default)]
pub struct SharedStateStore {
    namespaces: RwLock<HashMap<String, HashMap<String, StateEntry>>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key` in `namespace`
    pub async fn set(&self, namespace: &str, key: &str, value: Value) {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StateEntry {
                    value,
                    updated_at: Utc::now(),
                },
            );
    }

    /// Get a single value
    pub async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.value.clone())
    }

    /// Get every value in a namespace (empty when the namespace is unknown)
    pub async fn get_all(&self, namespace: &str) -> StateSnapshot {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get a single entry including its timestamp
    pub async fn entry(&self, namespace: &str, key: &str) -> Option<StateEntry> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    /// Names of all namespaces currently held
    pub async fn namespaces(&self) -> Vec<String> {
        let namespaces = self.namespaces.read().await;
        namespaces.keys().cloned().collect()
    }

    /// Drop a namespace. Returns whether it existed.
    pub async fn clear(&self, namespace: &str) -> bool {
        let mut namespaces = self.namespaces.write().await;
        namespaces.remove(namespace).is_some()
    }
}
