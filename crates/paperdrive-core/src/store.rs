//! Key-value persistence collaborator.
//!
//! Values are JSON addressed by dotted paths (`papers.<id>`,
//! `collections.<key>`). Reading a parent path returns the whole subtree.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::CoreError;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, CoreError>;
    async fn set(&self, path: &str, value: Value) -> Result<(), CoreError>;
    /// Deleting a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<(), CoreError>;
}

fn segments(path: &str) -> Result<Vec<&str>, CoreError> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(CoreError::Store(format!("invalid path '{path}'")));
    }
    Ok(parts)
}

/// The object at `node`, replacing a scalar with an empty object first.
fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// In-memory [`KeyValueStore`] over a single JSON tree.
#[derive(Debug)]
pub struct MemoryStore {
    root: Mutex<Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `root`, e.g. a previously exported tree.
    pub fn from_value(root: Value) -> Self {
        Self {
            root: Mutex::new(root),
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Result<Value, CoreError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Value>, CoreError> {
        self.root
            .lock()
            .map_err(|_| CoreError::Store("store lock poisoned".into()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, CoreError> {
        let parts = segments(path)?;
        let root = self.lock()?;
        let mut node = &*root;
        for part in parts {
            match node.get(part) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node.clone()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), CoreError> {
        let parts = segments(path)?;
        let Some((last, parents)) = parts.split_last() else {
            return Err(CoreError::Store("empty path".into()));
        };
        let mut root = self.lock()?;
        let mut node = &mut *root;
        for part in parents {
            node = object_mut(node)
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        object_mut(node).insert(last.to_string(), value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CoreError> {
        let parts = segments(path)?;
        let Some((last, parents)) = parts.split_last() else {
            return Ok(());
        };
        let mut root = self.lock()?;
        let mut node = &mut *root;
        for part in parents {
            match node.get_mut(*part) {
                Some(child) => node = child,
                None => return Ok(()),
            }
        }
        if let Value::Object(map) = node {
            map.remove(*last);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn set_creates_intermediate_objects() {
        let store = MemoryStore::new();
        store.set("papers.doe2020", json!({"title": "T"})).await.unwrap();
        assert_eq!(store.get("papers.doe2020.title").await.unwrap(), Some(json!("T")));
        assert_eq!(
            store.get("papers").await.unwrap(),
            Some(json!({"doe2020": {"title": "T"}}))
        );
    }

    #[tokio::test]
    async fn missing_paths_are_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("papers.nope").await.unwrap(), None);
        assert_eq!(store.get("collections").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_only_the_leaf() {
        let store = MemoryStore::new();
        store.set("papers.a", json!(1)).await.unwrap();
        store.set("papers.b", json!(2)).await.unwrap();
        store.delete("papers.a").await.unwrap();
        store.delete("papers.missing.deeper").await.unwrap();
        assert_eq!(store.get("papers").await.unwrap(), Some(json!({"b": 2})));
    }

    #[tokio::test]
    async fn set_over_scalar_replaces_it() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).await.unwrap();
        store.set("a.b", json!(2)).await.unwrap();
        assert_eq!(store.snapshot().unwrap(), json!({"a": {"b": 2}}));
    }

    #[tokio::test]
    async fn empty_segments_are_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.set("papers..x", json!(1)).await,
            Err(CoreError::Store(_))
        ));
        assert!(store.get("").await.is_err());
    }
}
