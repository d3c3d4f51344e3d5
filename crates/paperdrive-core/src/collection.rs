//! Named, ordered sets of paper ids.
//!
//! Collections reference papers by id only. Deleting a collection never
//! touches the papers in it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;
use crate::store::KeyValueStore;

const NAMESPACE: &str = "collections";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collection {
    pub key: String,
    pub name: String,
    pub papers: Vec<String>,
}

impl Collection {
    pub fn contains(&self, paper_id: &str) -> bool {
        self.papers.iter().any(|p| p == paper_id)
    }
}

/// Collection key for `name`: lowercase alphanumerics, other runs become `-`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "collection".to_string()
    } else {
        trimmed.to_string()
    }
}

fn path(key: &str) -> String {
    format!("{NAMESPACE}.{key}")
}

/// Collection operations over a [`KeyValueStore`].
#[derive(Clone)]
pub struct CollectionIndex {
    store: Arc<dyn KeyValueStore>,
}

impl CollectionIndex {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Create an empty collection with a fresh key derived from `name`.
    pub async fn create(&self, name: &str) -> Result<Collection, CoreError> {
        let base = slug(name);
        let mut key = base.clone();
        let mut n = 2;
        while self.store.get(&path(&key)).await?.is_some() {
            key = format!("{base}-{n}");
            n += 1;
        }

        let collection = Collection {
            key,
            name: name.trim().to_string(),
            papers: Vec::new(),
        };
        self.save(&collection).await?;
        log::debug!("created collection '{}'", collection.key);
        Ok(collection)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Collection>, CoreError> {
        let Some(value) = self.store.get(&path(key)).await? else {
            return Ok(None);
        };
        let mut collection: Collection = serde_json::from_value(value)?;
        collection.key = key.to_string();
        Ok(Some(collection))
    }

    /// All collections in key order.
    pub async fn list(&self) -> Result<Vec<Collection>, CoreError> {
        let Some(Value::Object(entries)) = self.store.get(NAMESPACE).await? else {
            return Ok(Vec::new());
        };
        let mut collections = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let mut collection: Collection = serde_json::from_value(value)?;
            collection.key = key;
            collections.push(collection);
        }
        collections.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(collections)
    }

    /// Change the display name. The key stays the same.
    pub async fn rename(&self, key: &str, name: &str) -> Result<Collection, CoreError> {
        let mut collection = self.require(key).await?;
        collection.name = name.trim().to_string();
        self.save(&collection).await?;
        Ok(collection)
    }

    /// Append `paper_id` unless already present.
    pub async fn add_paper(&self, key: &str, paper_id: &str) -> Result<Collection, CoreError> {
        let mut collection = self.require(key).await?;
        if !collection.contains(paper_id) {
            collection.papers.push(paper_id.to_string());
            self.save(&collection).await?;
        }
        Ok(collection)
    }

    pub async fn remove_paper(&self, key: &str, paper_id: &str) -> Result<Collection, CoreError> {
        let mut collection = self.require(key).await?;
        let before = collection.papers.len();
        collection.papers.retain(|p| p != paper_id);
        if collection.papers.len() != before {
            self.save(&collection).await?;
        }
        Ok(collection)
    }

    pub async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.store.delete(&path(key)).await
    }

    pub async fn contains(&self, key: &str, paper_id: &str) -> Result<bool, CoreError> {
        Ok(self
            .get(key)
            .await?
            .is_some_and(|c| c.contains(paper_id)))
    }

    async fn require(&self, key: &str) -> Result<Collection, CoreError> {
        self.get(key)
            .await?
            .ok_or_else(|| CoreError::CollectionNotFound(key.to_string()))
    }

    async fn save(&self, collection: &Collection) -> Result<(), CoreError> {
        let value = serde_json::to_value(collection)?;
        self.store.set(&path(&collection.key), value).await
    }
}
