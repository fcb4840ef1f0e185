//! In-memory document store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::traits::store::{apply_set, matches, upserted};
use crate::domain::traits::{Document, DocumentStore};
use crate::application::errors::StorageError;

/// Document store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn ensure_id(document: &mut Document) {
    if !document.contains_key("_id") {
        document.insert(
            "_id".to_string(),
            serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>, StorageError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches(d, filter)))
            .cloned())
    }

    async fn insert(&self, collection: &str, mut document: Document) -> Result<(), StorageError> {
        ensure_id(&mut document);
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        if docs.iter().any(|d| d.get("_id") == document.get("_id")) {
            return Err(StorageError::Conflict(format!(
                "{} {}",
                collection,
                document.get("_id").map(|v| v.to_string()).unwrap_or_default()
            )));
        }
        docs.push(document);
        Ok(())
    }

    async fn update_set(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
        upsert: bool,
    ) -> Result<bool, StorageError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        if let Some(document) = docs.iter_mut().find(|d| matches(d, filter)) {
            apply_set(document, set);
            return Ok(true);
        }

        if upsert {
            let mut document = upserted(filter, set);
            ensure_id(&mut document);
            docs.push(document);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete(&self, collection: &str, filter: &Document) -> Result<bool, StorageError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| matches(d, filter)) {
            Some(index) => {
                docs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self, collection: &str, filter: &Document) -> Result<usize, StorageError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map_or(0, |docs| docs.iter().filter(|d| matches(d, filter)).count()))
    }
}
