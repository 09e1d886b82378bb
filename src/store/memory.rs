use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Document, DocumentStore, StoreError, ID_FIELD};

/// An in-process document store keeping all collections in memory.
///
/// This backs the service in tests and single-node deployments; the
/// [`DocumentStore`] seam allows swapping in an external document database
/// without touching the rest of the service.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn put(&self, collection: &str, id: &str, document: Document) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.contains_key(id) {
            return Err(StoreError::AlreadyExists);
        }
        documents.insert(id.to_string(), document);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let removed = collections
            .get_mut(collection)
            .and_then(|documents| documents.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }

    async fn documents(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_collection(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), StoreError> {
        let rekeyed = documents
            .into_iter()
            .map(|document| {
                let id = document.get(ID_FIELD).map(id_string).ok_or_else(|| {
                    StoreError::InvalidDocument(<serde_json::Error as serde::de::Error>::custom(
                        "document without an _id field",
                    ))
                })?;
                Ok((id, document))
            })
            .collect::<Result<BTreeMap<_, _>, StoreError>>()?;
        let mut collections = self.collections.write().await;
        collections.insert(collection.to_string(), rekeyed);
        Ok(())
    }
}
