//! Persistence of datasets, upload boxes, accession maps and work packages.
//!
//! The service projects its state into a document store where every document
//! is keyed by its domain ID under `_id`. The [`DocumentStore`] trait is the
//! seam towards the concrete store; [`Dao`] adds typed access on top of it.

mod memory;
pub mod migrations;

pub use self::memory::MemoryStore;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A raw JSON document as stored in a collection.
pub type Document = serde_json::Map<String, Value>;

/// The field under which the primary key is stored in a document.
pub const ID_FIELD: &str = "_id";

/// Errors raised by document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("resource with this ID already exists")]
    AlreadyExists,
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

/// A document store holding named collections of JSON documents keyed by a
/// primary ID.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the document with the given ID, if present.
    async fn find(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert or replace the document with the given ID.
    async fn put(&self, collection: &str, id: &str, document: Document) -> Result<(), StoreError>;

    /// Insert the document, failing with [`StoreError::AlreadyExists`] if a
    /// document with the same ID is already present.
    async fn insert(&self, collection: &str, id: &str, document: Document)
        -> Result<(), StoreError>;

    /// Delete the document with the given ID, failing with
    /// [`StoreError::NotFound`] if it is absent.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// All documents of the collection, used by migrations.
    async fn documents(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Replace the whole collection with the given documents, re-keyed by
    /// their `_id` fields. Used by migrations.
    async fn replace_collection(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), StoreError>;
}

/// An entity that knows its primary key.
pub trait Identified {
    /// The canonical string form of the primary key.
    fn primary_id(&self) -> String;
}

impl Identified for crate::models::Dataset {
    fn primary_id(&self) -> String {
        self.id.clone()
    }
}

impl Identified for crate::models::UploadBoxBasics {
    fn primary_id(&self) -> String {
        self.id.to_string()
    }
}

impl Identified for crate::models::FileAccessionMap {
    fn primary_id(&self) -> String {
        self.accession.clone()
    }
}

impl Identified for crate::models::WorkPackage {
    fn primary_id(&self) -> String {
        self.id.to_string()
    }
}

/// Typed access to one collection of a [`DocumentStore`].
///
/// On write the entity's ID field is moved to `_id`; on read it is moved
/// back, so the stored documents use the domain ID as their primary key.
pub struct Dao<T> {
    store: Arc<dyn DocumentStore>,
    collection: String,
    id_field: &'static str,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Dao<T>
where
    T: Serialize + DeserializeOwned + Identified + Send + Sync,
{
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, id_field: &'static str) -> Self {
        Dao {
            store,
            collection: collection.to_string(),
            id_field,
            _entity: PhantomData,
        }
    }

    fn to_document(&self, entity: &T) -> Result<Document, StoreError> {
        let value = serde_json::to_value(entity)?;
        let mut document = match value {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::InvalidDocument(
                    <serde_json::Error as serde::ser::Error>::custom(
                        "entity did not serialize to an object",
                    ),
                ))
            }
        };
        if let Some(id) = document.remove(self.id_field) {
            document.insert(ID_FIELD.to_string(), id);
        }
        Ok(document)
    }

    fn from_document(&self, mut document: Document) -> Result<T, StoreError> {
        if let Some(id) = document.remove(ID_FIELD) {
            document.insert(self.id_field.to_string(), id);
        }
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    /// Fetch the entity with the given ID.
    pub async fn get_by_id(&self, id: &str) -> Result<T, StoreError> {
        match self.store.find(&self.collection, id).await? {
            Some(document) => self.from_document(document),
            None => Err(StoreError::NotFound),
        }
    }

    /// Insert or replace the entity.
    pub async fn upsert(&self, entity: &T) -> Result<(), StoreError> {
        let document = self.to_document(entity)?;
        self.store
            .put(&self.collection, &entity.primary_id(), document)
            .await
    }

    /// Insert the entity, failing if its ID is already taken.
    pub async fn insert(&self, entity: &T) -> Result<(), StoreError> {
        let document = self.to_document(entity)?;
        self.store
            .insert(&self.collection, &entity.primary_id(), document)
            .await
    }

    /// Delete the entity with the given ID.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&self.collection, id).await
    }
}
