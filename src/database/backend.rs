use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::database::blobs::BlobStore;
use crate::database::store::{Collection, DocumentStore, Query, StoreError};
use crate::error::{Error, Result};

/// Shared handle to the record store and blob store. Cloning is cheap; all
/// clones talk to the same backend.
#[derive(Clone)]
pub struct Backend {
    store: Rc<dyn DocumentStore>,
    blobs: Rc<dyn BlobStore>,
}

impl Backend {
    pub fn new(store: impl DocumentStore + 'static, blobs: impl BlobStore + 'static) -> Self {
        Self {
            store: Rc::new(store),
            blobs: Rc::new(blobs),
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn generate_id(&self) -> String {
        self.store.generate_id()
    }

    pub fn fetch<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<Option<T>> {
        match self.store.get(collection, id)? {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    pub fn fetch_required<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<T> {
        self.fetch(collection, id)?
            .ok_or_else(|| Error::not_found(collection.noun(), id))
    }

    pub fn query_as<T: DeserializeOwned>(&self, collection: Collection, query: &Query) -> Result<Vec<T>> {
        self.store
            .query(collection, query)?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Creates a record under a fresh id and returns the id.
    pub fn insert<T: Serialize>(&self, collection: Collection, record: &T) -> Result<String> {
        let what = || format!("new {}", collection.noun());
        let value = serde_json::to_value(record).map_err(|e| Error::persistence(what(), e.into()))?;
        self.store
            .create(collection, value)
            .map_err(|e| Error::persistence(what(), e))
    }

    pub fn put<T: Serialize>(&self, collection: Collection, id: &str, record: &T) -> Result<()> {
        let what = || format!("{} {}", collection.noun(), id);
        let value = serde_json::to_value(record).map_err(|e| Error::persistence(what(), e.into()))?;
        self.store
            .set(collection, id, value)
            .map_err(|e| Error::persistence(what(), e))
    }

    /// Partial update of an existing record. A missing record is `NotFound`.
    pub fn patch(&self, collection: Collection, id: &str, patch: Value) -> Result<()> {
        self.store
            .update(collection, id, fields(patch))
            .map_err(|e| match e {
                StoreError::Missing { .. } => Error::not_found(collection.noun(), id),
                other => Error::persistence(format!("{} {}", collection.noun(), id), other),
            })
    }

    pub fn remove(&self, collection: Collection, id: &str) -> Result<()> {
        self.store
            .delete(collection, id)
            .map_err(|e| Error::persistence(format!("deletion of {} {}", collection.noun(), id), e))
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Backend(e.into()))
}

/// Top-level fields of an object value; anything else yields no fields.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
