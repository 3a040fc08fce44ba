//! Shared fixtures for unit tests.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use serde_json::{Map, Value};
use tempfile::TempDir;

use crate::database::{Backend, Collection, DocumentStore, FsBlobStore, Query, SqliteStore, StoreError};

/// PNG signature followed by the start of an IHDR chunk; enough for type sniffing.
pub const PNG: [u8; 16] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

pub struct Fixture {
    pub backend: Backend,
    fail_writes: Rc<Cell<bool>>,
    fail_collection: Rc<Cell<Option<Collection>>>,
    dir: TempDir,
}

impl Fixture {
    pub fn blob_dir(&self) -> &Path {
        self.dir.path()
    }

    /// While set, every record write is rejected as if the backend were unreachable.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    /// Rejects writes to one collection only; `None` clears it.
    pub fn fail_writes_to(&self, collection: Option<Collection>) {
        self.fail_collection.set(collection);
    }
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("temp dir");
    let fail_writes = Rc::new(Cell::new(false));
    let fail_collection = Rc::new(Cell::new(None));
    let store = FlakyStore {
        inner: SqliteStore::open_in_memory().expect("in-memory store"),
        fail_writes: fail_writes.clone(),
        fail_collection: fail_collection.clone(),
    };
    let blobs = FsBlobStore::new(dir.path(), "file:///blobs");
    Fixture {
        backend: Backend::new(store, blobs),
        fail_writes,
        fail_collection,
        dir,
    }
}

struct FlakyStore {
    inner: SqliteStore,
    fail_writes: Rc<Cell<bool>>,
    fail_collection: Rc<Cell<Option<Collection>>>,
}

impl FlakyStore {
    fn check(&self, collection: Collection) -> Result<(), StoreError> {
        if self.fail_writes.get() || self.fail_collection.get() == Some(collection) {
            Err(StoreError::Unavailable("writes disabled by test".into()))
        } else {
            Ok(())
        }
    }
}

impl DocumentStore for FlakyStore {
    fn generate_id(&self) -> String {
        self.inner.generate_id()
    }

    fn set(&self, collection: Collection, id: &str, data: Value) -> Result<(), StoreError> {
        self.check(collection)?;
        self.inner.set(collection, id, data)
    }

    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(collection, id)
    }

    fn update(&self, collection: Collection, id: &str, patch: Map<String, Value>) -> Result<(), StoreError> {
        self.check(collection)?;
        self.inner.update(collection, id, patch)
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.check(collection)?;
        self.inner.delete(collection, id)
    }

    fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.inner.query(collection, query)
    }
}
