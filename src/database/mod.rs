//! Backend collaborators: the record store, the blob store and the typed
//! `Backend` handle the rest of the crate talks through.

pub mod backend;
pub mod blobs;
pub mod repo;
pub mod schema;
pub mod store;

pub use backend::{fields, Backend};
pub use blobs::{BlobStore, FsBlobStore, StoredBlob};
pub use repo::SqliteStore;
pub use store::{Collection, Direction, DocumentStore, Query, StoreError};
