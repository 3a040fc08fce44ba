//! Personal art and reference library: galleries of images, folders of
//! documents, tags, pins and a public showcase, over a local document store.

pub mod auth;
pub mod bookmarks;
pub mod database;
pub mod error;
pub mod ingest;
pub mod library;
pub mod model;
pub mod pinning;
pub mod session;
pub mod tagging;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use session::Session;
