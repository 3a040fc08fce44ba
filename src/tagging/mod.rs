//! User-defined tags and the per-item tag lists they are attached through.

pub mod persist;
pub mod registry;

pub use persist::{tag_field, TagField};
pub use registry::{normalize_color, TagRegistry, TaggedItem};
