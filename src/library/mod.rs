//! Gallery, folder and document bookkeeping on top of the backend.

pub mod filters;
pub mod folders;
pub mod galleries;
pub mod recent;
pub mod showcase;

pub use filters::{dashboard_order, folders_with_tags, galleries_with_tags};
pub use folders::FolderService;
pub use galleries::GalleryService;
pub use recent::{recent_uploads, Upload, RECENT_LIMIT};
pub use showcase::{search_showcase, ShowcaseService};
