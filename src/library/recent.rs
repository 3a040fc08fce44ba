use chrono::{DateTime, Utc};

use crate::database::Backend;
use crate::error::Result;
use crate::library::folders::FolderService;
use crate::library::galleries::GalleryService;
use crate::model::{Category, Document, Image};

pub const RECENT_LIMIT: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub enum Upload {
    Image {
        gallery_id: String,
        category: Category,
        image: Image,
    },
    Document(Document),
}

impl Upload {
    pub fn id(&self) -> &str {
        match self {
            Upload::Image { image, .. } => &image.id,
            Upload::Document(doc) => &doc.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Upload::Image { image, .. } => &image.name,
            Upload::Document(doc) => &doc.name,
        }
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        match self {
            Upload::Image { image, .. } => image.uploaded_at,
            Upload::Document(doc) => doc.uploaded_at,
        }
    }
}

/// The owner's newest images and documents, merged.
pub fn recent_uploads(backend: &Backend, owner_id: &str, limit: usize) -> Result<Vec<Upload>> {
    let mut uploads: Vec<Upload> = FolderService::new(backend.clone())
        .user_documents(owner_id)?
        .into_iter()
        .take(limit)
        .map(Upload::Document)
        .collect();

    for gallery in GalleryService::new(backend.clone()).user_galleries(owner_id, None)? {
        uploads.extend(gallery.images.into_iter().map(|image| Upload::Image {
            gallery_id: gallery.id.clone(),
            category: gallery.category,
            image,
        }));
    }

    uploads.sort_by(|a, b| b.uploaded_at().cmp(&a.uploaded_at()));
    uploads.truncate(limit);
    Ok(uploads)
}
