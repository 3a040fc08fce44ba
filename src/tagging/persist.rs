use serde::Deserialize;
use serde_json::json;

use crate::database::{Backend, Collection};
use crate::error::{Error, Result};
use crate::library::GalleryService;
use crate::model::{ItemKind, TagId};

/// Where an item kind keeps its tag list in the backend.
pub trait TagField {
    /// Authoritative tag list of an item owned by `owner_id`.
    fn read(&self, backend: &Backend, owner_id: &str, item_id: &str) -> Result<Vec<TagId>>;

    fn write(&self, backend: &Backend, owner_id: &str, item_id: &str, tags: &[TagId]) -> Result<()>;
}

static GALLERY_TAGS: RecordTags = RecordTags(Collection::Galleries);
static FOLDER_TAGS: RecordTags = RecordTags(Collection::Folders);
static DOCUMENT_TAGS: RecordTags = RecordTags(Collection::Documents);
static IMAGE_TAGS: ImageTags = ImageTags;

pub fn tag_field(kind: ItemKind) -> &'static dyn TagField {
    match kind {
        ItemKind::Gallery => &GALLERY_TAGS,
        ItemKind::Folder => &FOLDER_TAGS,
        ItemKind::Document => &DOCUMENT_TAGS,
        ItemKind::Image => &IMAGE_TAGS,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagHolder {
    owner_id: String,
    #[serde(default)]
    tag_ids: Vec<TagId>,
}

/// Galleries, folders and documents hold `tagIds` on their own record.
struct RecordTags(Collection);

impl TagField for RecordTags {
    fn read(&self, backend: &Backend, owner_id: &str, item_id: &str) -> Result<Vec<TagId>> {
        let holder: TagHolder = backend.fetch_required(self.0, item_id)?;
        if holder.owner_id != owner_id {
            return Err(Error::not_found(self.0.noun(), item_id));
        }
        Ok(holder.tag_ids)
    }

    fn write(&self, backend: &Backend, _owner_id: &str, item_id: &str, tags: &[TagId]) -> Result<()> {
        backend.patch(self.0, item_id, json!({ "tagIds": tags }))
    }
}

/// Images live inside their gallery's record, so tagging one rewrites the
/// gallery's image list.
struct ImageTags;

impl TagField for ImageTags {
    fn read(&self, backend: &Backend, owner_id: &str, item_id: &str) -> Result<Vec<TagId>> {
        let (_, image) = GalleryService::new(backend.clone())
            .find_image(owner_id, item_id)?
            .ok_or_else(|| Error::not_found("image", item_id))?;
        Ok(image.tag_ids)
    }

    fn write(&self, backend: &Backend, owner_id: &str, item_id: &str, tags: &[TagId]) -> Result<()> {
        let galleries = GalleryService::new(backend.clone());
        let (mut gallery, _) = galleries
            .find_image(owner_id, item_id)?
            .ok_or_else(|| Error::not_found("image", item_id))?;

        for image in gallery.images.iter_mut().filter(|img| img.id == item_id) {
            image.tag_ids = tags.to_vec();
        }
        galleries.write_images(&gallery.id, &gallery.images)
    }
}
