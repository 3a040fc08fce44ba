use serde_json::json;
use tracing::{info, warn};

use crate::database::blobs::sanitize_file_name;
use crate::database::{Backend, Collection, Direction, Query};
use crate::error::{Error, Result};
use crate::model::{now, Category, Gallery, Image, PinState, TagId};

pub struct GalleryService {
    backend: Backend,
}

impl GalleryService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn create_gallery(
        &self,
        owner_id: &str,
        name: &str,
        description: &str,
        category: Category,
        tag_ids: Vec<TagId>,
    ) -> Result<Gallery> {
        let name = required_name(name, "Gallery")?;
        let at = now();
        let mut gallery = Gallery {
            id: String::new(),
            name,
            description: description.trim().to_string(),
            owner_id: owner_id.to_string(),
            category,
            images: Vec::new(),
            tag_ids,
            pins: PinState::default(),
            created_at: at,
            updated_at: at,
        };
        gallery.id = self.backend.insert(Collection::Galleries, &gallery)?;
        info!("Created {} gallery {} for {}", category, gallery.id, owner_id);
        Ok(gallery)
    }

    pub fn get_gallery(&self, gallery_id: &str) -> Result<Gallery> {
        self.backend.fetch_required(Collection::Galleries, gallery_id)
    }

    /// Most recently updated first.
    pub fn user_galleries(&self, owner_id: &str, category: Option<Category>) -> Result<Vec<Gallery>> {
        let mut query = Query::new().eq("ownerId", owner_id);
        if let Some(category) = category {
            query = query.eq("category", category.as_str());
        }
        let query = query.order_by("updatedAt", Direction::Descending);
        self.backend.query_as(Collection::Galleries, &query)
    }

    /// Personally pinned galleries of one category, in slot order.
    pub fn pinned_galleries(&self, owner_id: &str, category: Category) -> Result<Vec<Gallery>> {
        let query = Query::new()
            .eq("ownerId", owner_id)
            .eq("category", category.as_str())
            .eq("pinned", true)
            .order_by("pinnedOrder", Direction::Ascending);
        self.backend.query_as(Collection::Galleries, &query)
    }

    pub fn rename_gallery(&self, gallery_id: &str, name: &str) -> Result<()> {
        let name = required_name(name, "Gallery")?;
        self.backend.patch(
            Collection::Galleries,
            gallery_id,
            json!({ "name": name, "updatedAt": now().timestamp_millis() }),
        )
    }

    pub fn update_description(&self, gallery_id: &str, description: &str) -> Result<()> {
        self.backend.patch(
            Collection::Galleries,
            gallery_id,
            json!({ "description": description.trim(), "updatedAt": now().timestamp_millis() }),
        )
    }

    /// Deletes the gallery record. Image blobs are removed on a best-effort basis.
    pub fn delete_gallery(&self, gallery_id: &str) -> Result<Gallery> {
        let gallery = self.get_gallery(gallery_id)?;
        for image in &gallery.images {
            if let Err(e) = self.backend.blobs().delete(&image.storage_path) {
                warn!("Failed to delete blob {}: {}", image.storage_path, e);
            }
        }
        self.backend.remove(Collection::Galleries, gallery_id)?;
        info!("Deleted gallery {} ({} images)", gallery_id, gallery.images.len());
        Ok(gallery)
    }

    pub fn upload_image(
        &self,
        gallery_id: &str,
        file_name: &str,
        bytes: &[u8],
        tag_ids: Vec<TagId>,
    ) -> Result<Image> {
        let gallery = self.get_gallery(gallery_id)?;
        let at = now();
        let path = format!(
            "galleries/{}/{}_{}",
            gallery_id,
            at.timestamp_millis(),
            sanitize_file_name(file_name)
        );
        let blob = self
            .backend
            .blobs()
            .upload(&path, bytes)
            .map_err(|e| Error::persistence(format!("upload of {file_name}"), e))?;

        let image = Image {
            id: format!("img_{}", self.backend.generate_id()),
            name: file_name.to_string(),
            url: blob.url,
            storage_path: blob.path,
            size: blob.size,
            content_type: blob.content_type,
            tag_ids,
            uploaded_at: at,
        };

        let mut images = gallery.images;
        images.push(image.clone());
        self.write_images(gallery_id, &images)?;
        info!("Uploaded {} to gallery {}", image.name, gallery_id);
        Ok(image)
    }

    pub fn remove_image(&self, gallery_id: &str, image_id: &str) -> Result<()> {
        let gallery = self.get_gallery(gallery_id)?;
        let image = gallery
            .images
            .iter()
            .find(|img| img.id == image_id)
            .ok_or_else(|| Error::not_found("image", image_id))?;

        self.backend
            .blobs()
            .delete(&image.storage_path)
            .map_err(|e| Error::persistence(format!("deletion of {}", image.name), e))?;

        let remaining: Vec<Image> = gallery
            .images
            .iter()
            .filter(|img| img.id != image_id)
            .cloned()
            .collect();
        self.write_images(gallery_id, &remaining)
    }

    pub fn rename_image(&self, gallery_id: &str, image_id: &str, name: &str) -> Result<()> {
        let name = required_name(name, "Image")?;
        let mut gallery = self.get_gallery(gallery_id)?;
        let image = gallery
            .images
            .iter_mut()
            .find(|img| img.id == image_id)
            .ok_or_else(|| Error::not_found("image", image_id))?;
        image.name = name;
        self.write_images(gallery_id, &gallery.images)
    }

    /// Finds the owner's gallery embedding `image_id`.
    pub fn find_image(&self, owner_id: &str, image_id: &str) -> Result<Option<(Gallery, Image)>> {
        for gallery in self.user_galleries(owner_id, None)? {
            if let Some(image) = gallery.images.iter().find(|img| img.id == image_id).cloned() {
                return Ok(Some((gallery, image)));
            }
        }
        Ok(None)
    }

    pub(crate) fn write_images(&self, gallery_id: &str, images: &[Image]) -> Result<()> {
        let images = serde_json::to_value(images)
            .map_err(|e| Error::persistence(format!("images of gallery {gallery_id}"), e.into()))?;
        self.backend.patch(
            Collection::Galleries,
            gallery_id,
            json!({ "images": images, "updatedAt": now().timestamp_millis() }),
        )
    }
}

pub(crate) fn required_name(name: &str, what: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{what} name cannot be empty")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, PNG};

    #[test]
    fn create_list_and_rename() -> Result<()> {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());

        let art = galleries.create_gallery("u1", "  Sketches ", "", Category::Art, vec![])?;
        galleries.create_gallery("u1", "Anatomy", "poses", Category::References, vec![])?;
        galleries.create_gallery("u2", "Other", "", Category::Art, vec![])?;

        assert_eq!(art.name, "Sketches");
        assert_eq!(galleries.user_galleries("u1", None)?.len(), 2);
        let only_art = galleries.user_galleries("u1", Some(Category::Art))?;
        assert_eq!(only_art.len(), 1);
        assert_eq!(only_art[0].id, art.id);

        galleries.rename_gallery(&art.id, "Figure sketches")?;
        assert_eq!(galleries.get_gallery(&art.id)?.name, "Figure sketches");
        Ok(())
    }

    #[test]
    fn empty_names_are_rejected() {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());
        let err = galleries
            .create_gallery("u1", "   ", "", Category::Art, vec![])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn missing_gallery_is_not_found() {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());
        assert!(matches!(
            galleries.get_gallery("nope"),
            Err(Error::NotFound { kind: "gallery", .. })
        ));
        assert!(matches!(
            galleries.rename_gallery("nope", "x"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn upload_and_remove_image() -> Result<()> {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());
        let gallery = galleries.create_gallery("u1", "Refs", "", Category::References, vec![])?;

        let image = galleries.upload_image(&gallery.id, "hand.png", &PNG, vec!["t1".into()])?;
        assert!(image.id.starts_with("img_"));
        assert_eq!(image.content_type, "image/png");
        assert!(image.storage_path.starts_with(&format!("galleries/{}/", gallery.id)));
        assert!(fx.blob_dir().join(&image.storage_path).exists());

        let (found, _) = galleries.find_image("u1", &image.id)?.unwrap();
        assert_eq!(found.id, gallery.id);
        assert!(galleries.find_image("u2", &image.id)?.is_none());

        galleries.rename_image(&gallery.id, &image.id, "left hand.png")?;
        assert_eq!(galleries.get_gallery(&gallery.id)?.images[0].name, "left hand.png");

        galleries.remove_image(&gallery.id, &image.id)?;
        assert!(galleries.get_gallery(&gallery.id)?.images.is_empty());
        assert!(!fx.blob_dir().join(&image.storage_path).exists());
        Ok(())
    }

    #[test]
    fn delete_gallery_removes_blobs() -> Result<()> {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());
        let gallery = galleries.create_gallery("u1", "Refs", "", Category::References, vec![])?;
        let image = galleries.upload_image(&gallery.id, "a.png", &PNG, vec![])?;

        galleries.delete_gallery(&gallery.id)?;
        assert!(!fx.blob_dir().join(&image.storage_path).exists());
        assert!(galleries.get_gallery(&gallery.id).is_err());
        Ok(())
    }
}
