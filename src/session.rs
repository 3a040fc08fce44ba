//! The signed-in user's view of the library. Every command goes through one
//! `Session`, which owns the backend handle, the auth flows and the tag cache.

use std::fs;

use tracing::{debug, info};

use crate::auth::{AuthFailure, AuthService, NewAccount, ProfileUpdate};
use crate::bookmarks::{BookmarkService, BookmarkedItem};
use crate::database::{Backend, FsBlobStore, SqliteStore, StoreError};
use crate::error::{Error, Result};
use crate::library::{
    dashboard_order, folders_with_tags, galleries_with_tags, recent_uploads, search_showcase,
    FolderService, GalleryService, ShowcaseService, Upload,
};
use crate::model::{
    Bookmark, BookmarkKind, Category, Document, Folder, Gallery, Image, ItemKind, Tag, TagId,
    UserProfile,
};
use crate::pinning::{PinAllocator, PinTarget, Scope};
use crate::tagging::{TagRegistry, TaggedItem};
use crate::utils::config::Config;

pub struct Session {
    backend: Backend,
    auth: AuthService,
    registry: Option<TagRegistry>,
}

impl Session {
    pub fn new(backend: Backend) -> Self {
        Self {
            auth: AuthService::local(backend.clone()),
            backend,
            registry: None,
        }
    }

    /// Opens the SQLite store and blob directory named by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.blob_dir).map_err(StoreError::from)?;
        if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StoreError::from)?;
        }
        let store = SqliteStore::open(&config.db_path)?;
        let blobs = FsBlobStore::new(&config.blob_dir, config.public_base_url.as_str());
        debug!("Session over {:?} and {:?}", config.db_path, config.blob_dir);
        Ok(Self::new(Backend::new(store, blobs)))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    // Account

    pub fn signup(&mut self, account: &NewAccount) -> Result<UserProfile> {
        self.registry = None;
        self.auth.signup(account)
    }

    pub fn signin(&mut self, email: &str, password: &str) -> Result<UserProfile> {
        self.registry = None;
        self.auth.signin(email, password)
    }

    pub fn signout(&mut self) -> Result<()> {
        self.registry = None;
        self.auth.logout()
    }

    pub fn request_password_reset(&self, email: &str) -> Result<()> {
        self.auth.request_password_reset(email)
    }

    pub fn whoami(&self) -> Result<Option<UserProfile>> {
        self.auth.current_user()
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        self.auth.update_profile(update)
    }

    pub fn user(&self) -> Result<UserProfile> {
        self.auth.require_user()
    }

    fn uid(&self) -> Result<String> {
        match self.auth.identity().current()? {
            Some(identity) => Ok(identity.uid),
            None => Err(AuthFailure::NotSignedIn.into()),
        }
    }

    // Galleries

    pub fn create_gallery(
        &mut self,
        name: &str,
        description: &str,
        category: Category,
        tag_ids: Vec<TagId>,
    ) -> Result<Gallery> {
        let uid = self.uid()?;
        let gallery = self.galleries().create_gallery(&uid, name, description, category, tag_ids)?;
        self.tags()?.hydrate_galleries(std::slice::from_ref(&gallery));
        Ok(gallery)
    }

    /// The user's galleries in dashboard order: pinned first, then newest.
    pub fn list_galleries(&self, category: Option<Category>) -> Result<Vec<Gallery>> {
        let uid = self.uid()?;
        let mut galleries = self.galleries().user_galleries(&uid, category)?;
        dashboard_order(&mut galleries);
        Ok(galleries)
    }

    pub fn gallery(&self, gallery_id: &str) -> Result<Gallery> {
        let uid = self.uid()?;
        let gallery = self.galleries().get_gallery(gallery_id)?;
        if gallery.owner_id != uid {
            return Err(Error::not_found("gallery", gallery_id));
        }
        Ok(gallery)
    }

    pub fn rename_gallery(&self, gallery_id: &str, name: &str) -> Result<()> {
        self.gallery(gallery_id)?;
        self.galleries().rename_gallery(gallery_id, name)
    }

    pub fn describe_gallery(&self, gallery_id: &str, description: &str) -> Result<()> {
        self.gallery(gallery_id)?;
        self.galleries().update_description(gallery_id, description)
    }

    pub fn delete_gallery(&mut self, gallery_id: &str) -> Result<Gallery> {
        self.gallery(gallery_id)?;
        let gallery = self.galleries().delete_gallery(gallery_id)?;
        if let Some(registry) = self.registry.as_mut() {
            registry.forget(&gallery.id);
            for image in &gallery.images {
                registry.forget(&image.id);
            }
        }
        Ok(gallery)
    }

    pub fn upload_image(
        &mut self,
        gallery_id: &str,
        file_name: &str,
        bytes: &[u8],
        tag_ids: Vec<TagId>,
    ) -> Result<Image> {
        self.gallery(gallery_id)?;
        let image = self.galleries().upload_image(gallery_id, file_name, bytes, tag_ids)?;
        self.tags()?
            .sync_item_tags(&image.id, ItemKind::Image, image.tag_ids.clone());
        Ok(image)
    }

    pub fn remove_image(&mut self, gallery_id: &str, image_id: &str) -> Result<()> {
        self.gallery(gallery_id)?;
        self.galleries().remove_image(gallery_id, image_id)?;
        if let Some(registry) = self.registry.as_mut() {
            registry.forget(image_id);
        }
        Ok(())
    }

    pub fn rename_image(&self, gallery_id: &str, image_id: &str, name: &str) -> Result<()> {
        self.gallery(gallery_id)?;
        self.galleries().rename_image(gallery_id, image_id, name)
    }

    pub fn pin_gallery(&self, gallery_id: &str) -> Result<u32> {
        let gallery = self.gallery(gallery_id)?;
        let scope = Scope::gallery(&gallery.owner_id, gallery.category);
        self.pins().pin(PinTarget::Gallery, gallery_id, &scope)
    }

    pub fn unpin_gallery(&self, gallery_id: &str) -> Result<()> {
        self.gallery(gallery_id)?;
        self.pins().unpin(PinTarget::Gallery, gallery_id)
    }

    pub fn showcase_gallery(&self, gallery_id: &str) -> Result<u32> {
        let gallery = self.gallery(gallery_id)?;
        let scope = Scope::gallery(&gallery.owner_id, gallery.category);
        self.pins().showcase_pin(PinTarget::Gallery, gallery_id, &scope)
    }

    pub fn unshowcase_gallery(&self, gallery_id: &str) -> Result<()> {
        self.gallery(gallery_id)?;
        self.pins().showcase_unpin(PinTarget::Gallery, gallery_id)
    }

    /// Galleries of a category where the gallery or one of its images carries every selected tag.
    pub fn galleries_tagged(&self, category: Option<Category>, selected: &[TagId]) -> Result<Vec<Gallery>> {
        let galleries = self.list_galleries(category)?;
        Ok(galleries_with_tags(&galleries, selected)
            .into_iter()
            .cloned()
            .collect())
    }

    // Folders and documents

    pub fn create_folder(&mut self, name: &str, description: &str, tag_ids: Vec<TagId>) -> Result<Folder> {
        let uid = self.uid()?;
        let folder = self.folders().create_folder(&uid, name, description, tag_ids)?;
        self.tags()?.hydrate_folders(std::slice::from_ref(&folder));
        Ok(folder)
    }

    pub fn list_folders(&self) -> Result<Vec<Folder>> {
        let uid = self.uid()?;
        let mut folders = self.folders().user_folders(&uid)?;
        dashboard_order(&mut folders);
        Ok(folders)
    }

    pub fn folder(&self, folder_id: &str) -> Result<Folder> {
        let uid = self.uid()?;
        let folder = self.folders().get_folder(folder_id)?;
        if folder.owner_id != uid {
            return Err(Error::not_found("folder", folder_id));
        }
        Ok(folder)
    }

    pub fn folder_documents(&self, folder_id: &str) -> Result<Vec<Document>> {
        self.folder(folder_id)?;
        self.folders().folder_documents(folder_id)
    }

    pub fn rename_folder(&self, folder_id: &str, name: &str) -> Result<()> {
        self.folder(folder_id)?;
        self.folders().rename_folder(folder_id, name)
    }

    pub fn delete_folder(&mut self, folder_id: &str) -> Result<Folder> {
        self.folder(folder_id)?;
        let documents = self.folders().folder_documents(folder_id)?;
        let folder = self.folders().delete_folder(folder_id)?;
        if let Some(registry) = self.registry.as_mut() {
            registry.forget(&folder.id);
            for document in &documents {
                registry.forget(&document.id);
            }
        }
        Ok(folder)
    }

    pub fn pin_folder(&self, folder_id: &str) -> Result<u32> {
        let folder = self.folder(folder_id)?;
        self.pins()
            .pin(PinTarget::Folder, folder_id, &Scope::folder(&folder.owner_id))
    }

    pub fn unpin_folder(&self, folder_id: &str) -> Result<()> {
        self.folder(folder_id)?;
        self.pins().unpin(PinTarget::Folder, folder_id)
    }

    pub fn showcase_folder(&self, folder_id: &str) -> Result<u32> {
        let folder = self.folder(folder_id)?;
        self.pins()
            .showcase_pin(PinTarget::Folder, folder_id, &Scope::folder(&folder.owner_id))
    }

    pub fn unshowcase_folder(&self, folder_id: &str) -> Result<()> {
        self.folder(folder_id)?;
        self.pins().showcase_unpin(PinTarget::Folder, folder_id)
    }

    pub fn folders_tagged(&self, selected: &[TagId]) -> Result<Vec<Folder>> {
        let folders = self.list_folders()?;
        let documents = self.list_documents()?;
        Ok(folders_with_tags(&folders, &documents, selected)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn upload_document(
        &mut self,
        file_name: &str,
        bytes: &[u8],
        folder_id: Option<&str>,
        tag_ids: Vec<TagId>,
    ) -> Result<Document> {
        let uid = self.uid()?;
        let document = self
            .folders()
            .upload_document(&uid, file_name, bytes, folder_id, tag_ids)?;
        self.tags()?.hydrate_documents(std::slice::from_ref(&document));
        Ok(document)
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let uid = self.uid()?;
        self.folders().user_documents(&uid)
    }

    pub fn document(&self, document_id: &str) -> Result<Document> {
        let uid = self.uid()?;
        let document = self.folders().get_document(document_id)?;
        if document.owner_id != uid {
            return Err(Error::not_found("document", document_id));
        }
        Ok(document)
    }

    pub fn delete_document(&mut self, document_id: &str) -> Result<Document> {
        self.document(document_id)?;
        let document = self.folders().delete_document(document_id)?;
        if let Some(registry) = self.registry.as_mut() {
            registry.forget(&document.id);
        }
        Ok(document)
    }

    pub fn move_document(&self, document_id: &str, folder_id: Option<&str>) -> Result<()> {
        self.document(document_id)?;
        self.folders().move_document(document_id, folder_id)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<Upload>> {
        let uid = self.uid()?;
        recent_uploads(&self.backend, &uid, limit)
    }

    // Tags

    /// The tag cache of the signed-in user, loaded and hydrated on first use.
    pub fn tags(&mut self) -> Result<&mut TagRegistry> {
        let uid = self.uid()?;
        let stale = self
            .registry
            .as_ref()
            .map_or(true, |registry| registry.owner_id() != uid);
        if stale {
            let mut registry = TagRegistry::new(self.backend.clone(), &uid);
            registry.load()?;
            registry.hydrate_galleries(&self.galleries().user_galleries(&uid, None)?);
            registry.hydrate_folders(&self.folders().user_folders(&uid)?);
            registry.hydrate_documents(&self.folders().user_documents(&uid)?);
            debug!(
                "Tag cache for {}: {} tag(s), {} tagged item(s)",
                uid,
                registry.tags().len(),
                registry.tagged_items().count()
            );
            self.registry = Some(registry);
        }
        self.registry
            .as_mut()
            .ok_or_else(|| AuthFailure::NotSignedIn.into())
    }

    pub fn create_tag(&mut self, name: &str, color: &str) -> Result<Tag> {
        self.tags()?.create_tag(name, color)
    }

    pub fn update_tag(&mut self, tag_id: &str, name: Option<&str>, color: Option<&str>) -> Result<Tag> {
        self.tags()?.update_tag(tag_id, name, color)
    }

    pub fn delete_tag(&mut self, tag_id: &str) -> Result<()> {
        self.tags()?.delete_tag(tag_id)
    }

    /// Resolves a tag given by id or by name.
    pub fn resolve_tag(&mut self, id_or_name: &str) -> Result<Tag> {
        let registry = self.tags()?;
        registry
            .tag(id_or_name)
            .or_else(|| registry.tag_by_name(id_or_name))
            .cloned()
            .ok_or_else(|| Error::not_found("tag", id_or_name))
    }

    pub fn tag_item(&mut self, item_id: &str, kind: ItemKind, tag_id: &str) -> Result<()> {
        self.tags()?.add_tag_to_item(item_id, kind, tag_id)
    }

    pub fn untag_item(&mut self, item_id: &str, tag_id: &str) -> Result<()> {
        self.tags()?.remove_tag_from_item(item_id, tag_id)
    }

    pub fn item_tags(&mut self, item_id: &str) -> Result<Vec<Tag>> {
        Ok(self
            .tags()?
            .get_item_tags(item_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn items_by_tags(&mut self, tag_ids: &[TagId], kind: Option<ItemKind>) -> Result<Vec<TaggedItem>> {
        Ok(self
            .tags()?
            .get_items_by_tags(tag_ids, kind)
            .into_iter()
            .cloned()
            .collect())
    }

    // Bookmarks

    /// Bookmarks another user's showcased gallery or folder.
    pub fn bookmark(&self, item_id: &str, kind: BookmarkKind) -> Result<Bookmark> {
        let uid = self.uid()?;
        let source_owner = match kind {
            BookmarkKind::Gallery => self.galleries().get_gallery(item_id)?.owner_id,
            BookmarkKind::Folder => self.folders().get_folder(item_id)?.owner_id,
        };
        self.bookmarks()
            .create_bookmark(&uid, item_id, kind, &source_owner)
    }

    pub fn unbookmark(&self, item_id: &str) -> Result<usize> {
        let uid = self.uid()?;
        let removed = self.bookmarks().delete_bookmark(&uid, item_id)?;
        info!("Removed {} bookmark(s) on {}", removed, item_id);
        Ok(removed)
    }

    pub fn bookmarks(&self) -> BookmarkService {
        BookmarkService::new(self.backend.clone())
    }

    pub fn bookmarked_items(&self) -> Result<Vec<BookmarkedItem>> {
        let uid = self.uid()?;
        self.bookmarks().bookmarked_items(&uid)
    }

    // Showcase, open to anyone

    pub fn showcase_galleries(&self, category: Category, search: &str) -> Result<Vec<Gallery>> {
        let galleries = ShowcaseService::new(self.backend.clone()).showcase_galleries(category)?;
        Ok(search_showcase(galleries, search))
    }

    pub fn showcase_folders(&self, search: &str) -> Result<Vec<Folder>> {
        let folders = ShowcaseService::new(self.backend.clone()).showcase_folders()?;
        Ok(search_showcase(folders, search))
    }

    fn galleries(&self) -> GalleryService {
        GalleryService::new(self.backend.clone())
    }

    fn folders(&self) -> FolderService {
        FolderService::new(self.backend.clone())
    }

    fn pins(&self) -> PinAllocator {
        PinAllocator::new(self.backend.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, PNG};

    fn signed_up(session: &mut Session, screen_name: &str) -> Result<UserProfile> {
        session.signup(&NewAccount {
            email: format!("{screen_name}@example.com"),
            password: "secret1".into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            screen_name: screen_name.into(),
        })
    }

    #[test]
    fn operations_require_a_signed_in_user() {
        let fx = fixture();
        let mut session = Session::new(fx.backend.clone());
        assert!(matches!(
            session.create_folder("F", "", vec![]),
            Err(Error::Auth(AuthFailure::NotSignedIn))
        ));
        assert!(matches!(session.tags(), Err(Error::Auth(AuthFailure::NotSignedIn))));
        assert!(session.showcase_folders("").is_ok());
    }

    #[test]
    fn other_users_items_look_missing() -> Result<()> {
        let fx = fixture();
        let mut session = Session::new(fx.backend.clone());
        signed_up(&mut session, "alice")?;
        let gallery = session.create_gallery("Mine", "", Category::Art, vec![])?;

        signed_up(&mut session, "bob")?;
        assert!(matches!(
            session.rename_gallery(&gallery.id, "Stolen"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(session.pin_gallery(&gallery.id), Err(Error::NotFound { .. })));
        Ok(())
    }

    #[test]
    fn fourth_pin_is_refused_with_a_hint() -> Result<()> {
        let fx = fixture();
        let mut session = Session::new(fx.backend.clone());
        signed_up(&mut session, "alice")?;
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            ids.push(session.create_folder(name, "", vec![])?.id);
        }
        for id in &ids[..3] {
            session.pin_folder(id)?;
        }
        let err = session.pin_folder(&ids[3]).unwrap_err();
        assert_eq!(
            err.user_message(),
            "Maximum of 3 pinned folders reached. Unpin one before pinning another."
        );
        assert!(err.remediation().is_some());

        let listed = session.list_folders()?;
        assert!(listed[..3].iter().all(|f| f.pins.pinned));
        Ok(())
    }

    #[test]
    fn tag_cache_follows_the_library() -> Result<()> {
        let fx = fixture();
        let mut session = Session::new(fx.backend.clone());
        signed_up(&mut session, "alice")?;
        let work = session.create_tag("work", "#ff0000")?;
        let urgent = session.create_tag("urgent", "#00ff00")?;

        let gallery = session.create_gallery("G", "", Category::References, vec![work.id.clone()])?;
        let image = session.upload_image(&gallery.id, "a.png", &PNG, vec![])?;
        session.tag_item(&image.id, ItemKind::Image, &work.id)?;
        session.tag_item(&image.id, ItemKind::Image, &urgent.id)?;

        let both = session.items_by_tags(&[work.id.clone(), urgent.id.clone()], None)?;
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].item_id, image.id);
        assert_eq!(
            session.galleries_tagged(None, &[urgent.id.clone()])?.len(),
            1
        );

        // a fresh session rebuilds the same view from the backend
        let mut again = Session::new(fx.backend.clone());
        assert_eq!(again.item_tags(&image.id)?.len(), 2);
        assert_eq!(again.resolve_tag("URGENT")?.id, urgent.id);

        session.delete_gallery(&gallery.id)?;
        assert!(session.items_by_tags(&[work.id.clone()], None)?.is_empty());
        Ok(())
    }

    #[test]
    fn bookmarks_point_at_other_users_showcase() -> Result<()> {
        let fx = fixture();
        let mut session = Session::new(fx.backend.clone());
        signed_up(&mut session, "alice")?;
        let folder = session.create_folder("Public", "shared notes", vec![])?;
        session.showcase_folder(&folder.id)?;

        signed_up(&mut session, "bob")?;
        assert_eq!(session.showcase_folders("NOTES")?.len(), 1);
        let bookmark = session.bookmark(&folder.id, BookmarkKind::Folder)?;
        assert_ne!(bookmark.source_owner_user_id, bookmark.owner_user_id);
        assert_eq!(session.bookmarked_items()?.len(), 1);
        assert_eq!(session.unbookmark(&folder.id)?, 1);
        Ok(())
    }
}
