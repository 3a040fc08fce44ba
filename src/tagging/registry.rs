use std::collections::BTreeMap;

use serde_json::json;
use tracing::{info, warn};

use crate::database::{Backend, Collection, Direction, Query};
use crate::error::{Error, Result};
use crate::library::{FolderService, GalleryService};
use crate::model::{now, Document, Folder, Gallery, ItemKind, Tag, TagId};
use crate::tagging::persist::tag_field;

/// Local view of one item's tags. Only items with at least one tag are tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedItem {
    pub item_id: String,
    pub item_type: ItemKind,
    pub tag_ids: Vec<TagId>,
}

/// The signed-in user's tags and the tag lists of every item they have
/// loaded. Mutations are applied locally first and undone if the backend
/// write fails.
pub struct TagRegistry {
    backend: Backend,
    owner_id: String,
    tags: Vec<Tag>,
    items: BTreeMap<String, TaggedItem>,
}

impl TagRegistry {
    pub fn new(backend: Backend, owner_id: &str) -> Self {
        Self {
            backend,
            owner_id: owner_id.to_string(),
            tags: Vec::new(),
            items: BTreeMap::new(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Replaces the cached tag list with the owner's tags, newest first.
    pub fn load(&mut self) -> Result<()> {
        let query = Query::new()
            .eq("ownerId", self.owner_id.as_str())
            .order_by("createdAt", Direction::Descending);
        self.tags = self.backend.query_as(Collection::Tags, &query)?;
        Ok(())
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn tag(&self, tag_id: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.id == tag_id)
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn tagged_items(&self) -> impl Iterator<Item = &TaggedItem> {
        self.items.values()
    }

    pub fn create_tag(&mut self, name: &str, color: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Tag name cannot be empty".into()));
        }
        if self.tag_by_name(name).is_some() {
            return Err(Error::InvalidInput(format!("A tag named '{name}' already exists")));
        }
        let color = normalize_color(color)?;

        let mut tag = Tag {
            id: String::new(),
            name: name.to_string(),
            color,
            owner_id: self.owner_id.clone(),
            created_at: now(),
        };
        tag.id = self.backend.insert(Collection::Tags, &tag)?;
        info!("Created tag {} ({})", tag.name, tag.id);

        self.tags.insert(0, tag.clone());
        Ok(tag)
    }

    pub fn update_tag(&mut self, tag_id: &str, name: Option<&str>, color: Option<&str>) -> Result<Tag> {
        let mut updated = self
            .tag(tag_id)
            .cloned()
            .ok_or_else(|| Error::not_found("tag", tag_id))?;

        if let Some(name) = name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::InvalidInput("Tag name cannot be empty".into()));
            }
            if self.tag_by_name(name).is_some_and(|t| t.id != tag_id) {
                return Err(Error::InvalidInput(format!("A tag named '{name}' already exists")));
            }
            updated.name = name.to_string();
        }
        if let Some(color) = color {
            updated.color = normalize_color(color)?;
        }

        self.backend.patch(
            Collection::Tags,
            tag_id,
            json!({ "name": updated.name, "color": updated.color }),
        )?;

        if let Some(slot) = self.tags.iter_mut().find(|t| t.id == tag_id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Detaches the tag from every item that carries it, tracked locally or
    /// not, then deletes the tag record. Every item is attempted; if any
    /// write fails the tag is kept so the delete can be retried, and the
    /// first failure is returned.
    pub fn delete_tag(&mut self, tag_id: &str) -> Result<()> {
        if self.tag(tag_id).is_none() {
            return Err(Error::not_found("tag", tag_id));
        }

        let mut affected = self.stored_items_with_tag(tag_id)?;
        for item in self.items.values() {
            if item.tag_ids.iter().any(|t| t == tag_id) {
                affected.insert(item.item_id.clone(), (item.item_type, item.tag_ids.clone()));
            }
        }

        let mut first_failure = None;
        for (item_id, (kind, tags)) in affected {
            let remaining: Vec<TagId> = tags.into_iter().filter(|t| t != tag_id).collect();
            match tag_field(kind).write(&self.backend, &self.owner_id, &item_id, &remaining) {
                Ok(()) => self.store_locally(&item_id, kind, remaining),
                Err(e) => {
                    warn!("Failed to detach tag {} from {} {}: {}", tag_id, kind, item_id, e);
                    first_failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_failure {
            warn!("Keeping tag {} until every item is detached", tag_id);
            return Err(e);
        }

        self.backend.remove(Collection::Tags, tag_id)?;
        self.tags.retain(|t| t.id != tag_id);
        info!("Deleted tag {}", tag_id);
        Ok(())
    }

    pub fn add_tag_to_item(&mut self, item_id: &str, item_type: ItemKind, tag_id: &str) -> Result<()> {
        if self.tag(tag_id).is_none() {
            return Err(Error::not_found("tag", tag_id));
        }

        if !self.items.contains_key(item_id) {
            let stored = tag_field(item_type).read(&self.backend, &self.owner_id, item_id)?;
            self.sync_item_tags(item_id, item_type, stored);
        }

        let previous = self.items.get(item_id).cloned();
        let (kind, mut tags) = match &previous {
            Some(entry) if entry.tag_ids.iter().any(|t| t == tag_id) => return Ok(()),
            Some(entry) => (entry.item_type, entry.tag_ids.clone()),
            None => (item_type, Vec::new()),
        };
        tags.push(tag_id.to_string());

        self.apply(item_id, kind, tags, previous)
    }

    pub fn remove_tag_from_item(&mut self, item_id: &str, tag_id: &str) -> Result<()> {
        let Some(previous) = self.items.get(item_id).cloned() else {
            return Ok(());
        };
        if !previous.tag_ids.iter().any(|t| t == tag_id) {
            return Ok(());
        }

        let tags: Vec<TagId> = previous
            .tag_ids
            .iter()
            .filter(|t| *t != tag_id)
            .cloned()
            .collect();
        self.apply(item_id, previous.item_type, tags, Some(previous))
    }

    /// Tags attached to the item, in registry order.
    pub fn get_item_tags(&self, item_id: &str) -> Vec<&Tag> {
        let Some(item) = self.items.get(item_id) else {
            return Vec::new();
        };
        self.tags
            .iter()
            .filter(|tag| item.tag_ids.contains(&tag.id))
            .collect()
    }

    /// Items carrying every one of `tag_ids`, optionally of one kind.
    /// No requested tags matches every tracked item.
    pub fn get_items_by_tags(&self, tag_ids: &[TagId], item_type: Option<ItemKind>) -> Vec<&TaggedItem> {
        self.items
            .values()
            .filter(|item| item_type.map_or(true, |kind| item.item_type == kind))
            .filter(|item| tag_ids.iter().all(|tag| item.tag_ids.contains(tag)))
            .collect()
    }

    /// Overwrites the local entry with an authoritative tag list.
    pub fn sync_item_tags(&mut self, item_id: &str, item_type: ItemKind, tag_ids: Vec<TagId>) {
        let mut unique: Vec<TagId> = Vec::with_capacity(tag_ids.len());
        for tag in tag_ids {
            if !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        self.store_locally(item_id, item_type, unique);
    }

    /// Drops the local entry of a deleted item.
    pub fn forget(&mut self, item_id: &str) {
        self.items.remove(item_id);
    }

    pub fn hydrate_galleries(&mut self, galleries: &[Gallery]) {
        for gallery in galleries {
            self.sync_item_tags(&gallery.id, ItemKind::Gallery, gallery.tag_ids.clone());
            for image in &gallery.images {
                self.sync_item_tags(&image.id, ItemKind::Image, image.tag_ids.clone());
            }
        }
    }

    pub fn hydrate_folders(&mut self, folders: &[Folder]) {
        for folder in folders {
            self.sync_item_tags(&folder.id, ItemKind::Folder, folder.tag_ids.clone());
        }
    }

    pub fn hydrate_documents(&mut self, documents: &[Document]) {
        for document in documents {
            self.sync_item_tags(&document.id, ItemKind::Document, document.tag_ids.clone());
        }
    }

    /// Optimistic write: local state changes first and is restored verbatim
    /// from `previous` if the backend rejects the update.
    fn apply(
        &mut self,
        item_id: &str,
        kind: ItemKind,
        tags: Vec<TagId>,
        previous: Option<TaggedItem>,
    ) -> Result<()> {
        self.store_locally(item_id, kind, tags.clone());

        if let Err(e) = tag_field(kind).write(&self.backend, &self.owner_id, item_id, &tags) {
            warn!("Rolling back tags of {} {}: {}", kind, item_id, e);
            match previous {
                Some(entry) => {
                    self.items.insert(item_id.to_string(), entry);
                }
                None => {
                    self.items.remove(item_id);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn store_locally(&mut self, item_id: &str, kind: ItemKind, tags: Vec<TagId>) {
        if tags.is_empty() {
            self.items.remove(item_id);
        } else {
            self.items.insert(
                item_id.to_string(),
                TaggedItem {
                    item_id: item_id.to_string(),
                    item_type: kind,
                    tag_ids: tags,
                },
            );
        }
    }

    /// Backend items of the owner that carry `tag_id`.
    fn stored_items_with_tag(&self, tag_id: &str) -> Result<BTreeMap<String, (ItemKind, Vec<TagId>)>> {
        let carries = |tags: &[TagId]| tags.iter().any(|t| t == tag_id);
        let mut found = BTreeMap::new();

        for gallery in GalleryService::new(self.backend.clone()).user_galleries(&self.owner_id, None)? {
            if carries(&gallery.tag_ids) {
                found.insert(gallery.id.clone(), (ItemKind::Gallery, gallery.tag_ids.clone()));
            }
            for image in gallery.images {
                if carries(&image.tag_ids) {
                    found.insert(image.id, (ItemKind::Image, image.tag_ids));
                }
            }
        }

        let folders = FolderService::new(self.backend.clone());
        for folder in folders.user_folders(&self.owner_id)? {
            if carries(&folder.tag_ids) {
                found.insert(folder.id, (ItemKind::Folder, folder.tag_ids));
            }
        }
        for document in folders.user_documents(&self.owner_id)? {
            if carries(&document.tag_ids) {
                found.insert(document.id, (ItemKind::Document, document.tag_ids));
            }
        }

        Ok(found)
    }
}

/// Accepts `#rrggbb` (case-insensitive, `#` optional) and returns it lowercased with `#`.
pub fn normalize_color(color: &str) -> Result<String> {
    let hex = color.trim().trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(format!("#{}", hex.to_ascii_lowercase()))
    } else {
        Err(Error::InvalidInput(format!(
            "'{color}' is not a color; use the #rrggbb form"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::testing::{fixture, PNG};

    fn ids(tags: &[&str]) -> Vec<TagId> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn created_tags_are_listed_newest_first() -> Result<()> {
        let fx = fixture();
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        registry.create_tag("ink", "#112233")?;
        let new = registry.create_tag("Charcoal", "AABBCC")?;
        assert_eq!(new.color, "#aabbcc");

        let mut fresh = TagRegistry::new(fx.backend.clone(), "u1");
        fresh.load()?;
        let mut names: Vec<&str> = fresh.tags().iter().map(|t| t.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Charcoal", "ink"]);
        assert_eq!(registry.tags()[0].id, new.id);

        assert!(registry.create_tag("INK", "#000000").is_err());
        assert!(registry.create_tag("paper", "blue").is_err());
        assert!(registry.create_tag("  ", "#000000").is_err());
        Ok(())
    }

    #[test]
    fn update_tag_renames_and_recolors() -> Result<()> {
        let fx = fixture();
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        let tag = registry.create_tag("ink", "#112233")?;
        registry.create_tag("paper", "#445566")?;

        let updated = registry.update_tag(&tag.id, Some("sumi"), Some("#000000"))?;
        assert_eq!(updated.name, "sumi");
        assert_eq!(registry.tag(&tag.id).map(|t| t.color.as_str()), Some("#000000"));
        assert!(registry.update_tag(&tag.id, Some("paper"), None).is_err());
        assert!(matches!(
            registry.update_tag("missing", None, None),
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn items_filter_with_and_semantics() {
        let fx = fixture();
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        registry.sync_item_tags("g1", ItemKind::Gallery, ids(&["a", "b"]));
        registry.sync_item_tags("g2", ItemKind::Gallery, ids(&["a"]));
        registry.sync_item_tags("d1", ItemKind::Document, ids(&["a", "b", "c"]));

        let both: Vec<&str> = registry
            .get_items_by_tags(&ids(&["a", "b"]), None)
            .iter()
            .map(|i| i.item_id.as_str())
            .collect();
        assert_eq!(both, vec!["d1", "g1"]);

        let galleries = registry.get_items_by_tags(&ids(&["a", "b"]), Some(ItemKind::Gallery));
        assert_eq!(galleries.len(), 1);
        assert_eq!(registry.get_items_by_tags(&[], Some(ItemKind::Gallery)).len(), 2);
    }

    #[test]
    fn sync_dedupes_and_empty_list_untracks() {
        let fx = fixture();
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        registry.sync_item_tags("f1", ItemKind::Folder, ids(&["a", "a", "b"]));
        assert_eq!(
            registry.get_items_by_tags(&[], None)[0].tag_ids,
            ids(&["a", "b"])
        );

        registry.sync_item_tags("f1", ItemKind::Folder, vec![]);
        assert_eq!(registry.tagged_items().count(), 0);
    }

    #[test]
    fn add_and_remove_persist_to_the_record() -> Result<()> {
        let fx = fixture();
        let folders = FolderService::new(fx.backend.clone());
        let folder = folders.create_folder("u1", "Refs", "", ids(&["pre"]))?;

        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        let tag = registry.create_tag("ink", "#112233")?;

        registry.add_tag_to_item(&folder.id, ItemKind::Folder, &tag.id)?;
        assert_eq!(folders.get_folder(&folder.id)?.tag_ids, vec!["pre".to_string(), tag.id.clone()]);

        // adding twice is a no-op
        registry.add_tag_to_item(&folder.id, ItemKind::Folder, &tag.id)?;
        assert_eq!(folders.get_folder(&folder.id)?.tag_ids.len(), 2);

        registry.remove_tag_from_item(&folder.id, &tag.id)?;
        assert_eq!(folders.get_folder(&folder.id)?.tag_ids, ids(&["pre"]));
        assert_eq!(registry.get_item_tags(&folder.id).len(), 0);

        assert!(matches!(
            registry.add_tag_to_item(&folder.id, ItemKind::Folder, "nope"),
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn failed_write_rolls_back_local_state() -> Result<()> {
        let fx = fixture();
        let folders = FolderService::new(fx.backend.clone());
        let folder = folders.create_folder("u1", "Refs", "", vec![])?;
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        let ink = registry.create_tag("ink", "#112233")?;
        let paper = registry.create_tag("paper", "#445566")?;
        registry.add_tag_to_item(&folder.id, ItemKind::Folder, &ink.id)?;

        fx.fail_writes(true);
        let err = registry.add_tag_to_item(&folder.id, ItemKind::Folder, &paper.id);
        assert!(matches!(err, Err(Error::PersistenceFailure { .. })));
        let tracked: Vec<&TaggedItem> = registry.tagged_items().collect();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].tag_ids, vec![ink.id.clone()]);

        assert!(registry.remove_tag_from_item(&folder.id, &ink.id).is_err());
        assert_eq!(registry.get_item_tags(&folder.id)[0].id, ink.id);
        fx.fail_writes(false);

        assert_eq!(folders.get_folder(&folder.id)?.tag_ids, vec![ink.id]);
        Ok(())
    }

    #[test]
    fn deleting_a_tag_detaches_it_everywhere() -> Result<()> {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());
        let folders = FolderService::new(fx.backend.clone());
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        let doomed = registry.create_tag("old", "#111111")?;
        let kept = registry.create_tag("new", "#222222")?;

        let gallery = galleries.create_gallery("u1", "G", "", Category::Art, vec![])?;
        let image = galleries.upload_image(&gallery.id, "a.png", &PNG, vec![])?;
        let doc = folders.upload_document("u1", "a.txt", b"hi", None, vec![])?;

        registry.add_tag_to_item(&gallery.id, ItemKind::Gallery, &doomed.id)?;
        registry.add_tag_to_item(&image.id, ItemKind::Image, &doomed.id)?;
        registry.add_tag_to_item(&image.id, ItemKind::Image, &kept.id)?;
        // tagged behind the registry's back; still found through the backend scan
        fx.backend.patch(
            Collection::Documents,
            &doc.id,
            json!({ "tagIds": [doomed.id.clone()] }),
        )?;

        registry.delete_tag(&doomed.id)?;

        assert!(registry.tag(&doomed.id).is_none());
        assert!(registry.get_item_tags(&gallery.id).is_empty());
        let image_tags: Vec<&str> = registry.get_item_tags(&image.id).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(image_tags, vec![kept.id.as_str()]);
        let stored = galleries.get_gallery(&gallery.id)?;
        assert!(stored.tag_ids.is_empty());
        assert_eq!(stored.images[0].tag_ids, vec![kept.id.clone()]);
        assert!(folders.get_document(&doc.id)?.tag_ids.is_empty());
        assert_eq!(registry.tagged_items().count(), 1);
        assert!(fx.backend.fetch::<Tag>(Collection::Tags, &doomed.id)?.is_none());
        Ok(())
    }

    #[test]
    fn failed_detach_keeps_the_tag_for_retry() -> Result<()> {
        let fx = fixture();
        let folders = FolderService::new(fx.backend.clone());
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        let doomed = registry.create_tag("old", "#111111")?;

        let folder = folders.create_folder("u1", "Refs", "", vec![])?;
        let doc = folders.upload_document("u1", "a.txt", b"hi", None, vec![])?;
        registry.add_tag_to_item(&folder.id, ItemKind::Folder, &doomed.id)?;
        registry.add_tag_to_item(&doc.id, ItemKind::Document, &doomed.id)?;

        fx.fail_writes_to(Some(Collection::Documents));
        let err = registry.delete_tag(&doomed.id);
        assert!(matches!(err, Err(Error::PersistenceFailure { .. })));

        assert!(registry.tag(&doomed.id).is_some());
        assert!(fx.backend.fetch::<Tag>(Collection::Tags, &doomed.id)?.is_some());
        assert_eq!(folders.get_document(&doc.id)?.tag_ids, vec![doomed.id.clone()]);
        assert_eq!(registry.get_item_tags(&doc.id)[0].id, doomed.id);
        // items that could be written are already detached
        assert!(folders.get_folder(&folder.id)?.tag_ids.is_empty());
        assert!(registry.get_item_tags(&folder.id).is_empty());

        fx.fail_writes_to(None);
        registry.delete_tag(&doomed.id)?;
        assert!(folders.get_document(&doc.id)?.tag_ids.is_empty());
        assert!(registry.tag(&doomed.id).is_none());
        assert!(fx.backend.fetch::<Tag>(Collection::Tags, &doomed.id)?.is_none());
        assert_eq!(registry.tagged_items().count(), 0);
        Ok(())
    }

    #[test]
    fn synced_tags_come_back_from_get_item_tags() -> Result<()> {
        let fx = fixture();
        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        let ink = registry.create_tag("ink", "#112233")?;
        let paper = registry.create_tag("paper", "#445566")?;
        registry.create_tag("unused", "#778899")?;

        registry.sync_item_tags("g1", ItemKind::Gallery, vec![ink.id.clone(), paper.id.clone()]);

        let mut found: Vec<&str> = registry.get_item_tags("g1").iter().map(|t| t.id.as_str()).collect();
        found.sort();
        let mut expected = vec![ink.id.as_str(), paper.id.as_str()];
        expected.sort();
        assert_eq!(found, expected);
        Ok(())
    }

    #[test]
    fn failed_image_write_rolls_back_local_state() -> Result<()> {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());
        let gallery = galleries.create_gallery("u1", "G", "", Category::Art, vec![])?;
        let image = galleries.upload_image(&gallery.id, "a.png", &PNG, vec![])?;

        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        let ink = registry.create_tag("ink", "#112233")?;
        let paper = registry.create_tag("paper", "#445566")?;
        registry.add_tag_to_item(&image.id, ItemKind::Image, &ink.id)?;

        fx.fail_writes(true);
        let err = registry.add_tag_to_item(&image.id, ItemKind::Image, &paper.id);
        assert!(matches!(err, Err(Error::PersistenceFailure { .. })));
        let tracked: Vec<&TaggedItem> = registry.tagged_items().collect();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].item_type, ItemKind::Image);
        assert_eq!(tracked[0].tag_ids, vec![ink.id.clone()]);
        fx.fail_writes(false);

        let stored = galleries.get_gallery(&gallery.id)?;
        assert_eq!(stored.images[0].tag_ids, vec![ink.id]);
        assert!(stored.tag_ids.is_empty());
        Ok(())
    }

    #[test]
    fn hydration_tracks_images_inside_galleries() -> Result<()> {
        let fx = fixture();
        let galleries = GalleryService::new(fx.backend.clone());
        let gallery = galleries.create_gallery("u1", "G", "", Category::References, ids(&["t"]))?;
        let image = galleries.upload_image(&gallery.id, "a.png", &PNG, ids(&["t", "u"]))?;

        let mut registry = TagRegistry::new(fx.backend.clone(), "u1");
        registry.hydrate_galleries(&[galleries.get_gallery(&gallery.id)?]);
        assert_eq!(registry.get_items_by_tags(&ids(&["u"]), None)[0].item_id, image.id);
        assert_eq!(registry.get_items_by_tags(&ids(&["t"]), None).len(), 2);
        Ok(())
    }
}
