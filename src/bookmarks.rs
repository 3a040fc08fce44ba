//! Bookmarks on other users' showcased galleries and folders.

use tracing::{info, warn};

use crate::database::{Backend, Collection, Direction, Query};
use crate::error::{Error, Result};
use crate::model::{now, Bookmark, BookmarkKind, Folder, Gallery};

/// A bookmark resolved to the item it points at.
#[derive(Debug, Clone)]
pub enum BookmarkedItem {
    Gallery(Bookmark, Gallery),
    Folder(Bookmark, Folder),
}

impl BookmarkedItem {
    pub fn bookmark(&self) -> &Bookmark {
        match self {
            BookmarkedItem::Gallery(b, _) | BookmarkedItem::Folder(b, _) => b,
        }
    }
}

pub struct BookmarkService {
    backend: Backend,
}

impl BookmarkService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Bookmarks a showcased item. Bookmarking the same item twice returns
    /// the existing bookmark, as long as the item is still showcased.
    pub fn create_bookmark(
        &self,
        bookmarker_id: &str,
        item_id: &str,
        item_type: BookmarkKind,
        source_owner_id: &str,
    ) -> Result<Bookmark> {
        match self.showcased(item_type, item_id)? {
            Some(true) => {}
            Some(false) => {
                return Err(Error::InvalidInput(format!(
                    "That {item_type} is not in the showcase and cannot be bookmarked"
                )))
            }
            None => return Err(Error::not_found(noun(item_type), item_id)),
        }

        if let Some(existing) = self.matching(bookmarker_id, item_id)?.into_iter().next() {
            return Ok(existing);
        }

        let mut bookmark = Bookmark {
            id: String::new(),
            owner_user_id: bookmarker_id.to_string(),
            item_id: item_id.to_string(),
            item_type,
            source_owner_user_id: source_owner_id.to_string(),
            created_at: now(),
        };
        bookmark.id = self.backend.insert(Collection::Bookmarks, &bookmark)?;
        info!("{} bookmarked {} {}", bookmarker_id, item_type, item_id);
        Ok(bookmark)
    }

    /// Removes every bookmark the user holds on the item.
    pub fn delete_bookmark(&self, bookmarker_id: &str, item_id: &str) -> Result<usize> {
        let matching = self.matching(bookmarker_id, item_id)?;
        for bookmark in &matching {
            self.backend.remove(Collection::Bookmarks, &bookmark.id)?;
        }
        Ok(matching.len())
    }

    pub fn is_bookmarked(&self, bookmarker_id: &str, item_id: &str) -> Result<bool> {
        Ok(!self.matching(bookmarker_id, item_id)?.is_empty())
    }

    /// The user's live bookmarks, newest first. Bookmarks whose target is gone
    /// or no longer showcased are deleted on the way.
    pub fn get_user_bookmarks(&self, bookmarker_id: &str) -> Result<Vec<Bookmark>> {
        Ok(self
            .bookmarked_items(bookmarker_id)?
            .into_iter()
            .map(|item| item.bookmark().clone())
            .collect())
    }

    pub fn bookmarked_items(&self, bookmarker_id: &str) -> Result<Vec<BookmarkedItem>> {
        let query = Query::new()
            .eq("ownerUserId", bookmarker_id)
            .order_by("createdAt", Direction::Descending);
        let bookmarks: Vec<Bookmark> = self.backend.query_as(Collection::Bookmarks, &query)?;

        let mut live = Vec::with_capacity(bookmarks.len());
        for bookmark in bookmarks {
            match self.resolve(&bookmark)? {
                Some(item) => live.push(item),
                None => self.prune(&bookmark),
            }
        }
        Ok(live)
    }

    fn resolve(&self, bookmark: &Bookmark) -> Result<Option<BookmarkedItem>> {
        let item = match bookmark.item_type {
            BookmarkKind::Gallery => self
                .backend
                .fetch::<Gallery>(Collection::Galleries, &bookmark.item_id)?
                .filter(|g| g.pins.showcase_pinned)
                .map(|g| BookmarkedItem::Gallery(bookmark.clone(), g)),
            BookmarkKind::Folder => self
                .backend
                .fetch::<Folder>(Collection::Folders, &bookmark.item_id)?
                .filter(|f| f.pins.showcase_pinned)
                .map(|f| BookmarkedItem::Folder(bookmark.clone(), f)),
        };
        Ok(item)
    }

    fn prune(&self, bookmark: &Bookmark) {
        info!(
            "Removing stale bookmark {} on {} {}",
            bookmark.id, bookmark.item_type, bookmark.item_id
        );
        if let Err(e) = self.backend.remove(Collection::Bookmarks, &bookmark.id) {
            warn!("Failed to remove stale bookmark {}: {}", bookmark.id, e);
        }
    }

    fn matching(&self, bookmarker_id: &str, item_id: &str) -> Result<Vec<Bookmark>> {
        let query = Query::new()
            .eq("ownerUserId", bookmarker_id)
            .eq("itemId", item_id);
        self.backend.query_as(Collection::Bookmarks, &query)
    }

    /// Showcase flag of the target, or `None` when it does not exist.
    fn showcased(&self, kind: BookmarkKind, item_id: &str) -> Result<Option<bool>> {
        let flag = match kind {
            BookmarkKind::Gallery => self
                .backend
                .fetch::<Gallery>(Collection::Galleries, item_id)?
                .map(|g| g.pins.showcase_pinned),
            BookmarkKind::Folder => self
                .backend
                .fetch::<Folder>(Collection::Folders, item_id)?
                .map(|f| f.pins.showcase_pinned),
        };
        Ok(flag)
    }
}

fn noun(kind: BookmarkKind) -> &'static str {
    match kind {
        BookmarkKind::Gallery => "gallery",
        BookmarkKind::Folder => "folder",
    }
}
