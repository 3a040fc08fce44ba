use std::cmp::Ordering;

use crate::database::{Backend, Collection, Query};
use crate::error::Result;
use crate::model::{Category, Folder, Gallery, PinState};

/// Read side of the public showcase, across all owners.
pub struct ShowcaseService {
    backend: Backend,
}

impl ShowcaseService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn showcase_galleries(&self, category: Category) -> Result<Vec<Gallery>> {
        let query = Query::new()
            .eq("category", category.as_str())
            .eq("showcasePinned", true);
        let mut galleries: Vec<Gallery> = self.backend.query_as(Collection::Galleries, &query)?;
        galleries.sort_by(|a, b| showcase_cmp(&a.pins, &b.pins).then(b.updated_at.cmp(&a.updated_at)));
        Ok(galleries)
    }

    pub fn showcase_folders(&self) -> Result<Vec<Folder>> {
        let query = Query::new().eq("showcasePinned", true);
        let mut folders: Vec<Folder> = self.backend.query_as(Collection::Folders, &query)?;
        folders.sort_by(|a, b| showcase_cmp(&a.pins, &b.pins).then(b.updated_at.cmp(&a.updated_at)));
        Ok(folders)
    }
}

fn showcase_cmp(a: &PinState, b: &PinState) -> Ordering {
    let key = |p: &PinState| p.showcase_pinned_order.unwrap_or(u32::MAX);
    key(a).cmp(&key(b))
}

pub trait Searchable {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
}

impl Searchable for Gallery {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl Searchable for Folder {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Case-insensitive substring match on name or description. A blank term keeps everything.
pub fn search_showcase<T: Searchable>(items: Vec<T>, term: &str) -> Vec<T> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| {
            item.name().to_lowercase().contains(&term)
                || item.description().to_lowercase().contains(&term)
        })
        .collect()
}
