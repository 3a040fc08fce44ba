use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::model::{Document, Folder, Gallery, PinState, TagId};

/// Anything that sits on a dashboard with personal pins.
pub trait Pinnable {
    fn pins(&self) -> &PinState;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Pinnable for Gallery {
    fn pins(&self) -> &PinState {
        &self.pins
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Pinnable for Folder {
    fn pins(&self) -> &PinState {
        &self.pins
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Pinned items first by slot, then the rest newest first.
pub fn dashboard_order<T: Pinnable>(items: &mut [T]) {
    items.sort_by(|a, b| match (a.pins().pinned, b.pins().pinned) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a
            .pins()
            .pinned_order
            .unwrap_or(0)
            .cmp(&b.pins().pinned_order.unwrap_or(0)),
        (false, false) => b.created_at().cmp(&a.created_at()),
    });
}

pub fn has_all_tags(tags: &[TagId], selected: &[TagId]) -> bool {
    selected.iter().all(|tag| tags.contains(tag))
}

/// Galleries where the gallery itself, or one of its images, carries every selected tag.
pub fn galleries_with_tags<'a>(galleries: &'a [Gallery], selected: &[TagId]) -> Vec<&'a Gallery> {
    galleries
        .iter()
        .filter(|gallery| {
            has_all_tags(&gallery.tag_ids, selected)
                || gallery
                    .images
                    .iter()
                    .any(|image| has_all_tags(&image.tag_ids, selected))
        })
        .collect()
}

/// Folders where the folder itself, or one of its documents, carries every selected tag.
pub fn folders_with_tags<'a>(
    folders: &'a [Folder],
    documents: &[Document],
    selected: &[TagId],
) -> Vec<&'a Folder> {
    folders
        .iter()
        .filter(|folder| {
            has_all_tags(&folder.tag_ids, selected)
                || documents.iter().any(|doc| {
                    doc.folder_id.as_deref() == Some(folder.id.as_str())
                        && has_all_tags(&doc.tag_ids, selected)
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn gallery(id: &str, pinned: Option<u32>, created: i64, tags: &[&str]) -> Gallery {
        let at = DateTime::from_timestamp_millis(created).unwrap();
        Gallery {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            owner_id: "u1".into(),
            category: Category::Art,
            images: vec![],
            tag_ids: tags.iter().map(|t| t.to_string()).collect(),
            pins: PinState {
                pinned: pinned.is_some(),
                pinned_order: pinned,
                ..PinState::default()
            },
            created_at: at,
            updated_at: at,
        }
    }

    fn tags(ids: &[&str]) -> Vec<TagId> {
        ids.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn pinned_first_then_newest() {
        let mut items = vec![
            gallery("old", None, 1, &[]),
            gallery("slot2", Some(2), 5, &[]),
            gallery("new", None, 9, &[]),
            gallery("slot0", Some(0), 3, &[]),
        ];
        dashboard_order(&mut items);
        let ids: Vec<&str> = items.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["slot0", "slot2", "new", "old"]);
    }

    #[test]
    fn tag_filters_require_every_tag() {
        let galleries = vec![
            gallery("both", None, 1, &["work", "urgent"]),
            gallery("one", None, 1, &["work"]),
        ];
        let found = galleries_with_tags(&galleries, &tags(&["work", "urgent"]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "both");

        assert_eq!(galleries_with_tags(&galleries, &[]).len(), 2);
    }
}
