//! Slot allocation for personal pins (at most three per scope) and showcase
//! pins (unbounded).
//!
//! Both read the current holders of a scope, then write the lowest free slot.
//! The read and the write are separate backend calls, so two sessions pinning
//! in the same scope at the same moment can be handed the same slot.

mod slots;

pub use slots::lowest_free_slot;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::database::{Backend, Collection, Query};
use crate::error::{Error, Result};
use crate::model::{Category, PinState};

pub const PIN_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinTarget {
    Gallery,
    Folder,
}

impl PinTarget {
    pub fn collection(self) -> Collection {
        match self {
            PinTarget::Gallery => Collection::Galleries,
            PinTarget::Folder => Collection::Folders,
        }
    }

    fn plural(self) -> &'static str {
        match self {
            PinTarget::Gallery => "galleries",
            PinTarget::Folder => "folders",
        }
    }
}

/// The (owner, category) pair slot uniqueness is enforced in. Folders have
/// no category, so their scope is the owner alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub owner_id: String,
    pub category: Option<Category>,
}

impl Scope {
    pub fn gallery(owner_id: &str, category: Category) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            category: Some(category),
        }
    }

    pub fn folder(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            category: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slots {
    Personal,
    Showcase,
}

impl Slots {
    fn flag(self) -> &'static str {
        match self {
            Slots::Personal => "pinned",
            Slots::Showcase => "showcasePinned",
        }
    }

    fn order_field(self) -> &'static str {
        match self {
            Slots::Personal => "pinnedOrder",
            Slots::Showcase => "showcasePinnedOrder",
        }
    }

    fn cap(self) -> Option<usize> {
        match self {
            Slots::Personal => Some(PIN_LIMIT),
            Slots::Showcase => None,
        }
    }

    fn order(self, pins: &PinState) -> Option<u32> {
        match self {
            Slots::Personal => pins.pinned_order,
            Slots::Showcase => pins.showcase_pinned_order,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinRecord {
    id: String,
    owner_id: String,
    #[serde(default)]
    category: Option<Category>,
    #[serde(flatten)]
    pins: PinState,
}

pub struct PinAllocator {
    backend: Backend,
}

impl PinAllocator {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Pins the item into the lowest free slot of {0, 1, 2}. Re-pinning
    /// returns the slot the item already holds.
    pub fn pin(&self, target: PinTarget, item_id: &str, scope: &Scope) -> Result<u32> {
        self.claim(Slots::Personal, target, item_id, scope)
    }

    /// Clears the pin. Other items keep their slots.
    pub fn unpin(&self, target: PinTarget, item_id: &str) -> Result<()> {
        self.release(Slots::Personal, target, item_id)
    }

    pub fn showcase_pin(&self, target: PinTarget, item_id: &str, scope: &Scope) -> Result<u32> {
        self.claim(Slots::Showcase, target, item_id, scope)
    }

    pub fn showcase_unpin(&self, target: PinTarget, item_id: &str) -> Result<()> {
        self.release(Slots::Showcase, target, item_id)
    }

    fn claim(&self, slots: Slots, target: PinTarget, item_id: &str, scope: &Scope) -> Result<u32> {
        let collection = target.collection();
        let item: PinRecord = self.backend.fetch_required(collection, item_id)?;
        if item.owner_id != scope.owner_id {
            return Err(Error::not_found(collection.noun(), item_id));
        }
        if target == PinTarget::Gallery && item.category != scope.category {
            return Err(Error::InvalidInput(format!(
                "{} {} is not in the {} category",
                collection.noun(),
                item_id,
                scope.category.map(|c| c.as_str()).unwrap_or("requested")
            )));
        }

        let mut query = Query::new()
            .eq("ownerId", scope.owner_id.as_str())
            .eq(slots.flag(), true);
        if let Some(category) = scope.category {
            query = query.eq("category", category.as_str());
        }
        let holders: Vec<PinRecord> = self.backend.query_as(collection, &query)?;

        if let Some(order) = holders
            .iter()
            .find(|r| r.id == item_id)
            .and_then(|r| slots.order(&r.pins))
        {
            debug!("{} {} already holds {:?} slot {}", collection.noun(), item_id, slots, order);
            return Ok(order);
        }

        let others: Vec<&PinRecord> = holders.iter().filter(|r| r.id != item_id).collect();
        let limit_exceeded = |limit: usize| Error::LimitExceeded {
            limit,
            noun: target.plural(),
        };
        if let Some(cap) = slots.cap() {
            if others.len() >= cap {
                return Err(limit_exceeded(cap));
            }
        }

        let slot = lowest_free_slot(
            others.iter().filter_map(|r| slots.order(&r.pins)),
            slots.cap().map(|c| c as u32),
        )
        .ok_or_else(|| limit_exceeded(slots.cap().unwrap_or(PIN_LIMIT)))?;

        let flag = slots.flag();
        let order_field = slots.order_field();
        self.backend
            .patch(collection, item_id, json!({ flag: true, order_field: slot }))?;

        info!("{:?}-pinned {} {} into slot {}", slots, collection.noun(), item_id, slot);
        Ok(slot)
    }

    fn release(&self, slots: Slots, target: PinTarget, item_id: &str) -> Result<()> {
        let flag = slots.flag();
        let order_field = slots.order_field();
        self.backend.patch(
            target.collection(),
            item_id,
            json!({ flag: false, order_field: null }),
        )?;
        info!("{:?}-unpinned {} {}", slots, target.collection().noun(), item_id);
        Ok(())
    }
}
