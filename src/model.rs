//! Records as they are stored in the backend collections.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TagId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    References,
    Art,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::References => "references",
            Category::Art => "art",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "references" | "reference" | "refs" => Ok(Category::References),
            "art" => Ok(Category::Art),
            other => Err(format!("unknown category '{other}' (expected references or art)")),
        }
    }
}

/// The four kinds of content a tag can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Image,
    Document,
    Gallery,
    Folder,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Image => "image",
            ItemKind::Document => "document",
            ItemKind::Gallery => "gallery",
            ItemKind::Folder => "folder",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(ItemKind::Image),
            "document" | "doc" => Ok(ItemKind::Document),
            "gallery" => Ok(ItemKind::Gallery),
            "folder" => Ok(ItemKind::Folder),
            other => Err(format!("unknown item type '{other}'")),
        }
    }
}

/// Things that can be showcased and therefore bookmarked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkKind {
    Gallery,
    Folder,
}

impl fmt::Display for BookmarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            BookmarkKind::Gallery => "gallery",
            BookmarkKind::Folder => "folder",
        })
    }
}

impl FromStr for BookmarkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gallery" => Ok(BookmarkKind::Gallery),
            "folder" => Ok(BookmarkKind::Folder),
            other => Err(format!("unknown bookmark type '{other}' (expected gallery or folder)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(default)]
    pub id: TagId,
    pub name: String,
    pub color: String,
    pub owner_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Personal and public pin state shared by galleries and folders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinState {
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub pinned_order: Option<u32>,
    #[serde(default)]
    pub showcase_pinned: bool,
    #[serde(default)]
    pub showcase_pinned_order: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub name: String,
    pub url: String,
    pub storage_path: String,
    pub size: u64,
    pub content_type: String,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gallery {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: String,
    pub category: Category,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(flatten)]
    pub pins: PinState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: String,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(flatten)]
    pub pins: PinState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    pub storage_path: String,
    pub size: u64,
    pub content_type: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    #[serde(default)]
    pub id: String,
    /// The user who bookmarked the item.
    pub owner_user_id: String,
    pub item_id: String,
    pub item_type: BookmarkKind,
    /// Owner of the bookmarked item.
    pub source_owner_user_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub screen_name: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Current time truncated to the millisecond precision records are stored with.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
