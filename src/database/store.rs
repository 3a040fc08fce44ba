use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("blob storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{collection}/{id} does not exist")]
    Missing { collection: Collection, id: String },

    #[error("records must be JSON objects, got {0}")]
    NotAnObject(String),

    #[error("invalid blob path '{0}'")]
    InvalidPath(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Flat record collections kept by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Galleries,
    Folders,
    Documents,
    Tags,
    Bookmarks,
    Users,
    Accounts,
    Sessions,
    PasswordResets,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Galleries => "galleries",
            Collection::Folders => "folders",
            Collection::Documents => "documents",
            Collection::Tags => "tags",
            Collection::Bookmarks => "bookmarks",
            Collection::Users => "users",
            Collection::Accounts => "accounts",
            Collection::Sessions => "sessions",
            Collection::PasswordResets => "password_resets",
        }
    }

    /// Singular noun for messages ("gallery", "tag", ...).
    pub fn noun(self) -> &'static str {
        match self {
            Collection::Galleries => "gallery",
            Collection::Folders => "folder",
            Collection::Documents => "document",
            Collection::Tags => "tag",
            Collection::Bookmarks => "bookmark",
            Collection::Users => "user profile",
            Collection::Accounts => "account",
            Collection::Sessions => "session",
            Collection::PasswordResets => "password reset",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality filters, one optional ordering field and an optional limit.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// A record lacking a filtered field never matches.
    pub fn matches(&self, record: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }

    /// Filters, sorts and truncates records given in insertion order.
    pub fn apply(&self, records: Vec<Value>) -> Vec<Value> {
        let mut matched: Vec<Value> = records.into_iter().filter(|r| self.matches(r)).collect();

        if let Some((field, direction)) = &self.order {
            // sort_by is stable, so ties keep insertion order
            matched.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                );
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Document-oriented record storage. Every record is a JSON object carrying
/// its own id under `"id"`.
pub trait DocumentStore {
    fn generate_id(&self) -> String;

    /// Creates or replaces the record.
    fn set(&self, collection: Collection, id: &str, data: Value) -> Result<(), StoreError>;

    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    /// Shallow merge of top-level fields into an existing record.
    fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError>;

    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, StoreError>;

    fn create(&self, collection: Collection, data: Value) -> Result<String, StoreError> {
        let id = self.generate_id();
        self.set(collection, &id, data)?;
        Ok(id)
    }
}

/// Stamps `id` into an object record.
pub fn with_id(data: Value, id: &str) -> Result<Value, StoreError> {
    match data {
        Value::Object(mut map) => {
            map.insert("id".to_string(), Value::String(id.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(StoreError::NotAnObject(other.to_string())),
    }
}

/// 20 hex chars derived from a seed, the length of the ids handed out by the hosted backend.
pub fn record_id(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(20);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records() -> Vec<Value> {
        vec![
            json!({"id": "a", "ownerId": "u1", "pinned": true, "order": 2}),
            json!({"id": "b", "ownerId": "u2", "pinned": true, "order": 0}),
            json!({"id": "c", "ownerId": "u1", "pinned": false, "order": 1}),
            json!({"id": "d", "ownerId": "u1", "order": 0}),
        ]
    }

    fn ids(values: &[Value]) -> Vec<&str> {
        values.iter().map(|v| v["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn filters_are_conjunctive() {
        let q = Query::new().eq("ownerId", "u1").eq("pinned", true);
        assert_eq!(ids(&q.apply(records())), vec!["a"]);
    }

    #[test]
    fn missing_field_never_matches() {
        let q = Query::new().eq("pinned", false);
        assert_eq!(ids(&q.apply(records())), vec!["c"]);
    }

    #[test]
    fn ordering_is_stable_and_limited() {
        let q = Query::new()
            .order_by("order", Direction::Ascending)
            .limit(3);
        assert_eq!(ids(&q.apply(records())), vec!["b", "d", "c"]);

        let q = Query::new().order_by("order", Direction::Descending);
        assert_eq!(ids(&q.apply(records())), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn record_ids_are_short_and_distinct() {
        let a = record_id("seed-1");
        let b = record_id("seed-2");
        assert_eq!(a.len(), 20);
        assert_ne!(a, b);
    }

    #[test]
    fn with_id_rejects_non_objects() {
        assert!(with_id(json!([1, 2]), "x").is_err());
        assert_eq!(with_id(json!({"n": 1}), "x").unwrap()["id"], "x");
    }
}
