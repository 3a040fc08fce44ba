use std::cell::Cell;
use std::path::Path;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;

use crate::database::schema::SCHEMA;
use crate::database::store::{record_id, with_id, Collection, DocumentStore, Query, StoreError};

/// `DocumentStore` over a single SQLite file. Records are stored as JSON text
/// keyed by (collection, id); `seq` preserves insertion order.
pub struct SqliteStore {
    conn: Connection,
    counter: Cell<u64>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        debug!("Opened record store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            counter: Cell::new(0),
        })
    }

    fn read(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

/// Filters SQLite can evaluate through `json_extract`. Anything else is left
/// to `Query::apply`.
fn pushdown_param(field: &str, value: &Value) -> Option<SqlValue> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    match value {
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        _ => None,
    }
}

impl DocumentStore for SqliteStore {
    fn generate_id(&self) -> String {
        let n = self.counter.get().wrapping_add(1);
        self.counter.set(n);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        record_id(&format!("{nanos}:{n}:{}", std::process::id()))
    }

    fn set(&self, collection: Collection, id: &str, data: Value) -> Result<(), StoreError> {
        let record = with_id(data, id)?;
        self.conn.execute(
            "INSERT INTO records (collection, id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data",
            params![collection.as_str(), id, record.to_string()],
        )?;
        Ok(())
    }

    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        self.read(collection, id)
    }

    fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        let mut record = self.read(collection, id)?.ok_or_else(|| StoreError::Missing {
            collection,
            id: id.to_string(),
        })?;

        if let Value::Object(map) = &mut record {
            for (key, value) in patch {
                // the id is owned by the store
                if key != "id" {
                    map.insert(key, value);
                }
            }
        }

        tx.execute(
            "UPDATE records SET data = ?3 WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id, record.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
        )?;
        Ok(())
    }

    fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, StoreError> {
        let mut sql = String::from("SELECT data FROM records WHERE collection = ?1");
        let mut bound = vec![SqlValue::Text(collection.as_str().to_string())];

        for (field, value) in &query.filters {
            if let Some(param) = pushdown_param(field, value) {
                bound.push(param);
                sql.push_str(&format!(
                    " AND json_extract(data, '$.{}') = ?{}",
                    field,
                    bound.len()
                ));
            }
        }
        sql.push_str(" ORDER BY seq");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }

        Ok(query.apply(records))
    }
}
