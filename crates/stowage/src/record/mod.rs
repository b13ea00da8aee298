//! Structured-record tier.
//!
//! A [`RecordStore`] keeps [`Record`]s (typed attribute bags identified by
//! entity name and sanitized key) inside a [`RecordBoundary`]. Value types
//! map to and from records through [`RecordMapped`].

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{StowageError, StowageResult};
use crate::sanitize::sanitize;

mod sqlite;

pub use sqlite::SqliteRecordStore;

/// Persisted entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Tier-assigned identity; `None` until first stored.
    pub id: Option<i64>,
    pub entity: String,
    pub key: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(entity: &str, key: &str) -> Self {
        Self {
            id: None,
            entity: entity.to_string(),
            key: sanitize(key),
            fields: Map::new(),
        }
    }

    /// Typed attribute; missing or mistyped attributes are `InvalidData`.
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> StowageResult<T> {
        let value = self
            .fields
            .get(name)
            .ok_or_else(|| StowageError::InvalidData {
                message: format!("{} '{}' has no field '{name}'", self.entity, self.key),
            })?;
        serde_json::from_value(value.clone()).map_err(|e| StowageError::InvalidData {
            message: format!("{} '{}' field '{name}': {e}", self.entity, self.key),
        })
    }

    pub fn set_field<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> StowageResult<()> {
        let value = serde_json::to_value(value).map_err(|e| StowageError::InvalidData {
            message: format!("field '{name}': {e}"),
        })?;
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Encoded size of the attributes, used as the record's byte cost.
    pub fn approximate_size(&self) -> u64 {
        serde_json::to_vec(&self.fields).map_or(0, |bytes| bytes.len() as u64)
    }
}

/// Container (store) and context name scoping a set of records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordBoundary {
    container: String,
    context: String,
}

impl RecordBoundary {
    pub fn new(container: &str, context: &str) -> Self {
        Self {
            container: container.to_string(),
            context: sanitize(context),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for RecordBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.context)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPredicate {
    All,
    KeyEquals(String),
    IdEquals(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordSort {
    #[default]
    Unsorted,
    KeyAscending,
    KeyDescending,
    IdAscending,
    IdDescending,
}

/// Transactional object store backing the record tier.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn fetch_one(
        &self,
        boundary: &RecordBoundary,
        entity: &str,
        predicate: &RecordPredicate,
    ) -> StowageResult<Option<Record>>;

    async fn fetch_all(
        &self,
        boundary: &RecordBoundary,
        entity: &str,
        predicate: &RecordPredicate,
        sort: RecordSort,
    ) -> StowageResult<Vec<Record>>;

    /// Store `record`, replacing any record of the same entity and key.
    /// Returns the stored record with its identity filled in.
    async fn insert_or_replace(&self, boundary: &RecordBoundary, record: Record)
        -> StowageResult<Record>;

    async fn delete(&self, boundary: &RecordBoundary, record: &Record) -> StowageResult<()>;

    /// Delete every record of `entity`; returns how many were removed.
    async fn batch_delete(&self, boundary: &RecordBoundary, entity: &str) -> StowageResult<u64>;
}

/// Encodable-to-entity and decodable-from-entity capability.
pub trait RecordMapped: Sized + Send + Sync + 'static {
    /// Entity name records of this type are stored under.
    const ENTITY: &'static str;

    /// Fails when the record is malformed.
    fn from_record(record: &Record) -> StowageResult<Self>;

    fn apply_to_record(&self, record: &mut Record) -> StowageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields() {
        let mut record = Record::new("Note", "Shopping List");
        assert_eq!(record.key, "shopping_list");

        record.set_field("title", "Groceries").unwrap();
        record.set_field("count", &3u32).unwrap();

        assert_eq!(record.field::<String>("title").unwrap(), "Groceries");
        assert_eq!(record.field::<u32>("count").unwrap(), 3);
        assert!(matches!(
            record.field::<u32>("title"),
            Err(StowageError::InvalidData { .. })
        ));
        assert!(record.field::<String>("missing").is_err());
        assert!(record.approximate_size() > 0);
    }

    #[test]
    fn test_boundary_sanitizes_context() {
        let boundary = RecordBoundary::new("Notes", "Main Context");
        assert_eq!(boundary.container(), "Notes");
        assert_eq!(boundary.context(), "main_context");
        assert_eq!(boundary.to_string(), "Notes/main_context");
    }
}
