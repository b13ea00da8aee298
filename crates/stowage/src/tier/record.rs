use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ByteCeiling;
use crate::diagnostics::TierKind;
use crate::error::{StowageError, StowageResult};
use crate::record::{Record, RecordBoundary, RecordMapped, RecordPredicate, RecordSort, RecordStore};
use crate::sanitize::sanitize;

use super::{Boundary, DurableTier, Stored, TierInfo, TierUsage};

/// Durable tier over a [`RecordStore`], scoped to one boundary.
#[derive(Debug)]
pub struct RecordTier<S> {
    store: Arc<S>,
    boundary: RecordBoundary,
}

impl<S> Clone for RecordTier<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            boundary: self.boundary.clone(),
        }
    }
}

impl<S: RecordStore> RecordTier<S> {
    pub fn new(store: Arc<S>, boundary: RecordBoundary) -> Self {
        Self { store, boundary }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn record_boundary(&self) -> &RecordBoundary {
        &self.boundary
    }

    async fn find<T: RecordMapped>(&self, key: &str) -> StowageResult<Option<Record>> {
        self.store
            .fetch_one(
                &self.boundary,
                T::ENTITY,
                &RecordPredicate::KeyEquals(sanitize(key)),
            )
            .await
    }

    fn not_found(&self, key: &str) -> StowageError {
        StowageError::NotFound {
            boundary: self.boundary.to_string(),
            key: key.to_string(),
        }
    }

    /// Every stored value of `T`, ordered by key. Records that fail to map
    /// are `InvalidData`.
    pub async fn read_all<T: RecordMapped>(&self) -> StowageResult<Vec<T>> {
        let records = self
            .store
            .fetch_all(
                &self.boundary,
                T::ENTITY,
                &RecordPredicate::All,
                RecordSort::KeyAscending,
            )
            .await?;
        records.iter().map(T::from_record).collect()
    }
}

#[async_trait]
impl<S: RecordStore> TierInfo for RecordTier<S> {
    fn kind(&self) -> TierKind {
        TierKind::Record
    }

    fn boundary(&self) -> Boundary {
        Boundary {
            domain: self.boundary.container().to_string(),
            domain_ceiling: ByteCeiling::UNBOUNDED,
            sub_domain: self.boundary.context().to_string(),
            ceiling: ByteCeiling::UNBOUNDED,
        }
    }

    async fn usage(&self) -> TierUsage {
        TierUsage {
            boundary: TierInfo::boundary(self),
            location: None,
            size: None,
            domain_size: None,
        }
    }
}

#[async_trait]
impl<S: RecordStore, T: RecordMapped> DurableTier<T> for RecordTier<S> {
    async fn read(&self, key: &str) -> StowageResult<Stored<T>> {
        let record = self
            .find::<T>(key)
            .await?
            .ok_or_else(|| self.not_found(key))?;
        let value = T::from_record(&record)?;
        Ok(Stored {
            value,
            size: record.approximate_size(),
        })
    }

    async fn write(&self, value: T, key: &str) -> StowageResult<Stored<T>> {
        if sanitize(key).is_empty() {
            return Err(StowageError::InvalidKey {
                key: key.to_string(),
            });
        }
        let mut record = self
            .find::<T>(key)
            .await?
            .unwrap_or_else(|| Record::new(T::ENTITY, key));
        value.apply_to_record(&mut record)?;
        // Mapping may not move the record to another key or entity.
        record.entity = T::ENTITY.to_string();
        record.key = sanitize(key);

        let stored = self.store.insert_or_replace(&self.boundary, record).await?;
        let value = T::from_record(&stored).map_err(|e| StowageError::Conversion {
            message: format!("{} '{}' does not map back after write: {e}", T::ENTITY, stored.key),
        })?;
        Ok(Stored {
            value,
            size: stored.approximate_size(),
        })
    }

    async fn delete(&self, key: &str) -> StowageResult<()> {
        let record = self
            .find::<T>(key)
            .await?
            .ok_or_else(|| self.not_found(key))?;
        self.store.delete(&self.boundary, &record).await
    }

    async fn delete_all(&self) -> StowageResult<()> {
        self.store.batch_delete(&self.boundary, T::ENTITY).await?;
        Ok(())
    }
}
