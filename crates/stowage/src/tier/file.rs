use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::codec::Storable;
use crate::diagnostics::TierKind;
use crate::domain::SubDomain;
use crate::error::{StowageError, StowageResult};
use crate::eviction::EvictionEngine;
use crate::store::{ByteStore, FsByteStore};

use super::{Boundary, DurableTier, Stored, TierInfo, TierUsage};

/// Durable tier of per-item files inside one sub-domain.
#[derive(Debug, Clone)]
pub struct FileTier {
    sub_domain: SubDomain,
    store: Arc<dyn ByteStore>,
    engine: EvictionEngine,
}

impl FileTier {
    pub fn new(sub_domain: SubDomain) -> Self {
        Self::with_store(sub_domain, Arc::new(FsByteStore::new()))
    }

    pub fn with_store(sub_domain: SubDomain, store: Arc<dyn ByteStore>) -> Self {
        Self {
            sub_domain,
            engine: EvictionEngine::new(store.clone()),
            store,
        }
    }

    pub fn sub_domain(&self) -> &SubDomain {
        &self.sub_domain
    }

    pub fn store(&self) -> &dyn ByteStore {
        self.store.as_ref()
    }

    /// Evict against the sub-domain ceiling, then against the domain ceiling.
    ///
    /// The two passes are independent; the domain pass may remove items of
    /// any sub-domain in the domain. An item that cannot fit under either
    /// ceiling is rejected before anything is evicted.
    async fn make_room(&self, requested: u64) -> StowageResult<()> {
        let domain = self.sub_domain.domain();
        if let Some(ceiling) = self
            .sub_domain
            .ceiling()
            .tightest(domain.ceiling())
            .limit()
            .filter(|&limit| limit <= requested)
        {
            return Err(StowageError::ItemTooLarge { ceiling, requested });
        }

        self.engine
            .reclaim(
                &self.sub_domain.resolve_root()?,
                self.sub_domain.ceiling(),
                requested,
            )
            .await?;
        self.engine
            .reclaim(&domain.resolve_root()?, domain.ceiling(), requested)
            .await?;
        Ok(())
    }

    /// Delete the sub-domain directory with everything in it.
    pub async fn delete_sub_domain(&self) -> StowageResult<()> {
        self.sub_domain.remove(self.store.as_ref()).await?;
        debug!(sub_domain = %self.sub_domain, "deleted sub-domain");
        Ok(())
    }
}

#[async_trait]
impl TierInfo for FileTier {
    fn kind(&self) -> TierKind {
        TierKind::File
    }

    fn boundary(&self) -> Boundary {
        let domain = self.sub_domain.domain();
        Boundary {
            domain: domain.name().to_string(),
            domain_ceiling: domain.ceiling(),
            sub_domain: self.sub_domain.name().to_string(),
            ceiling: self.sub_domain.ceiling(),
        }
    }

    async fn usage(&self) -> TierUsage {
        let store = self.store.as_ref();
        TierUsage {
            boundary: self.boundary(),
            location: self.sub_domain.resolve_root().ok(),
            size: self.sub_domain.current_size(store).await.ok(),
            domain_size: self.sub_domain.domain().current_size(store).await.ok(),
        }
    }
}

#[async_trait]
impl<T: Storable> DurableTier<T> for FileTier {
    async fn read(&self, key: &str) -> StowageResult<Stored<T>> {
        let path = self.sub_domain.item_path(key, &T::EXTENSION)?;
        let bytes = match self.store.read(&path).await {
            Ok(bytes) => bytes,
            Err(StowageError::NotFound { .. }) => {
                return Err(StowageError::NotFound {
                    boundary: self.sub_domain.to_string(),
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(err),
        };
        let value = T::from_bytes(&bytes)?;
        Ok(Stored {
            value,
            size: bytes.len() as u64,
        })
    }

    async fn write(&self, value: T, key: &str) -> StowageResult<Stored<T>> {
        let path = self.sub_domain.item_path(key, &T::EXTENSION)?;
        let bytes = value.to_bytes()?;
        let size = bytes.len() as u64;

        self.make_room(size).await?;
        self.sub_domain.ensure_created(self.store.as_ref()).await?;
        self.store.write(&bytes, &path).await?;

        Ok(Stored { value, size })
    }

    async fn delete(&self, key: &str) -> StowageResult<()> {
        let path = self.sub_domain.item_path(key, &T::EXTENSION)?;
        match self.store.delete(&path).await {
            Err(StowageError::NotFound { .. }) => Err(StowageError::NotFound {
                boundary: self.sub_domain.to_string(),
                key: key.to_string(),
            }),
            other => other,
        }
    }

    async fn touch(&self, key: &str) -> StowageResult<()> {
        let path = self.sub_domain.item_path(key, &T::EXTENSION)?;
        match self.store.touch(&path).await {
            Err(StowageError::NotFound { .. }) => Err(StowageError::NotFound {
                boundary: self.sub_domain.to_string(),
                key: key.to_string(),
            }),
            other => other,
        }
    }

    /// Removes every item of the sub-domain; the sub-domain itself stays.
    async fn delete_all(&self) -> StowageResult<()> {
        let root = self.sub_domain.resolve_root()?;
        let items = self.store.enumerate(&root).await?;
        let mut first_error = None;

        for item in items.into_iter().filter(|i| !i.is_dir) {
            match self.store.delete(&item.path).await {
                Ok(()) | Err(StowageError::NotFound { .. }) => {}
                Err(err) => {
                    warn!(path = %item.path.display(), error = %err, "failed to delete item");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Blob, Json};
    use crate::config::{ByteCeiling, SearchPath};
    use crate::domain::QuotaDomain;
    use tempfile::TempDir;

    fn tier_in(temp_dir: &TempDir, ceiling: ByteCeiling) -> FileTier {
        let domain = QuotaDomain::new("app", SearchPath::Custom(temp_dir.path().to_path_buf()));
        FileTier::new(domain.sub_domain("items", ceiling))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let tier = tier_in(&temp_dir, ByteCeiling::UNBOUNDED);

        let stored = tier
            .write(Json(vec![1, 2, 3]), "Numbers")
            .await
            .unwrap();
        assert_eq!(stored.size, 7);

        let read: Stored<Json<Vec<i32>>> = tier.read("numbers").await.unwrap();
        assert_eq!(read.value, Json(vec![1, 2, 3]));
        assert!(tier
            .sub_domain()
            .resolve_root()
            .unwrap()
            .join("numbers.txt")
            .exists());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let tier = tier_in(&temp_dir, ByteCeiling::UNBOUNDED);

        let err = DurableTier::<Blob>::read(&tier, "ghost").await.unwrap_err();
        assert!(matches!(
            err,
            StowageError::NotFound { ref boundary, ref key } if boundary == "app/items" && key == "ghost"
        ));
        assert!(DurableTier::<Blob>::delete(&tier, "ghost")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_touch_moves_item_to_back_of_eviction_order() {
        let temp_dir = TempDir::new().unwrap();
        let tier = tier_in(&temp_dir, ByteCeiling::from_bytes(250));
        tier.write(Blob(vec![0; 100]), "a").await.unwrap();
        tier.write(Blob(vec![0; 100]), "b").await.unwrap();

        DurableTier::<Blob>::touch(&tier, "a").await.unwrap();
        tier.write(Blob(vec![0; 100]), "c").await.unwrap();

        assert!(DurableTier::<Blob>::read(&tier, "a").await.is_ok());
        assert!(DurableTier::<Blob>::read(&tier, "b")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(DurableTier::<Blob>::touch(&tier, "ghost")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_wrong_type_is_invalid_data() {
        let temp_dir = TempDir::new().unwrap();
        let tier = tier_in(&temp_dir, ByteCeiling::UNBOUNDED);

        tier.write("not json".to_string(), "doc").await.unwrap();
        let err = DurableTier::<Json<u32>>::read(&tier, "doc").await.unwrap_err();
        assert!(matches!(err, StowageError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn test_domain_ceiling_evicts_across_sub_domains() {
        let temp_dir = TempDir::new().unwrap();
        let domain = QuotaDomain::new("app", SearchPath::Custom(temp_dir.path().to_path_buf()))
            .with_ceiling(ByteCeiling::from_bytes(250));
        let first = FileTier::new(domain.sub_domain("first", ByteCeiling::UNBOUNDED));
        let second = FileTier::new(domain.sub_domain("second", ByteCeiling::UNBOUNDED));

        first.write(Blob(vec![0; 100]), "a").await.unwrap();
        first.write(Blob(vec![0; 100]), "b").await.unwrap();
        second.write(Blob(vec![0; 100]), "c").await.unwrap();

        assert!(DurableTier::<Blob>::read(&first, "a")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(DurableTier::<Blob>::read(&first, "b").await.is_ok());
        assert_eq!(
            domain.current_size(first.store()).await.unwrap(),
            200
        );
    }

    #[tokio::test]
    async fn test_delete_all_keeps_sub_domain() {
        let temp_dir = TempDir::new().unwrap();
        let tier = tier_in(&temp_dir, ByteCeiling::UNBOUNDED);
        tier.write(Blob(vec![1; 10]), "a").await.unwrap();
        tier.write("text".to_string(), "b").await.unwrap();

        DurableTier::<Blob>::delete_all(&tier).await.unwrap();

        let usage = tier.usage().await;
        assert_eq!(usage.size, Some(0));
        assert!(tier.sub_domain().resolve_root().unwrap().exists());
    }

    #[tokio::test]
    async fn test_delete_sub_domain() {
        let temp_dir = TempDir::new().unwrap();
        let tier = tier_in(&temp_dir, ByteCeiling::UNBOUNDED);
        tier.write(Blob(vec![1; 10]), "a").await.unwrap();

        tier.delete_sub_domain().await.unwrap();

        assert!(!tier.sub_domain().resolve_root().unwrap().exists());
        assert!(DurableTier::<Blob>::read(&tier, "a")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
