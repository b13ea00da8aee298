//! Least-recently-used eviction under a byte ceiling.
//!
//! [`EvictionEngine::reclaim`] guarantees that after it returns `Ok`, at
//! least `requested` bytes fit under the ceiling of the boundary it was
//! given. It holds no lock across enumerate, decide and delete: a concurrent
//! writer to the same boundary can invalidate its accounting.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ByteCeiling;
use crate::error::{StowageError, StowageResult};
use crate::store::{ByteStore, ItemMeta};

/// Everything known about an eviction pass that could not free enough space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionFailure {
    pub boundary: PathBuf,
    pub ceiling: u64,
    /// Free bytes under the ceiling when the pass gave up. Negative when the
    /// boundary already held more than the ceiling.
    pub available: i64,
    pub requested: u64,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

fn write_paths(f: &mut fmt::Formatter<'_>, paths: &[PathBuf]) -> fmt::Result {
    if paths.is_empty() {
        return writeln!(f, "            (none)");
    }
    for path in paths {
        writeln!(f, "            {}", path.display())?;
    }
    Ok(())
}

impl fmt::Display for EvictionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "** WARNING **")?;
        writeln!(f)?;
        writeln!(f, "    Could not free enough space under the quota ceiling.")?;
        writeln!(f, "        - Boundary: {}", self.boundary.display())?;
        writeln!(f, "        - Maximum Limit: {}", self.ceiling)?;
        writeln!(f, "        - Available Limit: {}", self.available)?;
        writeln!(f, "        - Requested Limit: {}", self.requested)?;
        writeln!(f, "        - Items successfully deleted:")?;
        write_paths(f, &self.deleted)?;
        writeln!(f, "        - Items failed to delete:")?;
        write_paths(f, &self.failed)?;
        writeln!(f)?;
        write!(f, "** WARNING **")
    }
}

/// Result of a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionOutcome {
    /// Items removed, least recently used first.
    pub evicted: Vec<PathBuf>,
    pub freed: u64,
    /// Free bytes under the ceiling after the pass; `None` when unbounded.
    pub available: Option<i64>,
}

fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// Reclaims space from a boundary by deleting its least recently used items.
#[derive(Debug, Clone)]
pub struct EvictionEngine {
    store: Arc<dyn ByteStore>,
}

impl EvictionEngine {
    pub fn new(store: Arc<dyn ByteStore>) -> Self {
        Self { store }
    }

    /// Make room for `requested` bytes under `boundary`.
    pub async fn reclaim(
        &self,
        boundary: &Path,
        ceiling: ByteCeiling,
        requested: u64,
    ) -> StowageResult<EvictionOutcome> {
        let Some(limit) = ceiling.limit() else {
            return Ok(EvictionOutcome::default());
        };

        if limit <= requested {
            return Err(StowageError::ItemTooLarge {
                ceiling: limit,
                requested,
            });
        }

        let items = self.store.enumerate(boundary).await?;
        let total: u64 = items.iter().filter(|i| !i.is_dir).map(|i| i.size).sum();
        let wanted = signed(requested);
        let mut available = signed(limit) - signed(total);

        if available >= wanted {
            return Ok(EvictionOutcome {
                available: Some(available),
                ..EvictionOutcome::default()
            });
        }

        // Whole sub-trees are never candidates.
        let mut candidates: Vec<ItemMeta> = items.into_iter().filter(|i| !i.is_dir).collect();
        candidates.sort_by(|a, b| {
            a.effective_stamp()
                .cmp(&b.effective_stamp())
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        let mut freed = 0u64;

        for item in candidates {
            if available >= wanted {
                break;
            }
            match self.store.delete(&item.path).await {
                // Already gone: the space is free either way.
                Ok(()) | Err(StowageError::NotFound { .. }) => {
                    debug!(path = %item.path.display(), size = item.size, "evicted item");
                    available += signed(item.size);
                    freed += item.size;
                    deleted.push(item.path);
                }
                Err(err) => {
                    warn!(path = %item.path.display(), error = %err, "failed to evict item");
                    failed.push(item.path);
                }
            }
        }

        if available < wanted {
            let failure = EvictionFailure {
                boundary: boundary.to_path_buf(),
                ceiling: limit,
                available,
                requested,
                deleted,
                failed,
            };
            warn!("{failure}");
            return Err(failure.into());
        }

        info!(
            boundary = %boundary.display(),
            evicted = deleted.len(),
            freed,
            failed = failed.len(),
            "evicted items to make room"
        );
        Ok(EvictionOutcome {
            evicted: deleted,
            freed,
            available: Some(available),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsByteStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    async fn seed(store: &FsByteStore, dir: &Path, names: &[&str], size: usize) -> Vec<PathBuf> {
        store.create_dir_all(dir).await.unwrap();
        let mut paths = Vec::new();
        for name in names {
            let path = dir.join(name);
            store.write(&vec![0u8; size], &path).await.unwrap();
            paths.push(path);
        }
        paths
    }

    fn engine() -> EvictionEngine {
        EvictionEngine::new(Arc::new(FsByteStore::new()))
    }

    #[tokio::test]
    async fn test_unbounded_skips_accounting() {
        let outcome = engine()
            .reclaim(Path::new("/definitely/not/here"), ByteCeiling::UNBOUNDED, u64::MAX)
            .await
            .unwrap();
        assert_eq!(outcome, EvictionOutcome::default());
    }

    #[tokio::test]
    async fn test_item_too_large_evicts_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsByteStore::new();
        seed(&store, temp_dir.path(), &["a", "b"], 10).await;

        let err = engine()
            .reclaim(temp_dir.path(), ByteCeiling::from_bytes(100), 100)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StowageError::ItemTooLarge {
                ceiling: 100,
                requested: 100
            }
        ));
        assert_eq!(store.enumerate(temp_dir.path()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enough_space_evicts_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsByteStore::new();
        seed(&store, temp_dir.path(), &["a", "b"], 10).await;

        let outcome = engine()
            .reclaim(temp_dir.path(), ByteCeiling::from_bytes(100), 80)
            .await
            .unwrap();

        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.available, Some(80));
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used_first() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsByteStore::new();
        let paths = seed(&store, temp_dir.path(), &["a", "b", "c", "d"], 10).await;
        // Touch "a": "b" becomes the oldest.
        store.read(&paths[0]).await.unwrap();

        let outcome = engine()
            .reclaim(temp_dir.path(), ByteCeiling::from_bytes(40), 15)
            .await
            .unwrap();

        assert_eq!(outcome.evicted, vec![paths[1].clone(), paths[2].clone()]);
        assert_eq!(outcome.freed, 20);
        assert_eq!(outcome.available, Some(20));
        assert!(store.exists(&paths[0]).await);
        assert!(store.exists(&paths[3]).await);
    }

    #[tokio::test]
    async fn test_directories_are_never_evicted() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsByteStore::new();
        let nested = temp_dir.path().join("sub");
        let inner = seed(&store, &nested, &["inner"], 10).await;
        let outer = seed(&store, temp_dir.path(), &["outer"], 10).await;

        let outcome = engine()
            .reclaim(temp_dir.path(), ByteCeiling::from_bytes(25), 20)
            .await
            .unwrap();

        assert_eq!(outcome.evicted, vec![inner[0].clone(), outer[0].clone()]);
        assert!(store.exists(&nested).await);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_everything() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsByteStore::new();
        seed(&store, temp_dir.path(), &["a"], 10).await;

        let refusing = Arc::new(RefusingStore {
            inner: store,
            attempts: Mutex::new(HashSet::new()),
        });
        let err = EvictionEngine::new(refusing.clone())
            .reclaim(temp_dir.path(), ByteCeiling::from_bytes(12), 5)
            .await
            .unwrap_err();

        let StowageError::QuotaExhausted(failure) = err else {
            panic!("expected QuotaExhausted, got {err:?}");
        };
        assert_eq!(failure.ceiling, 12);
        assert_eq!(failure.available, 2);
        assert_eq!(failure.requested, 5);
        assert!(failure.deleted.is_empty());
        assert_eq!(failure.failed, vec![temp_dir.path().join("a")]);
        assert_eq!(refusing.attempts.lock().unwrap().len(), 1);

        let text = failure.to_string();
        assert!(text.starts_with("** WARNING **"));
        assert!(text.contains("- Maximum Limit: 12"));
        assert!(text.contains("- Available Limit: 2"));
        assert!(text.contains("- Requested Limit: 5"));
        assert!(text.ends_with("** WARNING **"));
    }

    #[tokio::test]
    async fn test_missing_boundary_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let outcome = engine()
            .reclaim(&temp_dir.path().join("missing"), ByteCeiling::from_bytes(10), 5)
            .await
            .unwrap();
        assert_eq!(outcome.available, Some(10));
    }

    #[derive(Debug)]
    struct RefusingStore {
        inner: FsByteStore,
        attempts: Mutex<HashSet<PathBuf>>,
    }

    #[async_trait]
    impl ByteStore for RefusingStore {
        async fn write(&self, bytes: &[u8], location: &Path) -> StowageResult<PathBuf> {
            self.inner.write(bytes, location).await
        }

        async fn read(&self, location: &Path) -> StowageResult<Vec<u8>> {
            self.inner.read(location).await
        }

        async fn delete(&self, location: &Path) -> StowageResult<()> {
            self.attempts.lock().unwrap().insert(location.to_path_buf());
            Err(StowageError::Io {
                path: location.to_path_buf(),
                message: "permission denied".to_string(),
            })
        }

        async fn enumerate(&self, location: &Path) -> StowageResult<Vec<ItemMeta>> {
            self.inner.enumerate(location).await
        }

        async fn exists(&self, location: &Path) -> bool {
            self.inner.exists(location).await
        }

        async fn create_dir_all(&self, location: &Path) -> StowageResult<()> {
            self.inner.create_dir_all(location).await
        }

        async fn remove_dir_all(&self, location: &Path) -> StowageResult<()> {
            self.inner.remove_dir_all(location).await
        }
    }
}
