//! Raw byte-file tier.
//!
//! [`ByteStore`] is the boundary the eviction engine and the durable item
//! paths talk to. [`FsByteStore`] implements it on `tokio::fs`.
//!
//! Reads and writes stamp the item's access time explicitly from
//! [`next_access_stamp`], so least-recently-used ordering does not depend on
//! `atime` mount options or on the filesystem's timestamp granularity.

use std::fs::FileTimes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{StowageError, StowageResult};

/// Metadata for one enumerated item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMeta {
    pub path: PathBuf,
    /// Size in bytes; zero for directories.
    pub size: u64,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub is_dir: bool,
}

impl ItemMeta {
    /// Last access, falling back to creation, falling back to the epoch.
    pub fn effective_stamp(&self) -> SystemTime {
        self.accessed.or(self.created).unwrap_or(UNIX_EPOCH)
    }
}

/// Byte-addressed storage backing the file tier.
#[async_trait]
pub trait ByteStore: Send + Sync + std::fmt::Debug {
    /// Replace the item at `location` with `bytes`; returns the location written.
    async fn write(&self, bytes: &[u8], location: &Path) -> StowageResult<PathBuf>;

    async fn read(&self, location: &Path) -> StowageResult<Vec<u8>>;

    /// Remove one item. Missing items are `NotFound`.
    async fn delete(&self, location: &Path) -> StowageResult<()>;

    /// Every item under `location`, recursively. A missing location is empty;
    /// staging files of in-flight writes are left out.
    async fn enumerate(&self, location: &Path) -> StowageResult<Vec<ItemMeta>>;

    async fn exists(&self, location: &Path) -> bool;

    /// Create `location` and any missing parents. Idempotent.
    async fn create_dir_all(&self, location: &Path) -> StowageResult<()>;

    /// Remove `location` with all contents. Idempotent.
    async fn remove_dir_all(&self, location: &Path) -> StowageResult<()>;

    /// Mark the item at `location` as just used. Stores that do not track
    /// access ignore it.
    async fn touch(&self, _location: &Path) -> StowageResult<()> {
        Ok(())
    }

    /// Sum of item sizes under `location`.
    async fn total_size(&self, location: &Path) -> StowageResult<u64> {
        let items = self.enumerate(location).await?;
        Ok(items.iter().filter(|i| !i.is_dir).map(|i| i.size).sum())
    }
}

const STAMP_STEP_MICROS: u64 = 1;

static LAST_STAMP_MICROS: AtomicU64 = AtomicU64::new(0);

/// Strictly increasing process-wide access stamp.
pub fn next_access_stamp() -> SystemTime {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let mut last = LAST_STAMP_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + STAMP_STEP_MICROS);
        match LAST_STAMP_MICROS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return UNIX_EPOCH + Duration::from_micros(next),
            Err(actual) => last = actual,
        }
    }
}

/// [`ByteStore`] on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsByteStore;

impl FsByteStore {
    pub fn new() -> Self {
        Self
    }

    /// Set the access time of `path` to the next stamp.
    pub async fn stamp_access(&self, path: &Path) -> StowageResult<()> {
        let owned = path.to_path_buf();
        let stamp = next_access_stamp();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&owned)?;
            file.set_times(FileTimes::new().set_accessed(stamp))
        })
        .await
        .map_err(|e| StowageError::Io {
            path: path.to_path_buf(),
            message: format!("access stamp task failed: {e}"),
        })?
        .map_err(|e| StowageError::io(path, e))
    }

    async fn stamp_or_warn(&self, path: &Path) {
        if let Err(err) = self.stamp_access(path).await {
            warn!(path = %path.display(), error = %err, "failed to stamp access time");
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// In-flight write of [`FsByteStore::write`]; never an item.
fn is_staging(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
}

fn not_found(path: &Path) -> StowageError {
    StowageError::NotFound {
        boundary: path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        key: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

#[async_trait]
impl ByteStore for FsByteStore {
    async fn write(&self, bytes: &[u8], location: &Path) -> StowageResult<PathBuf> {
        let temp_path = temp_path_for(location);

        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| StowageError::io(&temp_path, e))?;

        if let Err(e) = fs::rename(&temp_path, location).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StowageError::io(location, e));
        }

        self.stamp_or_warn(location).await;
        debug!(path = %location.display(), bytes = bytes.len(), "wrote item");
        Ok(location.to_path_buf())
    }

    async fn read(&self, location: &Path) -> StowageResult<Vec<u8>> {
        let bytes = match fs::read(location).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(location)),
            Err(e) => return Err(StowageError::io(location, e)),
        };
        self.stamp_or_warn(location).await;
        Ok(bytes)
    }

    async fn delete(&self, location: &Path) -> StowageResult<()> {
        match fs::remove_file(location).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(location)),
            Err(e) => Err(StowageError::io(location, e)),
        }
    }

    async fn enumerate(&self, location: &Path) -> StowageResult<Vec<ItemMeta>> {
        let mut items = Vec::new();
        let mut pending = vec![location.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) if dir.as_path() == location => return Err(StowageError::io(&dir, e)),
                Err(e) => {
                    debug!(path = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(path = %dir.display(), error = %e, "stopped reading directory");
                        break;
                    }
                };
                let path = entry.path();
                if is_staging(&path) {
                    continue;
                }
                // Metadata that cannot be read is left out of the scan.
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping unreadable metadata");
                        continue;
                    }
                };
                let is_dir = meta.is_dir();
                if is_dir {
                    pending.push(path.clone());
                }
                items.push(ItemMeta {
                    path,
                    size: if is_dir { 0 } else { meta.len() },
                    accessed: meta.accessed().ok(),
                    created: meta.created().ok(),
                    is_dir,
                });
            }
        }

        Ok(items)
    }

    async fn touch(&self, location: &Path) -> StowageResult<()> {
        match self.stamp_access(location).await {
            Err(StowageError::Io { .. }) if !self.exists(location).await => {
                Err(not_found(location))
            }
            other => other,
        }
    }

    async fn exists(&self, location: &Path) -> bool {
        fs::try_exists(location).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, location: &Path) -> StowageResult<()> {
        fs::create_dir_all(location)
            .await
            .map_err(|e| StowageError::io(location, e))
    }

    async fn remove_dir_all(&self, location: &Path) -> StowageResult<()> {
        match fs::remove_dir_all(location).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StowageError::io(location, e)),
        }
    }
}
