//! Tiered cache service: a volatile cache in front of one durable tier.
//!
//! Reads probe the volatile cache, then the durable tier; a durable hit
//! schedules a backfill of the volatile cache and returns without waiting for
//! it. Writes go to the durable tier first (the tier of record), then refresh
//! the volatile cache with what the tier returned.
//!
//! Operations on one instance are serialized. Backfills run on a
//! [`JoinSet`] owned by the service so shutdown can await or cancel them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{ByteCeiling, StowageConfig};
use crate::diagnostics::{Action, Diagnostics, TierKind};
use crate::error::{StowageError, StowageResult};
use crate::record::{RecordMapped, RecordStore};
use crate::registry::{Registration, Registry, RegistryWarning, ServiceEntry};
use crate::sanitize::sanitize;
use crate::tier::{DurableTier, FileTier, RecordTier, Stored, TierInfo, TierUsage};
use crate::volatile::VolatileCache;

/// Monotonic per-service counters. Diagnostics only.
#[derive(Debug, Default)]
pub struct ServiceStats {
    volatile_reads: AtomicU64,
    volatile_writes: AtomicU64,
    durable_reads: AtomicU64,
    durable_writes: AtomicU64,
}

impl ServiceStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            volatile_reads: self.volatile_reads.load(Ordering::Relaxed),
            volatile_writes: self.volatile_writes.load(Ordering::Relaxed),
            durable_reads: self.durable_reads.load(Ordering::Relaxed),
            durable_writes: self.durable_writes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub volatile_reads: u64,
    pub volatile_writes: u64,
    pub durable_reads: u64,
    pub durable_writes: u64,
}

/// Ceilings and current sizes of both tiers of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceUsage {
    pub volatile_ceiling: ByteCeiling,
    pub volatile_size: u64,
    pub tier: TierUsage,
    pub stats: StatsSnapshot,
}

/// Volatile cache over a durable tier `D`.
pub struct TieredCache<D> {
    tier: Arc<D>,
    volatile: VolatileCache,
    stats: Arc<ServiceStats>,
    diagnostics: Diagnostics,
    label: String,
    gate: Arc<tokio::sync::Mutex<()>>,
    // Bumped by every mutation; a backfill issued before the bump is dropped.
    generation: Arc<AtomicU64>,
    backfills: Mutex<JoinSet<()>>,
    registration: Option<Registration>,
}

fn as_display(err: &StowageError) -> &dyn fmt::Display {
    err
}

impl<D: TierInfo> TieredCache<D> {
    /// Service over `tier` with an unbounded volatile cache and tracing
    /// diagnostics. Call [`register`](Self::register) after configuring.
    pub fn new(tier: D) -> Self {
        let label = tier.boundary().to_string();
        Self {
            tier: Arc::new(tier),
            volatile: VolatileCache::default(),
            stats: Arc::new(ServiceStats::default()),
            diagnostics: Diagnostics::default(),
            label,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
            backfills: Mutex::new(JoinSet::new()),
            registration: None,
        }
    }

    pub fn with_volatile(mut self, volatile: VolatileCache) -> Self {
        self.volatile = volatile;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Register with `registry`; the entry is removed when the service is
    /// dropped. Hazards are logged and returned, never fatal.
    pub fn register(&mut self, registry: &Registry) -> Vec<RegistryWarning> {
        // Re-registering replaces the previous entry.
        self.registration = None;
        let (registration, warnings) = registry.register(ServiceEntry {
            tier: self.tier.clone(),
            stats: self.stats.clone(),
            volatile: self.volatile.clone(),
        });
        self.registration = Some(registration);
        warnings
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    pub fn tier(&self) -> &D {
        &self.tier
    }

    pub fn volatile(&self) -> &VolatileCache {
        &self.volatile
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn usage(&self) -> ServiceUsage {
        ServiceUsage {
            volatile_ceiling: self.volatile.ceiling(),
            volatile_size: self.volatile.weighted_size(),
            tier: self.tier.usage().await,
            stats: self.stats.snapshot(),
        }
    }

    fn emit(&self, action: Action, tier: TierKind, key: &str, error: Option<&StowageError>) {
        self.diagnostics
            .emit(action, tier, &self.label, key, error.map(as_display));
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Read `key`, volatile cache first.
    pub async fn read<T>(&self, key: &str) -> StowageResult<T>
    where
        D: DurableTier<T>,
        T: Clone + Send + Sync + 'static,
    {
        let key = sanitize(key);
        let _guard = self.gate.lock().await;

        // Probe failures are plain misses.
        if let Some(value) = self.volatile.get::<T>(&key) {
            self.stats.volatile_reads.fetch_add(1, Ordering::Relaxed);
            self.emit(Action::Read, TierKind::Volatile, &key, None);
            // Keeps durable eviction order in step with volatile hits.
            if let Err(err) = DurableTier::<T>::touch(self.tier.as_ref(), &key).await {
                debug!(key = %key, error = %err, "could not refresh durable recency");
            }
            return Ok(value);
        }
        if self.volatile.is_enabled() {
            self.emit(Action::NotFound, TierKind::Volatile, &key, None);
        }

        let kind = self.tier.kind();
        match DurableTier::<T>::read(self.tier.as_ref(), &key).await {
            Ok(Stored { value, size }) => {
                self.stats.durable_reads.fetch_add(1, Ordering::Relaxed);
                self.emit(Action::Read, kind, &key, None);
                self.spawn_backfill(&key, value.clone(), size);
                Ok(value)
            }
            Err(err) if err.is_not_found() => {
                self.emit(Action::NotFound, kind, &key, None);
                Err(err)
            }
            Err(err) => {
                self.emit(Action::Read, kind, &key, Some(&err));
                Err(err)
            }
        }
    }

    /// Persist `value` under `key` and return what the durable tier stored.
    pub async fn write<T>(&self, value: T, key: &str) -> StowageResult<T>
    where
        D: DurableTier<T>,
        T: Clone + Send + Sync + 'static,
    {
        let key = sanitize(key);
        let _guard = self.gate.lock().await;
        self.bump_generation();

        let kind = self.tier.kind();
        match DurableTier::<T>::write(self.tier.as_ref(), value, &key).await {
            Ok(Stored { value, size }) => {
                self.stats.durable_writes.fetch_add(1, Ordering::Relaxed);
                self.emit(Action::Write, kind, &key, None);
                if self.volatile.is_enabled() {
                    self.volatile.insert(&key, value.clone(), size);
                    self.stats.volatile_writes.fetch_add(1, Ordering::Relaxed);
                    self.emit(Action::Write, TierKind::Volatile, &key, None);
                }
                Ok(value)
            }
            Err(err) => {
                self.emit(Action::Write, kind, &key, Some(&err));
                Err(err)
            }
        }
    }

    /// Delete `key` from the durable tier, then from the volatile cache. The
    /// volatile entry is dropped even when the durable delete fails.
    pub async fn delete<T>(&self, key: &str) -> StowageResult<()>
    where
        D: DurableTier<T>,
        T: Send + Sync + 'static,
    {
        let key = sanitize(key);
        let _guard = self.gate.lock().await;
        self.bump_generation();

        let kind = self.tier.kind();
        let result = DurableTier::<T>::delete(self.tier.as_ref(), &key).await;
        self.volatile.remove::<T>(&key);

        self.emit(Action::Delete, kind, &key, result.as_ref().err());
        if self.volatile.is_enabled() {
            self.emit(Action::Delete, TierKind::Volatile, &key, None);
        }
        result
    }

    /// Delete every `T` from the durable tier and clear the whole volatile
    /// cache, unrelated entries included.
    pub async fn delete_all<T>(&self) -> StowageResult<()>
    where
        D: DurableTier<T>,
        T: Send + Sync + 'static,
    {
        let _guard = self.gate.lock().await;
        self.bump_generation();

        let kind = self.tier.kind();
        let result = DurableTier::<T>::delete_all(self.tier.as_ref()).await;
        self.volatile.clear();

        self.emit(Action::Delete, kind, "*", result.as_ref().err());
        result
    }

    fn spawn_backfill<T>(&self, key: &str, value: T, size: u64)
    where
        T: Send + Sync + 'static,
    {
        if !self.volatile.is_enabled() {
            return;
        }
        let volatile = self.volatile.clone();
        let stats = self.stats.clone();
        let gate = self.gate.clone();
        let generation = self.generation.clone();
        let issued = generation.load(Ordering::Acquire);
        let diagnostics = self.diagnostics.clone();
        let label = self.label.clone();
        let key = key.to_string();

        let mut backfills = self.backfills.lock().unwrap_or_else(PoisonError::into_inner);
        while backfills.try_join_next().is_some() {}
        backfills.spawn(async move {
            let _guard = gate.lock().await;
            if generation.load(Ordering::Acquire) != issued {
                return;
            }
            volatile.insert(&key, value, size);
            stats.volatile_writes.fetch_add(1, Ordering::Relaxed);
            diagnostics.emit(Action::Write, TierKind::Volatile, &label, &key, None);
        });
    }

    /// Wait for every outstanding backfill.
    pub async fn drain_backfills(&self) {
        let mut pending = std::mem::take(
            &mut *self.backfills.lock().unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(result) = pending.join_next().await {
            if let Err(err) = result {
                if !err.is_cancelled() {
                    warn!(boundary = %self.label, error = %err, "backfill task failed");
                }
            }
        }
    }

    /// Abort every outstanding backfill.
    pub fn cancel_backfills(&self) {
        self.backfills
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }

    /// Cancel backfills, wait for them to stop, and unregister.
    pub async fn shutdown(mut self) {
        self.cancel_backfills();
        self.drain_backfills().await;
        self.registration = None;
    }
}

impl TieredCache<FileTier> {
    /// File-backed service described by `config`, registered with `registry`.
    pub fn from_config(config: &StowageConfig, registry: &Registry) -> Self {
        let mut service = Self::new(FileTier::new(config.sub_domain()))
            .with_volatile(VolatileCache::new(config.volatile_ceiling()));
        service.register(registry);
        service
    }

    /// Delete the sub-domain with all its items and clear the volatile cache.
    pub async fn delete_sub_domain(&self) -> StowageResult<()> {
        let _guard = self.gate.lock().await;
        self.bump_generation();

        let result = self.tier.delete_sub_domain().await;
        self.volatile.clear();

        let key = format!("sub-domain: {}", self.tier.sub_domain().name());
        self.emit(Action::Delete, TierKind::File, &key, result.as_ref().err());
        result
    }
}

impl<S: RecordStore> TieredCache<RecordTier<S>> {
    /// Every stored `T`, straight from the record tier.
    pub async fn read_all<T: RecordMapped>(&self) -> StowageResult<Vec<T>> {
        let _guard = self.gate.lock().await;
        let result = self.tier.read_all::<T>().await;
        match &result {
            Ok(_) => {
                self.stats.durable_reads.fetch_add(1, Ordering::Relaxed);
                self.emit(Action::Read, TierKind::Record, "*", None);
            }
            Err(err) => self.emit(Action::NotFound, TierKind::Record, "*", Some(err)),
        }
        result
    }
}

impl<D> fmt::Debug for TieredCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("boundary", &self.label)
            .field("volatile", &self.volatile)
            .field("stats", &self.stats.snapshot())
            .field("registered", &self.registration.is_some())
            .finish()
    }
}
