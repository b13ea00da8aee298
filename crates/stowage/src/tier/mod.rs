//! Durable tiers a [`TieredCache`](crate::TieredCache) can sit on.
//!
//! [`TierInfo`] carries what the registry needs to know about a tier;
//! [`DurableTier`] is the typed read/write/delete surface, implemented per
//! value capability.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ByteCeiling;
use crate::diagnostics::TierKind;
use crate::error::StowageResult;

mod file;
mod record;

pub use file::FileTier;
pub use record::RecordTier;

/// A value as the durable tier holds it, with its byte cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored<T> {
    pub value: T,
    pub size: u64,
}

/// Where a tier keeps its items, and under which ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Boundary {
    pub domain: String,
    pub domain_ceiling: ByteCeiling,
    pub sub_domain: String,
    pub ceiling: ByteCeiling,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.sub_domain)
    }
}

/// Point-in-time sizes of a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    pub boundary: Boundary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    /// Bytes held by the sub-domain; `None` when the tier cannot tell.
    pub size: Option<u64>,
    /// Bytes held by the whole domain.
    pub domain_size: Option<u64>,
}

#[async_trait]
pub trait TierInfo: Send + Sync + 'static {
    fn kind(&self) -> TierKind;

    fn boundary(&self) -> Boundary;

    async fn usage(&self) -> TierUsage;
}

/// Typed access to a durable tier.
#[async_trait]
pub trait DurableTier<T>: TierInfo {
    async fn read(&self, key: &str) -> StowageResult<Stored<T>>;

    /// Persist `value`; the returned value is authoritative and may carry a
    /// tier-assigned identity.
    async fn write(&self, value: T, key: &str) -> StowageResult<Stored<T>>;

    async fn delete(&self, key: &str) -> StowageResult<()>;

    /// Refresh the recency of `key` without reading it. Tiers without an
    /// eviction order keep the default no-op.
    async fn touch(&self, _key: &str) -> StowageResult<()> {
        Ok(())
    }

    /// Remove every item of this kind from the tier.
    async fn delete_all(&self) -> StowageResult<()>;
}
