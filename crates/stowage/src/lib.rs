//! Quota-enforced tiered storage.
//!
//! Typed values are persisted under string keys in a durable tier (per-item
//! files or structured records) with an in-memory volatile cache in front.
//! File storage is partitioned into quota domains and sub-domains, each with
//! an optional byte ceiling; writes that would exceed a ceiling evict the
//! least recently accessed items first.
//!
//! - Hierarchical quotas (domain → sub-domain → item)
//! - LRU eviction on demand, with a detailed report when space runs out
//! - Volatile cache backfilled from durable reads
//! - Registry of live services with configuration hazard warnings
//! - Typed key-value settings
//!
//! # Quick Start
//!
//! ```no_run
//! use stowage::{Blob, Registry, StowageConfig, TieredCache};
//!
//! # async fn example() -> stowage::StowageResult<()> {
//! let registry = Registry::new();
//! let config = StowageConfig::from_env()
//!     .with_domain("media")
//!     .with_sub_domain("thumbnails")
//!     .with_sub_domain_limit_mb(50.0);
//!
//! let thumbnails = TieredCache::from_config(&config, &registry);
//! thumbnails.write(Blob(vec![0xFF; 1024]), "cover art").await?;
//! let Blob(bytes) = thumbnails.read("cover art").await?;
//! assert_eq!(bytes.len(), 1024);
//!
//! println!("{}", registry.report().await);
//! # Ok(())
//! # }
//! ```
//!
//! # Layout
//!
//! Items live at `<base>/stowage/<domain>/<sub_domain>/<key><suffix>`, where
//! every name is [sanitized](sanitize()) and the base comes from a
//! [`SearchPath`].
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `STOWAGE_DOMAIN` | Quota domain name (default: `default`) |
//! | `STOWAGE_SEARCH_PATH` | `cache`, `data`, `config` or `documents` (default: `cache`) |
//! | `STOWAGE_ROOT` | Explicit base directory, overrides the search path |
//! | `STOWAGE_DOMAIN_LIMIT_MB` | Domain ceiling in megabytes (default: unbounded) |
//! | `STOWAGE_SUB_DOMAIN` | Sub-domain name (default: `items`) |
//! | `STOWAGE_SUB_DOMAIN_LIMIT_MB` | Sub-domain ceiling in megabytes (default: unbounded) |
//! | `STOWAGE_CACHE_LIMIT_MB` | Volatile cache ceiling in megabytes (default: unbounded) |

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod eviction;
pub mod kv;
pub mod record;
pub mod registry;
mod sanitize;
pub mod service;
pub mod store;
pub mod tier;
pub mod volatile;

// Re-export main types
pub use codec::{Blob, FileExtension, Jpeg, Json, Mp3, Mp4, Png, Storable};
pub use config::{ByteCeiling, SearchPath, StowageConfig};
pub use diagnostics::{
    Action, DiagnosticEvent, Diagnostics, DiagnosticsFilter, DiagnosticsSink, MemorySink,
    TierKind, TracingSink,
};
pub use domain::{QuotaDomain, SubDomain};
pub use error::{StowageError, StowageResult};
pub use eviction::{EvictionEngine, EvictionFailure, EvictionOutcome};
pub use kv::{FileSuite, KeyValueSuite, MemorySuite, SettingsService};
pub use record::{Record, RecordBoundary, RecordMapped, RecordStore, SqliteRecordStore};
pub use registry::{DomainReport, Registration, Registry, RegistryWarning, SubDomainReport, UsageReport};
pub use sanitize::sanitize;
pub use service::{ServiceUsage, StatsSnapshot, TieredCache};
pub use store::{ByteStore, FsByteStore, ItemMeta};
pub use tier::{Boundary, DurableTier, FileTier, RecordTier, Stored, TierInfo, TierUsage};
pub use volatile::VolatileCache;
