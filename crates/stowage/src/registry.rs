//! Registry of live services.
//!
//! Every registered [`TieredCache`](crate::TieredCache) is tracked until it is
//! dropped. Registration flags configuration hazards (an empty sub-domain
//! name, two services on one sub-domain, one domain with two ceilings) and the
//! registry can produce a usage report across everything it tracks.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use tracing::warn;

use crate::config::ByteCeiling;
use crate::diagnostics::TierKind;
use crate::service::{ServiceStats, StatsSnapshot};
use crate::tier::{Boundary, TierInfo};
use crate::volatile::VolatileCache;

/// Configuration hazard found at registration. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryWarning {
    EmptySubDomainName {
        domain: String,
    },
    DuplicateSubDomain {
        domain: String,
        sub_domain: String,
    },
    ConflictingDomainCeiling {
        domain: String,
        existing: ByteCeiling,
        requested: ByteCeiling,
    },
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySubDomainName { domain } => {
                write!(f, "sub-domain of domain '{domain}' has an empty name")
            }
            Self::DuplicateSubDomain { domain, sub_domain } => write!(
                f,
                "sub-domain '{domain}/{sub_domain}' is already used by another service; \
                 eviction and item names may collide"
            ),
            Self::ConflictingDomainCeiling {
                domain,
                existing,
                requested,
            } => write!(
                f,
                "domain '{domain}' is registered with ceiling {existing} and now {requested}; \
                 the tightest positive ceiling applies"
            ),
        }
    }
}

/// What a service hands the registry about itself.
pub(crate) struct ServiceEntry {
    pub tier: Arc<dyn TierInfo>,
    pub stats: Arc<ServiceStats>,
    pub volatile: VolatileCache,
}

struct Registered {
    kind: TierKind,
    boundary: Boundary,
    entry: ServiceEntry,
}

type PairKey = (TierKind, String, String);
type DomainKey = (TierKind, String);

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    entries: BTreeMap<u64, Registered>,
    pairs: HashMap<PairKey, usize>,
    domain_ceilings: HashMap<DomainKey, BTreeMap<ByteCeiling, usize>>,
}

impl RegistryState {
    fn unregister(&mut self, id: u64) {
        let Some(registered) = self.entries.remove(&id) else {
            return;
        };
        let boundary = &registered.boundary;

        let pair = (
            registered.kind,
            boundary.domain.clone(),
            boundary.sub_domain.clone(),
        );
        if let Some(count) = self.pairs.get_mut(&pair) {
            *count -= 1;
            if *count == 0 {
                self.pairs.remove(&pair);
            }
        }

        let domain = (registered.kind, boundary.domain.clone());
        if let Some(ceilings) = self.domain_ceilings.get_mut(&domain) {
            if let Some(count) = ceilings.get_mut(&boundary.domain_ceiling) {
                *count -= 1;
                if *count == 0 {
                    ceilings.remove(&boundary.domain_ceiling);
                }
            }
            if ceilings.is_empty() {
                self.domain_ceilings.remove(&domain);
            }
        }
    }
}

/// Shared, injectable registry. Clones share state.
#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, entry: ServiceEntry) -> (Registration, Vec<RegistryWarning>) {
        let kind = entry.tier.kind();
        let boundary = entry.tier.boundary();
        let mut warnings = Vec::new();

        let id = {
            let mut state = self.lock();

            if boundary.sub_domain.is_empty() {
                warnings.push(RegistryWarning::EmptySubDomainName {
                    domain: boundary.domain.clone(),
                });
            }

            let pair = (kind, boundary.domain.clone(), boundary.sub_domain.clone());
            let count = state.pairs.entry(pair).or_insert(0);
            if *count > 0 {
                warnings.push(RegistryWarning::DuplicateSubDomain {
                    domain: boundary.domain.clone(),
                    sub_domain: boundary.sub_domain.clone(),
                });
            }
            *count += 1;

            let ceilings = state
                .domain_ceilings
                .entry((kind, boundary.domain.clone()))
                .or_default();
            if let Some(existing) = ceilings
                .keys()
                .find(|ceiling| **ceiling != boundary.domain_ceiling)
            {
                warnings.push(RegistryWarning::ConflictingDomainCeiling {
                    domain: boundary.domain.clone(),
                    existing: *existing,
                    requested: boundary.domain_ceiling,
                });
            }
            *ceilings.entry(boundary.domain_ceiling).or_insert(0) += 1;

            let id = state.next_id;
            state.next_id += 1;
            state.entries.insert(
                id,
                Registered {
                    kind,
                    boundary: boundary.clone(),
                    entry,
                },
            );
            id
        };

        for warning in &warnings {
            warn!(tier = %kind, boundary = %boundary, "{warning}");
        }

        (
            Registration {
                state: Arc::downgrade(&self.state),
                id,
            },
            warnings,
        )
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Sizes, ceilings and counters of every registered service, with
    /// per-domain aggregates. Sizes are scanned fresh.
    pub async fn report(&self) -> UsageReport {
        let entries: Vec<_> = {
            let state = self.lock();
            state
                .entries
                .values()
                .map(|r| {
                    (
                        r.kind,
                        r.entry.tier.clone(),
                        r.entry.stats.clone(),
                        r.entry.volatile.clone(),
                    )
                })
                .collect()
        };

        let mut sub_domains = Vec::with_capacity(entries.len());
        for (kind, tier, stats, volatile) in entries {
            let usage = tier.usage().await;
            sub_domains.push(SubDomainReport {
                tier: kind,
                domain: usage.boundary.domain.clone(),
                domain_ceiling: usage.boundary.domain_ceiling,
                name: usage.boundary.sub_domain.clone(),
                ceiling: usage.boundary.ceiling,
                location: usage.location,
                size: usage.size,
                domain_size: usage.domain_size,
                volatile_ceiling: volatile.ceiling(),
                volatile_size: volatile.weighted_size(),
                stats: stats.snapshot(),
            });
        }

        let mut domains: Vec<DomainReport> = Vec::new();
        for sub in &sub_domains {
            match domains
                .iter_mut()
                .find(|d| d.tier == sub.tier && d.name == sub.domain)
            {
                Some(domain) => domain.absorb(sub),
                None => domains.push(DomainReport::from_sub_domain(sub)),
            }
        }

        UsageReport {
            sub_domains,
            domains,
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("registrations", &self.len())
            .finish()
    }
}

/// Live registration; unregisters on drop.
#[derive(Debug)]
pub struct Registration {
    state: Weak<Mutex<RegistryState>>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .unregister(self.id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubDomainReport {
    pub tier: TierKind,
    pub domain: String,
    pub domain_ceiling: ByteCeiling,
    pub name: String,
    pub ceiling: ByteCeiling,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    pub size: Option<u64>,
    pub domain_size: Option<u64>,
    pub volatile_ceiling: ByteCeiling,
    pub volatile_size: u64,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainReport {
    pub tier: TierKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    /// Tightest positive ceiling any registration asked for.
    pub ceiling: ByteCeiling,
    pub size: Option<u64>,
    pub sub_domains: Vec<String>,
    pub reads: u64,
    pub writes: u64,
}

impl DomainReport {
    fn from_sub_domain(sub: &SubDomainReport) -> Self {
        let mut domain = Self {
            tier: sub.tier,
            name: sub.domain.clone(),
            location: sub
                .location
                .as_ref()
                .and_then(|p| p.parent())
                .map(|p| p.to_path_buf()),
            ceiling: ByteCeiling::UNBOUNDED,
            size: sub.domain_size,
            sub_domains: Vec::new(),
            reads: 0,
            writes: 0,
        };
        domain.absorb(sub);
        domain
    }

    fn absorb(&mut self, sub: &SubDomainReport) {
        self.ceiling = self.ceiling.tightest(sub.domain_ceiling);
        if self.size.is_none() {
            self.size = sub.domain_size;
        }
        if !self.sub_domains.contains(&sub.name) {
            self.sub_domains.push(sub.name.clone());
        }
        self.reads += sub.stats.durable_reads + sub.stats.volatile_reads;
        self.writes += sub.stats.durable_writes;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub sub_domains: Vec<SubDomainReport>,
    pub domains: Vec<DomainReport>,
}

fn size_or_unknown(size: Option<u64>) -> String {
    size.map_or_else(|| "unknown".to_string(), |bytes| format!("{bytes} bytes"))
}

const RULE: &str = "- - - - - - - - - - - - - - - - - - - -";

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(f, "stowage usage report")?;
        writeln!(f, "{RULE}")?;

        for sub in &self.sub_domains {
            writeln!(f, "sub-domain {}/{} ({})", sub.domain, sub.name, sub.tier)?;
            if let Some(location) = &sub.location {
                writeln!(f, "  location:         {}", location.display())?;
            }
            writeln!(f, "  ceiling:          {}", sub.ceiling)?;
            writeln!(f, "  size:             {}", size_or_unknown(sub.size))?;
            writeln!(f, "  durable reads:    {}", sub.stats.durable_reads)?;
            writeln!(f, "  durable writes:   {}", sub.stats.durable_writes)?;
            writeln!(f, "  volatile ceiling: {}", sub.volatile_ceiling)?;
            writeln!(f, "  volatile size:    {} bytes", sub.volatile_size)?;
            writeln!(f, "  volatile reads:   {}", sub.stats.volatile_reads)?;
            writeln!(f, "  volatile writes:  {}", sub.stats.volatile_writes)?;
            writeln!(f)?;
        }

        for domain in &self.domains {
            writeln!(f, "domain {} ({})", domain.name, domain.tier)?;
            if let Some(location) = &domain.location {
                writeln!(f, "  location:         {}", location.display())?;
            }
            writeln!(f, "  ceiling:          {}", domain.ceiling)?;
            writeln!(f, "  size:             {}", size_or_unknown(domain.size))?;
            writeln!(f, "  reads:            {}", domain.reads)?;
            writeln!(f, "  writes:           {}", domain.writes)?;
            writeln!(f, "  sub-domains:      {}", domain.sub_domains.join(", "))?;
            writeln!(f)?;
        }

        writeln!(f, "{RULE}")?;
        writeln!(f, "end of report")?;
        write!(f, "{RULE}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Blob;
    use crate::config::SearchPath;
    use crate::domain::QuotaDomain;
    use crate::tier::FileTier;
    use crate::TieredCache;
    use tempfile::TempDir;

    fn service(
        temp_dir: &TempDir,
        domain_ceiling: ByteCeiling,
        sub_domain: &str,
    ) -> TieredCache<FileTier> {
        let domain = QuotaDomain::new("app", SearchPath::Custom(temp_dir.path().to_path_buf()))
            .with_ceiling(domain_ceiling);
        TieredCache::new(FileTier::new(
            domain.sub_domain(sub_domain, ByteCeiling::UNBOUNDED),
        ))
    }

    #[test]
    fn test_clean_registration() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();

        let mut first = service(&temp_dir, ByteCeiling::UNBOUNDED, "images");
        let mut second = service(&temp_dir, ByteCeiling::UNBOUNDED, "thumbs");

        assert!(first.register(&registry).is_empty());
        assert!(second.register(&registry).is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_sub_domain() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();

        let mut first = service(&temp_dir, ByteCeiling::UNBOUNDED, "images");
        let mut second = service(&temp_dir, ByteCeiling::UNBOUNDED, "Images");
        first.register(&registry);

        let warnings = second.register(&registry);
        assert_eq!(
            warnings,
            vec![RegistryWarning::DuplicateSubDomain {
                domain: "app".to_string(),
                sub_domain: "images".to_string(),
            }]
        );
    }

    #[test]
    fn test_conflicting_domain_ceiling() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();

        let mut first = service(&temp_dir, ByteCeiling::from_bytes(1_000), "a");
        let mut second = service(&temp_dir, ByteCeiling::from_bytes(2_000), "b");
        first.register(&registry);

        let warnings = second.register(&registry);
        assert!(matches!(
            warnings.as_slice(),
            [RegistryWarning::ConflictingDomainCeiling { existing, requested, .. }]
                if existing.bytes() == 1_000 && requested.bytes() == 2_000
        ));
    }

    #[test]
    fn test_empty_sub_domain_name() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();

        let mut nameless = service(&temp_dir, ByteCeiling::UNBOUNDED, "!!!");
        let warnings = nameless.register(&registry);
        assert_eq!(
            warnings,
            vec![RegistryWarning::EmptySubDomainName {
                domain: "app".to_string()
            }]
        );
    }

    #[test]
    fn test_drop_unregisters() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();

        let mut first = service(&temp_dir, ByteCeiling::UNBOUNDED, "images");
        first.register(&registry);
        drop(first);
        assert!(registry.is_empty());

        // The pair is free again.
        let mut second = service(&temp_dir, ByteCeiling::UNBOUNDED, "images");
        assert!(second.register(&registry).is_empty());
    }

    #[test]
    fn test_registration_outlives_registry() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();
        let mut first = service(&temp_dir, ByteCeiling::UNBOUNDED, "images");
        first.register(&registry);

        drop(registry);
        drop(first);
    }

    #[tokio::test]
    async fn test_report_aggregates_domains() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new();

        let mut images = service(&temp_dir, ByteCeiling::from_bytes(10_000), "images");
        let mut thumbs = service(&temp_dir, ByteCeiling::UNBOUNDED, "thumbs");
        images.register(&registry);
        thumbs.register(&registry);

        images.write(Blob(vec![0; 300]), "a").await.unwrap();
        thumbs.write(Blob(vec![0; 200]), "b").await.unwrap();

        let report = registry.report().await;
        assert_eq!(report.sub_domains.len(), 2);
        assert_eq!(report.domains.len(), 1);

        let domain = &report.domains[0];
        assert_eq!(domain.name, "app");
        assert_eq!(domain.ceiling.bytes(), 10_000);
        assert_eq!(domain.size, Some(500));
        assert_eq!(domain.writes, 2);
        assert_eq!(domain.sub_domains, vec!["images", "thumbs"]);

        let text = report.to_string();
        assert!(text.contains("sub-domain app/images (file)"));
        assert!(text.contains("domain app (file)"));
        assert!(text.contains("end of report"));
    }
}
