//! Quota domains and their sub-domains.
//!
//! # Layout
//!
//! ```text
//! {search path}/stowage/{domain}/
//!   {sub_domain}/
//!     {key}.{ext}
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::codec::FileExtension;
use crate::config::{ByteCeiling, SearchPath, ROOT_DIR_NAME};
use crate::error::{StowageError, StowageResult};
use crate::sanitize::sanitize;
use crate::store::ByteStore;

/// Top-level durable storage area with an optional byte ceiling.
///
/// Two domains are equal iff their (sanitized) names are equal.
#[derive(Debug, Clone)]
pub struct QuotaDomain {
    name: String,
    location: SearchPath,
    ceiling: ByteCeiling,
}

impl QuotaDomain {
    pub fn new(name: &str, location: SearchPath) -> Self {
        Self {
            name: sanitize(name),
            location,
            ceiling: ByteCeiling::UNBOUNDED,
        }
    }

    pub fn with_ceiling(mut self, ceiling: ByteCeiling) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_limit_mb(self, megabytes: Option<f64>) -> Self {
        self.with_ceiling(ByteCeiling::from_megabytes(megabytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &SearchPath {
        &self.location
    }

    pub fn ceiling(&self) -> ByteCeiling {
        self.ceiling
    }

    /// Deterministic root directory of this domain.
    pub fn resolve_root(&self) -> StowageResult<PathBuf> {
        if self.name.is_empty() {
            return Err(StowageError::Resolution {
                message: "quota domain name is empty after sanitization".to_string(),
            });
        }
        Ok(self.location.resolve()?.join(ROOT_DIR_NAME).join(&self.name))
    }

    /// Fresh scan of every item under the domain, sub-domains included.
    pub async fn current_size(&self, store: &dyn ByteStore) -> StowageResult<u64> {
        store.total_size(&self.resolve_root()?).await
    }

    pub async fn ensure_created(&self, store: &dyn ByteStore) -> StowageResult<()> {
        store.create_dir_all(&self.resolve_root()?).await
    }

    /// A named partition of this domain.
    pub fn sub_domain(&self, name: &str, ceiling: ByteCeiling) -> SubDomain {
        SubDomain {
            domain: self.clone(),
            name: sanitize(name),
            ceiling,
        }
    }
}

impl PartialEq for QuotaDomain {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for QuotaDomain {}

impl Hash for QuotaDomain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for QuotaDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Named partition of a [`QuotaDomain`] with its own ceiling.
///
/// Identity is (domain name, sanitized sub-domain name).
#[derive(Debug, Clone)]
pub struct SubDomain {
    domain: QuotaDomain,
    name: String,
    ceiling: ByteCeiling,
}

impl SubDomain {
    pub fn domain(&self) -> &QuotaDomain {
        &self.domain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ceiling(&self) -> ByteCeiling {
        self.ceiling
    }

    pub fn resolve_root(&self) -> StowageResult<PathBuf> {
        if self.name.is_empty() {
            return Err(StowageError::Resolution {
                message: format!(
                    "sub-domain of '{}' has an empty name after sanitization",
                    self.domain.name
                ),
            });
        }
        Ok(self.domain.resolve_root()?.join(&self.name))
    }

    /// Location of the durable item for `key`.
    pub fn item_path(&self, key: &str, extension: &FileExtension) -> StowageResult<PathBuf> {
        let key = sanitize(key);
        if key.is_empty() {
            return Err(StowageError::InvalidKey { key });
        }
        Ok(self
            .resolve_root()?
            .join(format!("{key}{}", extension.suffix())))
    }

    pub async fn current_size(&self, store: &dyn ByteStore) -> StowageResult<u64> {
        store.total_size(&self.resolve_root()?).await
    }

    pub async fn ensure_created(&self, store: &dyn ByteStore) -> StowageResult<()> {
        store.create_dir_all(&self.resolve_root()?).await
    }

    /// Delete the sub-domain with all its contents.
    pub async fn remove(&self, store: &dyn ByteStore) -> StowageResult<()> {
        store.remove_dir_all(&self.resolve_root()?).await
    }
}

impl PartialEq for SubDomain {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.name == other.name
    }
}

impl Eq for SubDomain {}

impl Hash for SubDomain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for SubDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain.name, self.name)
    }
}
