//! Byte ceilings, storage roots and service configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{QuotaDomain, SubDomain};
use crate::error::{StowageError, StowageResult};
use crate::sanitize::sanitize;

/// Bytes per megabyte used for every MB-denominated limit.
pub const BYTES_PER_MEGABYTE: f64 = 1_000_000.0;

/// Directory created under the resolved search path to hold every domain.
pub const ROOT_DIR_NAME: &str = "stowage";

/// Byte ceiling for a domain, sub-domain or volatile cache. Zero is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteCeiling(u64);

impl ByteCeiling {
    pub const UNBOUNDED: Self = Self(0);

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Convert a megabyte limit, rounding up. Absent, zero, negative and
    /// non-finite values all mean unbounded.
    pub fn from_megabytes(megabytes: Option<f64>) -> Self {
        match megabytes {
            Some(mb) if mb.is_finite() && mb > 0.0 => Self((mb * BYTES_PER_MEGABYTE).ceil() as u64),
            _ => Self::UNBOUNDED,
        }
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn is_unbounded(self) -> bool {
        self.0 == 0
    }

    /// The ceiling in bytes, or `None` when unbounded.
    pub const fn limit(self) -> Option<u64> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0)
        }
    }

    /// Lowest positive ceiling of the two; unbounded only if both are.
    pub fn tightest(self, other: Self) -> Self {
        match (self.limit(), other.limit()) {
            (Some(a), Some(b)) => Self(a.min(b)),
            (Some(_), None) => self,
            (None, _) => other,
        }
    }
}

impl fmt::Display for ByteCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit() {
            Some(bytes) => write!(f, "{bytes} bytes"),
            None => f.write_str("unbounded"),
        }
    }
}

/// Base location a quota domain lives under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPath {
    /// Platform cache directory (`~/.cache` on Linux).
    #[default]
    Cache,
    /// Platform data directory.
    Data,
    /// Platform config directory.
    Config,
    /// User documents directory.
    Documents,
    /// Explicit directory.
    Custom(PathBuf),
}

impl SearchPath {
    /// Resolve the base directory.
    pub fn resolve(&self) -> StowageResult<PathBuf> {
        let base = match self {
            Self::Cache => dirs::cache_dir(),
            Self::Data => dirs::data_dir(),
            Self::Config => dirs::config_dir(),
            Self::Documents => dirs::document_dir(),
            Self::Custom(path) => Some(path.clone()),
        };
        base.ok_or_else(|| StowageError::Resolution {
            message: format!("could not determine {self} directory"),
        })
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => f.write_str("cache"),
            Self::Data => f.write_str("data"),
            Self::Config => f.write_str("config"),
            Self::Documents => f.write_str("documents"),
            Self::Custom(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for SearchPath {
    type Err = StowageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache" => Ok(Self::Cache),
            "data" => Ok(Self::Data),
            "config" => Ok(Self::Config),
            "documents" => Ok(Self::Documents),
            other => Err(StowageError::Config {
                message: format!(
                    "unknown search path '{other}' (expected cache, data, config or documents)"
                ),
            }),
        }
    }
}

/// Configuration for one file-backed tiered cache service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StowageConfig {
    /// Quota domain name.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Base location of the domain.
    #[serde(default)]
    pub search_path: SearchPath,

    /// Explicit base directory; overrides `search_path`.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Domain ceiling in megabytes.
    #[serde(default)]
    pub domain_limit_mb: Option<f64>,

    /// Sub-domain name.
    #[serde(default = "default_sub_domain")]
    pub sub_domain: String,

    /// Sub-domain ceiling in megabytes.
    #[serde(default)]
    pub sub_domain_limit_mb: Option<f64>,

    /// Volatile cache ceiling in megabytes.
    #[serde(default)]
    pub cache_limit_mb: Option<f64>,
}

fn default_domain() -> String {
    "default".to_string()
}

fn default_sub_domain() -> String {
    "items".to_string()
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            search_path: SearchPath::default(),
            root: None,
            domain_limit_mb: None,
            sub_domain: default_sub_domain(),
            sub_domain_limit_mb: None,
            cache_limit_mb: None,
        }
    }
}

fn env_mb(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl StowageConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `STOWAGE_DOMAIN` | Quota domain name |
    /// | `STOWAGE_SEARCH_PATH` | `cache`, `data`, `config` or `documents` |
    /// | `STOWAGE_ROOT` | Explicit base directory |
    /// | `STOWAGE_DOMAIN_LIMIT_MB` | Domain ceiling |
    /// | `STOWAGE_SUB_DOMAIN` | Sub-domain name |
    /// | `STOWAGE_SUB_DOMAIN_LIMIT_MB` | Sub-domain ceiling |
    /// | `STOWAGE_CACHE_LIMIT_MB` | Volatile cache ceiling |
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self {
            domain: std::env::var("STOWAGE_DOMAIN").unwrap_or_else(|_| default_domain()),
            search_path: std::env::var("STOWAGE_SEARCH_PATH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            root: std::env::var_os("STOWAGE_ROOT").map(PathBuf::from),
            domain_limit_mb: env_mb("STOWAGE_DOMAIN_LIMIT_MB"),
            sub_domain: std::env::var("STOWAGE_SUB_DOMAIN").unwrap_or_else(|_| default_sub_domain()),
            sub_domain_limit_mb: env_mb("STOWAGE_SUB_DOMAIN_LIMIT_MB"),
            cache_limit_mb: env_mb("STOWAGE_CACHE_LIMIT_MB"),
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> StowageResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| StowageError::Config {
            message: format!("invalid stowage config: {e}"),
        })
    }

    /// Strict validation used by tools that refuse hazardous setups
    /// instead of warning about them.
    pub fn validate(&self) -> StowageResult<()> {
        if sanitize(&self.domain).is_empty() {
            return Err(StowageError::Config {
                message: format!("domain name {:?} is empty after sanitization", self.domain),
            });
        }
        if sanitize(&self.sub_domain).is_empty() {
            return Err(StowageError::Config {
                message: format!(
                    "sub-domain name {:?} is empty after sanitization",
                    self.sub_domain
                ),
            });
        }
        for (name, value) in [
            ("domain_limit_mb", self.domain_limit_mb),
            ("sub_domain_limit_mb", self.sub_domain_limit_mb),
            ("cache_limit_mb", self.cache_limit_mb),
        ] {
            if let Some(mb) = value {
                if !mb.is_finite() || mb < 0.0 {
                    return Err(StowageError::Config {
                        message: format!("{name} must be a non-negative number, got {mb}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Effective base location.
    pub fn location(&self) -> SearchPath {
        match &self.root {
            Some(root) => SearchPath::Custom(root.clone()),
            None => self.search_path.clone(),
        }
    }

    pub fn quota_domain(&self) -> QuotaDomain {
        QuotaDomain::new(&self.domain, self.location())
            .with_ceiling(ByteCeiling::from_megabytes(self.domain_limit_mb))
    }

    pub fn sub_domain(&self) -> SubDomain {
        self.quota_domain().sub_domain(
            &self.sub_domain,
            ByteCeiling::from_megabytes(self.sub_domain_limit_mb),
        )
    }

    pub fn volatile_ceiling(&self) -> ByteCeiling {
        ByteCeiling::from_megabytes(self.cache_limit_mb)
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_sub_domain(mut self, sub_domain: impl Into<String>) -> Self {
        self.sub_domain = sub_domain.into();
        self
    }

    pub fn with_search_path(mut self, search_path: SearchPath) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_domain_limit_mb(mut self, mb: f64) -> Self {
        self.domain_limit_mb = Some(mb);
        self
    }

    pub fn with_sub_domain_limit_mb(mut self, mb: f64) -> Self {
        self.sub_domain_limit_mb = Some(mb);
        self
    }

    pub fn with_cache_limit_mb(mut self, mb: f64) -> Self {
        self.cache_limit_mb = Some(mb);
        self
    }
}
