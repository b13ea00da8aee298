use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use stowage::{ByteCeiling, ByteStore, EvictionEngine, FsByteStore, StowageError};
use tracing::info;

use super::super::args::{TargetArgs, TrimArgs};
use crate::exit_codes::SUCCESS;

#[derive(Debug, Serialize)]
pub struct TrimReport {
    pub boundary: PathBuf,
    pub ceiling: ByteCeiling,
    pub evicted: Vec<PathBuf>,
    pub freed: u64,
    pub available: Option<i64>,
}

impl fmt::Display for TrimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "trimmed {} to {}: evicted {} items ({} bytes)",
            self.boundary.display(),
            self.ceiling,
            self.evicted.len(),
            self.freed
        )?;
        for path in &self.evicted {
            writeln!(f, "  - {}", path.display())?;
        }
        Ok(())
    }
}

fn boundary_of(target: &TargetArgs) -> anyhow::Result<PathBuf> {
    let domain = target.quota_domain()?;
    Ok(match target.sub_domain(&domain)? {
        Some(sub) => sub.resolve_root()?,
        None => domain.resolve_root()?,
    })
}

/// Evict least recently used items under `boundary` until it holds at most
/// `ceiling` bytes.
pub async fn trim(
    boundary: &Path,
    ceiling: ByteCeiling,
    store: Arc<dyn ByteStore>,
) -> anyhow::Result<TrimReport> {
    if ceiling.is_unbounded() {
        return Err(StowageError::Config {
            message: "trim needs a positive ceiling".to_string(),
        }
        .into());
    }
    let outcome = EvictionEngine::new(store)
        .reclaim(boundary, ceiling, 0)
        .await
        .with_context(|| format!("trimming {}", boundary.display()))?;
    info!(
        boundary = %boundary.display(),
        evicted = outcome.evicted.len(),
        freed = outcome.freed,
        "trim finished"
    );
    Ok(TrimReport {
        boundary: boundary.to_path_buf(),
        ceiling,
        evicted: outcome.evicted,
        freed: outcome.freed,
        available: outcome.available,
    })
}

pub async fn run(args: TrimArgs) -> anyhow::Result<i32> {
    let ceiling = ByteCeiling::from_megabytes(Some(args.limit_mb));
    let boundary = boundary_of(&args.target)?;
    let report = trim(&boundary, ceiling, Arc::new(FsByteStore::new())).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage::{Blob, DurableTier, FileTier, QuotaDomain, SearchPath};

    #[tokio::test]
    async fn test_trim_evicts_oldest_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let domain = QuotaDomain::new("media", SearchPath::Custom(temp_dir.path().to_path_buf()));
        let tier = FileTier::new(domain.sub_domain("images", ByteCeiling::UNBOUNDED));
        for key in ["a", "b", "c", "d"] {
            tier.write(Blob(vec![0; 100]), key).await.unwrap();
        }

        let root = tier.sub_domain().resolve_root().unwrap();
        let report = trim(&root, ByteCeiling::from_bytes(250), Arc::new(FsByteStore::new()))
            .await
            .unwrap();

        assert_eq!(report.freed, 200);
        assert_eq!(report.available, Some(50));
        assert_eq!(
            report.evicted,
            vec![root.join("a.bin"), root.join("b.bin")]
        );
        assert!(DurableTier::<Blob>::read(&tier, "c").await.is_ok());
    }

    #[tokio::test]
    async fn test_trim_under_ceiling_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("stowage/media");

        let report = trim(&root, ByteCeiling::from_bytes(1_000), Arc::new(FsByteStore::new()))
            .await
            .unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(report.available, Some(1_000));
    }

    #[tokio::test]
    async fn test_trim_rejects_unbounded_ceiling() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = trim(
            temp_dir.path(),
            ByteCeiling::from_megabytes(Some(0.0)),
            Arc::new(FsByteStore::new()),
        )
        .await
        .unwrap_err();
        assert_eq!(crate::exit_codes::for_error(&err), crate::exit_codes::CONFIG_ERROR);
    }
}
