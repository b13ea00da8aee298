use stowage::{ByteStore, FsByteStore, StowageError};
use tracing::info;

use super::super::args::{ClearArgs, TargetArgs};
use crate::exit_codes::SUCCESS;

/// Remove the target directory. Returns what was removed and how many bytes
/// it held.
pub async fn clear(target: &TargetArgs, store: &dyn ByteStore) -> anyhow::Result<(String, u64)> {
    let domain = target.quota_domain()?;
    let (label, root) = match target.sub_domain(&domain)? {
        Some(sub) => (format!("sub-domain {sub}"), sub.resolve_root()?),
        None => (format!("domain {domain}"), domain.resolve_root()?),
    };

    if !store.exists(&root).await {
        return Err(StowageError::NotFound {
            boundary: domain.to_string(),
            key: target.sub_domain.clone().unwrap_or_default(),
        }
        .into());
    }

    let size = store.total_size(&root).await?;
    store.remove_dir_all(&root).await?;
    info!(path = %root.display(), bytes = size, "cleared");
    Ok((label, size))
}

pub async fn run(args: ClearArgs) -> anyhow::Result<i32> {
    let (label, size) = clear(&args.target, &FsByteStore::new()).await?;
    println!("cleared {label} ({size} bytes)");
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage::{Blob, ByteCeiling, DurableTier, FileTier, QuotaDomain, SearchPath};

    fn target(root: &std::path::Path, sub_domain: Option<&str>) -> TargetArgs {
        TargetArgs {
            domain: "media".to_string(),
            sub_domain: sub_domain.map(str::to_string),
            search_path: SearchPath::Cache,
            root: Some(root.to_path_buf()),
        }
    }

    #[tokio::test]
    async fn test_clear_sub_domain_keeps_siblings() {
        let temp_dir = tempfile::tempdir().unwrap();
        let domain = QuotaDomain::new("media", SearchPath::Custom(temp_dir.path().to_path_buf()));
        let images = FileTier::new(domain.sub_domain("images", ByteCeiling::UNBOUNDED));
        let thumbs = FileTier::new(domain.sub_domain("thumbs", ByteCeiling::UNBOUNDED));
        images.write(Blob(vec![0; 100]), "a").await.unwrap();
        thumbs.write(Blob(vec![0; 10]), "a").await.unwrap();

        let (label, size) = clear(&target(temp_dir.path(), Some("images")), &FsByteStore::new())
            .await
            .unwrap();

        assert_eq!(label, "sub-domain media/images");
        assert_eq!(size, 100);
        assert!(DurableTier::<Blob>::read(&images, "a")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(DurableTier::<Blob>::read(&thumbs, "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_missing_target_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = clear(&target(temp_dir.path(), None), &FsByteStore::new())
            .await
            .unwrap_err();
        assert_eq!(crate::exit_codes::for_error(&err), crate::exit_codes::NOT_AVAILABLE);
    }
}
