use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use stowage::{ByteCeiling, ByteStore, FsByteStore, StowageError};

use super::super::args::{TargetArgs, UsageArgs};
use crate::exit_codes::SUCCESS;

#[derive(Debug, Serialize)]
pub struct DomainUsage {
    pub domain: String,
    pub location: PathBuf,
    /// Every item under the domain, sub-domains included.
    pub size: u64,
    pub sub_domains: Vec<SubDomainUsage>,
}

#[derive(Debug, Serialize)]
pub struct SubDomainUsage {
    pub name: String,
    pub size: u64,
    pub items: usize,
}

impl fmt::Display for DomainUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "domain {} ({})", self.domain, self.location.display())?;
        writeln!(f, "  size: {} bytes", self.size)?;
        for sub in &self.sub_domains {
            writeln!(
                f,
                "  sub-domain {}: {} items, {} bytes",
                sub.name, sub.items, sub.size
            )?;
        }
        Ok(())
    }
}

/// Fresh scan of the target. A requested sub-domain that does not exist is
/// `NotFound`; a missing domain is empty.
pub async fn collect(target: &TargetArgs, store: &dyn ByteStore) -> anyhow::Result<DomainUsage> {
    let domain = target.quota_domain()?;
    let location = domain.resolve_root()?;

    let names = match target.sub_domain(&domain)? {
        Some(sub) => {
            if !store.exists(&sub.resolve_root()?).await {
                return Err(StowageError::NotFound {
                    boundary: domain.to_string(),
                    key: sub.name().to_string(),
                }
                .into());
            }
            vec![sub.name().to_string()]
        }
        None => {
            let mut names: Vec<String> = store
                .enumerate(&location)
                .await?
                .into_iter()
                .filter(|item| item.is_dir && item.path.parent() == Some(location.as_path()))
                .filter_map(|item| {
                    item.path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .collect();
            names.sort();
            names
        }
    };

    let mut sub_domains = Vec::with_capacity(names.len());
    for name in names {
        let sub = domain.sub_domain(&name, ByteCeiling::UNBOUNDED);
        let items = store.enumerate(&sub.resolve_root()?).await?;
        let files: Vec<_> = items.iter().filter(|item| !item.is_dir).collect();
        sub_domains.push(SubDomainUsage {
            name,
            size: files.iter().map(|item| item.size).sum(),
            items: files.len(),
        });
    }

    Ok(DomainUsage {
        domain: domain.name().to_string(),
        size: domain.current_size(store).await?,
        location,
        sub_domains,
    })
}

pub async fn run(args: UsageArgs) -> anyhow::Result<i32> {
    let usage = collect(&args.target, &FsByteStore::new()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
    } else {
        print!("{usage}");
    }
    Ok(SUCCESS)
}
