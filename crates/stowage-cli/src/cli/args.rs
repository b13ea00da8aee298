use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use stowage::{QuotaDomain, SearchPath, StowageResult, SubDomain};

#[derive(Parser, Debug)]
#[command(
    name = "stowage",
    version,
    about = "Inspect, trim and clear quota-enforced storage domains"
)]
pub struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "STOWAGE_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show sizes of a domain and its sub-domains
    Usage(UsageArgs),
    /// Evict least recently used items until a ceiling holds
    Trim(TrimArgs),
    /// Delete a sub-domain, or a whole domain, with everything in it
    Clear(ClearArgs),
}

/// Which domain (and optionally sub-domain) a command works on.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Quota domain name
    #[arg(long, env = "STOWAGE_DOMAIN")]
    pub domain: String,

    /// Restrict to one sub-domain
    #[arg(long, env = "STOWAGE_SUB_DOMAIN")]
    pub sub_domain: Option<String>,

    /// Base location: cache, data, config or documents
    #[arg(long, env = "STOWAGE_SEARCH_PATH", default_value = "cache")]
    pub search_path: SearchPath,

    /// Explicit base directory; overrides --search-path
    #[arg(long, env = "STOWAGE_ROOT")]
    pub root: Option<PathBuf>,
}

impl TargetArgs {
    pub fn location(&self) -> SearchPath {
        match &self.root {
            Some(root) => SearchPath::Custom(root.clone()),
            None => self.search_path.clone(),
        }
    }

    /// The domain, rejecting names that sanitize to nothing.
    pub fn quota_domain(&self) -> StowageResult<QuotaDomain> {
        let domain = QuotaDomain::new(&self.domain, self.location());
        domain.resolve_root()?;
        Ok(domain)
    }

    /// The named sub-domain, if one was given.
    pub fn sub_domain(&self, domain: &QuotaDomain) -> StowageResult<Option<SubDomain>> {
        let Some(name) = &self.sub_domain else {
            return Ok(None);
        };
        let sub_domain = domain.sub_domain(name, stowage::ByteCeiling::UNBOUNDED);
        sub_domain.resolve_root()?;
        Ok(Some(sub_domain))
    }
}

#[derive(Args, Debug, Clone)]
pub struct UsageArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TrimArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Ceiling to trim down to, in megabytes
    #[arg(long)]
    pub limit_mb: f64,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_usage_defaults() {
        let cli = parse(&["stowage", "usage", "--domain", "media"]);
        assert_eq!(cli.log_format, LogFormat::Text);
        let Command::Usage(args) = cli.cmd else {
            panic!("expected usage");
        };
        assert_eq!(args.target.domain, "media");
        assert_eq!(args.target.search_path, SearchPath::Cache);
        assert!(args.target.sub_domain.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_root_overrides_search_path() {
        let cli = parse(&[
            "stowage",
            "trim",
            "--domain",
            "media",
            "--search-path",
            "data",
            "--root",
            "/srv/store",
            "--limit-mb",
            "2.5",
        ]);
        let Command::Trim(args) = cli.cmd else {
            panic!("expected trim");
        };
        assert_eq!(
            args.target.location(),
            SearchPath::Custom(PathBuf::from("/srv/store"))
        );
        assert!((args.limit_mb - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_global_log_format() {
        let cli = parse(&[
            "stowage",
            "clear",
            "--domain",
            "media",
            "--sub-domain",
            "thumbs",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.cmd, Command::Clear(_)));
    }

    #[test]
    fn test_rejects_unknown_search_path() {
        assert!(Cli::try_parse_from([
            "stowage",
            "usage",
            "--domain",
            "media",
            "--search-path",
            "desktop"
        ])
        .is_err());
    }

    #[test]
    fn test_trim_requires_limit() {
        assert!(Cli::try_parse_from(["stowage", "trim", "--domain", "media"]).is_err());
    }

    #[test]
    fn test_empty_domain_name_is_rejected() {
        let cli = parse(&["stowage", "usage", "--domain", "!!!", "--root", "/tmp"]);
        let Command::Usage(args) = cli.cmd else {
            panic!("expected usage");
        };
        assert!(args.target.quota_domain().is_err());
    }
}
