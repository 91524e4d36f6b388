//! Configuration parsing and validation.
//!
//! Every section and field is optional; an absent file or section falls
//! back to the documented defaults, so the harness runs with no
//! configuration at all.
//!
//! # Example
//!
//! ```toml
//! [store]
//! papers = "./data/papers.sqlite"
//!
//! [aggregate]
//! max_concurrent_sources = 4
//!
//! [sources.nih]
//! min_interval_ms = 1000
//! max_pages = 10
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{Database, SourceKind};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Store file locations, one per logical database.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_papers_path")]
    pub papers: PathBuf,
    #[serde(default = "default_grants_path")]
    pub grants: PathBuf,
    #[serde(default = "default_jobs_path")]
    pub jobs: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            papers: default_papers_path(),
            grants: default_grants_path(),
            jobs: default_jobs_path(),
        }
    }
}

impl StoreConfig {
    pub fn path_for(&self, database: Database) -> &Path {
        match database {
            Database::Papers => &self.papers,
            Database::Grants => &self.grants,
            Database::Jobs => &self.jobs,
        }
    }
}

fn default_papers_path() -> PathBuf {
    PathBuf::from("./data/papers.sqlite")
}
fn default_grants_path() -> PathBuf {
    PathBuf::from("./data/grants.sqlite")
}
fn default_jobs_path() -> PathBuf {
    PathBuf::from("./data/jobs.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregateConfig {
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: default_max_concurrent_sources(),
        }
    }
}

fn default_max_concurrent_sources() -> usize {
    4
}

/// Per-source overrides. Unset fields take the source's own default.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceOverrides {
    pub base_url: Option<String>,
    pub min_interval_ms: Option<u64>,
    pub page_size: Option<usize>,
    pub max_pages: Option<u32>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub pubmed: SourceOverrides,
    #[serde(default)]
    pub arxiv: SourceOverrides,
    #[serde(default)]
    pub nih: SourceOverrides,
    #[serde(default)]
    pub scholar: SourceOverrides,
}

impl SourcesConfig {
    /// Resolve the effective settings for `kind`.
    ///
    /// Job boards have no live adapter; they resolve to the generic defaults.
    pub fn settings(&self, kind: SourceKind) -> SourceSettings {
        let base = SourceSettings::defaults_for(kind);
        let overrides = match kind {
            SourceKind::Pubmed => &self.pubmed,
            SourceKind::Arxiv => &self.arxiv,
            SourceKind::NihReporter => &self.nih,
            SourceKind::ScholarProfile => &self.scholar,
            SourceKind::Linkedin | SourceKind::Indeed => return base,
        };
        base.apply(overrides)
    }
}

/// Effective settings for one source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub base_url: String,
    /// Minimum interval between two requests to this source.
    pub min_interval: Duration,
    pub page_size: usize,
    /// Hard ceiling on pages per fetch; reaching it stops the fetch.
    pub max_pages: u32,
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Deadline for a whole fetch (all pages).
    pub timeout: Duration,
    /// Deadline for a single HTTP request.
    pub request_timeout: Duration,
}

impl SourceSettings {
    pub fn defaults_for(kind: SourceKind) -> Self {
        let generic = Self {
            base_url: String::new(),
            min_interval: Duration::from_millis(1000),
            page_size: 100,
            max_pages: 20,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        };

        match kind {
            // NCBI allows 3 requests/second without an API key.
            SourceKind::Pubmed => Self {
                base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
                min_interval: Duration::from_millis(340),
                ..generic
            },
            SourceKind::Arxiv => Self {
                base_url: "https://export.arxiv.org/api".to_string(),
                min_interval: Duration::from_millis(3000),
                page_size: 50,
                ..generic
            },
            // RePORTER blocks clients exceeding 1 request/second.
            SourceKind::NihReporter => Self {
                base_url: "https://api.reporter.nih.gov/v2".to_string(),
                ..generic
            },
            SourceKind::ScholarProfile => Self {
                base_url: "https://scholar.google.com".to_string(),
                min_interval: Duration::from_millis(2000),
                max_pages: 50,
                ..generic
            },
            SourceKind::Linkedin | SourceKind::Indeed => generic,
        }
    }

    fn apply(mut self, o: &SourceOverrides) -> Self {
        if let Some(url) = &o.base_url {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = o.min_interval_ms {
            self.min_interval = Duration::from_millis(ms);
        }
        if let Some(n) = o.page_size {
            self.page_size = n;
        }
        if let Some(n) = o.max_pages {
            self.max_pages = n;
        }
        if let Some(n) = o.max_retries {
            self.max_retries = n;
        }
        if let Some(ms) = o.backoff_base_ms {
            self.backoff_base = Duration::from_millis(ms);
        }
        if let Some(s) = o.timeout_secs {
            self.timeout = Duration::from_secs(s);
        }
        if let Some(s) = o.request_timeout_secs {
            self.request_timeout = Duration::from_secs(s);
        }
        self
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise return the defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.aggregate.max_concurrent_sources == 0 {
        bail!("aggregate.max_concurrent_sources must be >= 1");
    }

    for kind in [
        SourceKind::Pubmed,
        SourceKind::Arxiv,
        SourceKind::NihReporter,
        SourceKind::ScholarProfile,
    ] {
        let settings = config.sources.settings(kind);
        if settings.page_size == 0 {
            bail!("sources.{}.page_size must be > 0", kind);
        }
        if settings.max_pages == 0 {
            bail!("sources.{}.max_pages must be > 0", kind);
        }
        if settings.base_url.is_empty() {
            bail!("sources.{}.base_url must not be empty", kind);
        }
    }

    // RePORTER rejects pages larger than 500.
    if config.sources.settings(SourceKind::NihReporter).page_size > 500 {
        bail!("sources.nih.page_size must be <= 500");
    }

    Ok(())
}
