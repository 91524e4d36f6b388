//! Extension traits for source adapters.
//!
//! A [`SourceAdapter`] knows how to fetch one page of raw records from one
//! upstream system. Everything that is the same for every source
//! (pagination, limits, page ceilings, retries, deadlines) lives in the
//! [`fetch`](crate::fetch) driver, so an adapter only speaks its wire format.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             AdapterRegistry              │
//! │  ┌────────┐ ┌───────┐ ┌─────┐ ┌────────┐ │
//! │  │ PubMed │ │ arXiv │ │ NIH │ │Scholar │ │
//! │  └────────┘ └───────┘ └─────┘ └────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     fetch::fetch() → normalize → aggregate()
//! ```
//!
//! # Usage
//!
//! ```rust
//! use research_harness::traits::AdapterRegistry;
//!
//! let mut adapters = AdapterRegistry::new();
//! // adapters.register(std::sync::Arc::new(MyAdapter::new()));
//! assert!(adapters.is_empty());
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::SourceError;
use crate::models::{RawRecord, SourceKind};

/// Position of the page being requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page number.
    pub page: u32,
    /// Upstream items consumed by earlier pages (the upstream offset).
    pub offset: usize,
    /// Records wanted on this page; never more than the remaining limit.
    pub page_size: usize,
}

/// One page of upstream results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Upstream items this page advanced past, including any the adapter
    /// dropped before building `records`.
    pub consumed: usize,
    /// Whether the upstream reports further pages.
    pub has_more: bool,
}

impl Page {
    /// A page where every upstream item became a record.
    pub fn new(records: Vec<RawRecord>, has_more: bool) -> Self {
        Self {
            consumed: records.len(),
            records,
            has_more,
        }
    }

    /// Override the upstream item count when the adapter skipped some.
    pub fn consumed(mut self, consumed: usize) -> Self {
        self.consumed = consumed.max(self.records.len());
        self
    }
}

/// A source adapter that produces raw records for a query.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use research_harness::error::SourceError;
/// use research_harness::models::SourceKind;
/// use research_harness::traits::{Page, PageRequest, SourceAdapter};
///
/// struct EmptyAdapter;
///
/// #[async_trait]
/// impl SourceAdapter for EmptyAdapter {
///     fn source(&self) -> SourceKind { SourceKind::Arxiv }
///     fn description(&self) -> &str { "always empty" }
///     fn page_size(&self) -> usize { 10 }
///     fn max_pages(&self) -> u32 { 1 }
///
///     async fn fetch_page(&self, _q: &str, _p: &PageRequest) -> Result<Page, SourceError> {
///         Ok(Page::default())
///     }
/// }
/// ```
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source this adapter speaks for.
    fn source(&self) -> SourceKind;

    /// One-line description shown by `rsh sources`.
    fn description(&self) -> &str;

    /// Preferred records per upstream request.
    fn page_size(&self) -> usize;

    /// Hard ceiling on pages per fetch.
    fn max_pages(&self) -> u32;

    /// Retries per page after the first attempt.
    fn max_retries(&self) -> u32 {
        3
    }

    /// Base delay for exponential backoff between retries.
    fn backoff_base(&self) -> std::time::Duration {
        std::time::Duration::from_millis(500)
    }

    /// Default deadline for a whole fetch when the caller gives none.
    fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    /// Fetch a single page. Rate limiting happens inside the adapter's
    /// client; retries are the driver's job.
    async fn fetch_page(&self, query: &str, page: &PageRequest) -> Result<Page, SourceError>;
}

/// Registry of adapters keyed by source.
///
/// Registering a second adapter for a source replaces the first.
pub struct AdapterRegistry {
    adapters: BTreeMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in PubMed, arXiv, NIH RePORTER,
    /// and Scholar adapters configured from `config`.
    ///
    /// An adapter whose HTTP client cannot be built is left out and logged.
    pub fn from_config(config: &Config) -> Self {
        use crate::connector_arxiv::ArxivAdapter;
        use crate::connector_nih::NihReporterAdapter;
        use crate::connector_pubmed::PubmedAdapter;
        use crate::connector_scholar::ScholarAdapter;

        let mut registry = Self::new();
        let sources = &config.sources;

        let built: [(SourceKind, Result<Arc<dyn SourceAdapter>, SourceError>); 4] = [
            (
                SourceKind::Pubmed,
                PubmedAdapter::new(sources.settings(SourceKind::Pubmed))
                    .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>),
            ),
            (
                SourceKind::Arxiv,
                ArxivAdapter::new(sources.settings(SourceKind::Arxiv))
                    .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>),
            ),
            (
                SourceKind::NihReporter,
                NihReporterAdapter::new(sources.settings(SourceKind::NihReporter))
                    .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>),
            ),
            (
                SourceKind::ScholarProfile,
                ScholarAdapter::new(sources.settings(SourceKind::ScholarProfile))
                    .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>),
            ),
        ];

        for (kind, adapter) in built {
            match adapter {
                Ok(adapter) => registry.register(adapter),
                Err(e) => tracing::warn!(source = %kind, error = %e, "adapter unavailable"),
            }
        }

        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    /// Remove the adapter for `source`, returning it if present.
    pub fn unregister(&mut self, source: SourceKind) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.remove(&source)
    }

    pub fn get(&self, source: SourceKind) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source).cloned()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.values()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
