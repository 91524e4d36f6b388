//! Multi-source aggregation.
//!
//! [`aggregate`] fans one keyword query out to the adapters named in the
//! source specs, normalizes what comes back, and merges the results.
//!
//! - Fetches run concurrently, bounded by `max_concurrent`. Each source
//!   keeps its own rate limiter, so sources never slow each other down.
//! - A failing source is recorded in its [`SourceReport`] and never stops
//!   the others.
//! - Output order is spec order, then upstream order within a source,
//!   no matter which fetch finished first.
//! - Records are deduplicated by `(source, identity_key)` across the whole
//!   call; the first occurrence wins. The same work under two different
//!   sources stays as two records.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::Error;
use crate::fetch::{fetch, FetchOutcome, FetchStatus};
use crate::models::{Record, SourceKind};
use crate::normalize::normalize_raw;
use crate::traits::AdapterRegistry;

/// One `(source, per-source limit)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpec {
    pub source: SourceKind,
    pub limit: usize,
}

impl SourceSpec {
    pub fn new(source: SourceKind, limit: usize) -> Self {
        Self { source, limit }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub max_concurrent: usize,
    /// Deadline for each source's fetch; `None` uses the adapter default.
    pub timeout: Option<Duration>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: None,
        }
    }
}

/// Outcome of one source within an aggregate call.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    pub requested: usize,
    #[serde(flatten)]
    pub status: FetchStatus,
    pub pages: u32,
    /// Raw records received from the adapter.
    pub fetched: usize,
    /// Records that normalized and survived deduplication.
    pub normalized: usize,
    /// Raw records dropped because they could not be normalized.
    pub dropped: usize,
    /// Records already seen earlier in this call.
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub records: Vec<Record>,
    pub sources: Vec<SourceReport>,
}

impl AggregateReport {
    /// Status of the first spec naming `source`.
    pub fn status(&self, source: SourceKind) -> Option<&FetchStatus> {
        self.sources
            .iter()
            .find(|s| s.source == source)
            .map(|s| &s.status)
    }

    pub fn count_by_status(&self) -> (usize, usize, usize) {
        self.sources
            .iter()
            .fold((0, 0, 0), |(c, p, f), s| match s.status {
                FetchStatus::Complete => (c + 1, p, f),
                FetchStatus::Partial { .. } => (c, p + 1, f),
                FetchStatus::Failed { .. } => (c, p, f + 1),
            })
    }
}

/// Fetch from every source in `specs` and merge the normalized records.
pub async fn aggregate(
    registry: &AdapterRegistry,
    keywords: &str,
    specs: &[SourceSpec],
    options: &AggregateOptions,
) -> AggregateReport {
    let outcomes = fetch_all(registry, keywords, specs, options).await;

    let mut seen: HashSet<(SourceKind, String)> = HashSet::new();
    let mut records = Vec::new();
    let mut sources = Vec::with_capacity(specs.len());

    for (spec, outcome) in specs.iter().zip(outcomes) {
        let mut report = SourceReport {
            source: spec.source,
            requested: spec.limit,
            status: outcome.status,
            pages: outcome.pages,
            fetched: outcome.records.len(),
            normalized: 0,
            dropped: 0,
            duplicates: 0,
        };

        for raw in &outcome.records {
            match normalize_raw(raw) {
                Ok(record) => {
                    let key = (record.source, record.identity_key.clone());
                    if seen.insert(key) {
                        report.normalized += 1;
                        records.push(record);
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    report.dropped += 1;
                    tracing::warn!(source = %spec.source, error = %e, "dropping raw record");
                }
            }
        }

        tracing::info!(
            source = %spec.source,
            status = report.status.label(),
            fetched = report.fetched,
            normalized = report.normalized,
            dropped = report.dropped,
            duplicates = report.duplicates,
            "source finished"
        );
        sources.push(report);
    }

    AggregateReport { records, sources }
}

/// Run every fetch, returning outcomes in spec order.
async fn fetch_all(
    registry: &AdapterRegistry,
    keywords: &str,
    specs: &[SourceSpec],
    options: &AggregateOptions,
) -> Vec<FetchOutcome> {
    let permits = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(specs.len());

    for spec in specs {
        let Some(adapter) = registry.get(spec.source) else {
            handles.push(None);
            continue;
        };
        let permits = permits.clone();
        let query = keywords.to_string();
        let limit = spec.limit;
        let timeout = options.timeout;

        handles.push(Some(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            fetch(adapter.as_ref(), &query, limit, timeout).await
        })));
    }

    let mut outcomes = Vec::with_capacity(specs.len());
    for (spec, handle) in specs.iter().zip(handles) {
        let outcome = match handle {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => failed(spec.source, format!("fetch task aborted: {}", e)),
            },
            None => failed(
                spec.source,
                Error::SourceUnavailable {
                    kind: spec.source,
                    message: "no adapter registered".to_string(),
                }
                .to_string(),
            ),
        };
        outcomes.push(outcome);
    }
    outcomes
}

fn failed(source: SourceKind, message: String) -> FetchOutcome {
    tracing::warn!(%source, %message, "source unavailable");
    FetchOutcome {
        source,
        records: Vec::new(),
        pages: 0,
        status: FetchStatus::Failed { message },
    }
}
