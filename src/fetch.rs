//! Pagination driver shared by every source adapter.
//!
//! [`fetch`] pulls pages from a [`SourceAdapter`] until one of:
//!
//! 1. `limit` records are collected → `Complete`
//! 2. the upstream reports no more pages (or a page consumed nothing) → `Complete`
//! 3. the adapter's page ceiling is reached → `Partial(PageCeiling)`
//! 4. a page fails after its retries, or the deadline passes → `Partial`
//!    with whatever was gathered, or `Failed` if nothing was
//!
//! A fetch never errors: the outcome always carries the records gathered
//! so far plus a [`FetchStatus`] the caller can inspect. A fresh call
//! starts again from page zero.
//!
//! The upstream offset is a cursor over items the source returned, not
//! over records kept: an adapter that skips an unusable item still
//! reports it in [`Page::consumed`], so the next page starts after it.
//!
//! # Retry Strategy
//!
//! Retryable page errors (network, 429, 5xx) are retried up to
//! `max_retries` times with exponential backoff: base, 2×base, 4×base, …
//! capped at 2^5 × base. A retry whose backoff would overrun the deadline
//! is not attempted.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::models::{RawRecord, SourceKind};
use crate::traits::{Page, PageRequest, SourceAdapter};

/// Why a fetch stopped before it was exhausted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    PageCeiling,
    Timeout,
    SourceError(String),
}

/// Per-source completion status of one fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Complete,
    Partial { reason: PartialReason },
    Failed { message: String },
}

impl FetchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FetchStatus::Complete => "complete",
            FetchStatus::Partial { .. } => "partial",
            FetchStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, FetchStatus::Complete)
    }
}

/// Records gathered by one fetch, plus how the fetch ended.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub source: SourceKind,
    pub records: Vec<RawRecord>,
    pub pages: u32,
    pub status: FetchStatus,
}

enum Interrupt {
    Timeout,
    Source(SourceError),
}

/// Fetch up to `limit` raw records for `query` from `adapter`.
///
/// `timeout` bounds the whole fetch, rate-limit waits included; `None`
/// uses the adapter's default.
pub async fn fetch(
    adapter: &dyn SourceAdapter,
    query: &str,
    limit: usize,
    timeout: Option<Duration>,
) -> FetchOutcome {
    let source = adapter.source();
    let deadline = Instant::now() + timeout.unwrap_or_else(|| adapter.default_timeout());
    let page_size = adapter.page_size().max(1);
    let max_pages = adapter.max_pages();

    let mut records: Vec<RawRecord> = Vec::new();
    let mut pages = 0u32;
    let mut cursor = 0usize;

    let status = loop {
        if records.len() >= limit {
            break FetchStatus::Complete;
        }
        if pages >= max_pages {
            tracing::info!(%source, pages, collected = records.len(), "page ceiling reached");
            break FetchStatus::Partial {
                reason: PartialReason::PageCeiling,
            };
        }

        let request = PageRequest {
            page: pages,
            offset: cursor,
            page_size: page_size.min(limit - records.len()),
        };

        match fetch_page_with_retry(adapter, query, &request, deadline).await {
            Ok(page) => {
                pages += 1;
                let consumed = page.consumed.max(page.records.len());
                cursor += consumed;
                let remaining = limit - records.len();
                records.extend(page.records.into_iter().take(remaining));
                tracing::debug!(%source, page = request.page, consumed, cursor, "page fetched");

                if !page.has_more || consumed == 0 {
                    break FetchStatus::Complete;
                }
            }
            Err(interrupt) => {
                let reason = match interrupt {
                    Interrupt::Timeout => PartialReason::Timeout,
                    Interrupt::Source(e) => PartialReason::SourceError(e.message),
                };
                tracing::warn!(%source, page = request.page, collected = records.len(), ?reason, "fetch interrupted");
                break if records.is_empty() {
                    FetchStatus::Failed {
                        message: match reason {
                            PartialReason::Timeout => "timed out".to_string(),
                            PartialReason::SourceError(m) => m,
                            PartialReason::PageCeiling => "page ceiling reached".to_string(),
                        },
                    }
                } else {
                    FetchStatus::Partial { reason }
                };
            }
        }
    };

    FetchOutcome {
        source,
        records,
        pages,
        status,
    }
}

async fn fetch_page_with_retry(
    adapter: &dyn SourceAdapter,
    query: &str,
    request: &PageRequest,
    deadline: Instant,
) -> Result<Page, Interrupt> {
    let mut last_err = None;

    for attempt in 0..=adapter.max_retries() {
        if attempt > 0 {
            let delay = backoff_delay(adapter.backoff_base(), attempt);
            if Instant::now() + delay >= deadline {
                return Err(Interrupt::Timeout);
            }
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout_at(deadline, adapter.fetch_page(query, request)).await {
            Err(_) => return Err(Interrupt::Timeout),
            Ok(Ok(page)) => return Ok(page),
            Ok(Err(e)) if e.retryable => {
                tracing::warn!(
                    source = %adapter.source(),
                    page = request.page,
                    attempt,
                    error = %e,
                    "page request failed, retrying"
                );
                last_err = Some(e);
            }
            Ok(Err(e)) => return Err(Interrupt::Source(e)),
        }
    }

    Err(Interrupt::Source(last_err.unwrap_or_else(|| {
        SourceError::permanent("page request failed after retries")
    })))
}

/// Exponential backoff: base, 2×base, 4×base, … (capped at 2^5).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << (attempt.saturating_sub(1)).min(5))
}
