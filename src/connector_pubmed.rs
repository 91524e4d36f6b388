//! PubMed adapter (NCBI E-utilities).
//!
//! Each page is two requests through the same rate limiter:
//!
//! 1. `esearch.fcgi` returns the PMIDs for the page plus the total hit count
//! 2. `esummary.fcgi` returns one document summary per PMID
//!
//! Summaries are emitted in search order. PMIDs missing from the summary
//! response are skipped but still count toward the page's consumed ids, so
//! the next `retstart` follows the search list rather than the kept records.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::SourceSettings;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::models::{RawRecord, SourceKind};
use crate::traits::{Page, PageRequest, SourceAdapter};

pub struct PubmedAdapter {
    settings: SourceSettings,
    client: SourceClient,
}

impl PubmedAdapter {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let client = SourceClient::new(&settings)?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl SourceAdapter for PubmedAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Pubmed
    }

    fn description(&self) -> &str {
        "PubMed literature search via NCBI E-utilities"
    }

    fn page_size(&self) -> usize {
        self.settings.page_size
    }

    fn max_pages(&self) -> u32 {
        self.settings.max_pages
    }

    fn max_retries(&self) -> u32 {
        self.settings.max_retries
    }

    fn backoff_base(&self) -> Duration {
        self.settings.backoff_base
    }

    fn default_timeout(&self) -> Duration {
        self.settings.timeout
    }

    async fn fetch_page(&self, query: &str, page: &PageRequest) -> Result<Page, SourceError> {
        let search = self
            .client
            .send_json(self.client.get("esearch.fcgi").query(&[
                ("db", "pubmed".to_string()),
                ("term", query.to_string()),
                ("retstart", page.offset.to_string()),
                ("retmax", page.page_size.to_string()),
                ("retmode", "json".to_string()),
            ]))
            .await?;

        let (ids, total) = parse_search(&search)?;
        if ids.is_empty() {
            return Ok(Page::default());
        }

        let summary = self
            .client
            .send_json(self.client.get("esummary.fcgi").query(&[
                ("db", "pubmed".to_string()),
                ("id", ids.join(",")),
                ("retmode", "json".to_string()),
            ]))
            .await?;

        let records = parse_summaries(&summary, &ids)?;
        Ok(Page::new(records, page.offset + ids.len() < total).consumed(ids.len()))
    }
}

/// PMIDs and total hit count from an esearch response.
fn parse_search(body: &Value) -> Result<(Vec<String>, usize), SourceError> {
    let result = body
        .get("esearchresult")
        .ok_or_else(|| SourceError::permanent("esearch response missing 'esearchresult'"))?;

    if let Some(err) = result.get("ERROR").and_then(Value::as_str) {
        return Err(SourceError::permanent(format!("esearch error: {}", err)));
    }

    let ids = result
        .get("idlist")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let total = match result.get("count") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        _ => 0,
    };

    Ok((ids, total))
}

fn parse_summaries(body: &Value, ids: &[String]) -> Result<Vec<RawRecord>, SourceError> {
    let result = body
        .get("result")
        .ok_or_else(|| SourceError::permanent("esummary response missing 'result'"))?;

    Ok(ids
        .iter()
        .filter_map(|id| result.get(id))
        .filter(|doc| doc.is_object() && doc.get("error").is_none())
        .map(|doc| RawRecord::new(SourceKind::Pubmed, doc.clone()))
        .collect())
}
