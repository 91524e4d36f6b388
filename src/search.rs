//! Query service: result shaping and pagination over [`Store::query`].
//!
//! Results are sorted by year (newest first, undated last), then title
//! (case-insensitive, untitled last), then stored id, so equal keys still
//! come back in a stable order. An `offset` past the end yields an empty
//! page, not an error.

use serde::Serialize;
use std::cmp::Ordering;

use crate::error::Result;
use crate::models::StoredRecord;
use crate::store::{Store, StoreQuery};

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: StoreQuery,
    pub offset: usize,
    /// `None` returns everything after `offset`.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    /// Matches before pagination.
    pub total: usize,
    pub offset: usize,
    pub results: Vec<StoredRecord>,
}

pub async fn search(store: &Store, request: &SearchRequest) -> Result<SearchPage> {
    let records = store.query(&request.query).await?;
    let page = shape(records, request.offset, request.limit);
    tracing::debug!(
        path = %store.path().display(),
        total = page.total,
        returned = page.results.len(),
        "search"
    );
    Ok(page)
}

/// Sort and slice `records`.
pub fn shape(mut records: Vec<StoredRecord>, offset: usize, limit: Option<usize>) -> SearchPage {
    records.sort_by(compare);
    let total = records.len();
    let results = records
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    SearchPage {
        total,
        offset,
        results,
    }
}

fn compare(a: &StoredRecord, b: &StoredRecord) -> Ordering {
    let year = match (a.record.year, b.record.year) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    let title = match (&a.record.title, &b.record.title) {
        (Some(x), Some(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    year.then(title).then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, RecordDetails, SourceKind};

    fn stored(id: &str, year: Option<i32>, title: Option<&str>) -> StoredRecord {
        StoredRecord {
            id: id.to_string(),
            record: Record {
                source: SourceKind::Pubmed,
                identity_key: id.to_string(),
                title: title.map(str::to_string),
                summary: None,
                year,
                url: None,
                details: RecordDetails::Literature {
                    authors: vec![],
                    venue: None,
                    doi: None,
                    citations: None,
                },
                raw_payload: "{}".to_string(),
            },
            tags: vec![],
            note: None,
            status: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn ids(page: &SearchPage) -> Vec<&str> {
        page.results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_sort_year_desc_then_title() {
        let page = shape(
            vec![
                stored("a", Some(2020), Some("Zeta")),
                stored("b", None, Some("Alpha")),
                stored("c", Some(2023), Some("beta")),
                stored("d", Some(2023), Some("Alpha")),
                stored("e", Some(2020), None),
            ],
            0,
            None,
        );
        assert_eq!(ids(&page), vec!["d", "c", "a", "e", "b"]);
        assert_eq!(page.total, 5);
    }

    #[test]
    fn test_ties_break_on_id() {
        let page = shape(
            vec![stored("y", Some(2021), Some("Same")), stored("x", Some(2021), Some("Same"))],
            0,
            None,
        );
        assert_eq!(ids(&page), vec!["x", "y"]);
    }

    #[test]
    fn test_pagination_boundaries() {
        let records: Vec<_> = (0..5)
            .map(|i| stored(&format!("r{}", i), Some(2000 + i), Some("t")))
            .collect();

        let page = shape(records.clone(), 1, Some(2));
        assert_eq!(ids(&page), vec!["r3", "r2"]);

        let page = shape(records.clone(), 4, Some(10));
        assert_eq!(ids(&page), vec!["r0"]);

        let page = shape(records.clone(), 5, Some(10));
        assert!(page.results.is_empty());
        assert_eq!(page.total, 5);

        let page = shape(records, 100, None);
        assert!(page.results.is_empty());
    }

    #[test]
    fn test_zero_limit_is_empty() {
        let page = shape(vec![stored("a", None, None)], 0, Some(0));
        assert!(page.results.is_empty());
        assert_eq!(page.total, 1);
    }
}
