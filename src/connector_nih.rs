//! NIH RePORTER adapter.
//!
//! POSTs to `projects/search` with an advanced text search over project
//! terms, title, and abstract, narrowed by optional [`GrantCriteria`]
//! (investigator, organization, fiscal year, award range, activity code,
//! agency). Pagination is offset based; RePORTER caps `limit` at 500 and
//! reports the total match count in `meta.total`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::config::SourceSettings;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::models::{RawRecord, SourceKind};
use crate::traits::{Page, PageRequest, SourceAdapter};

const MAX_LIMIT: usize = 500;

/// Structured RePORTER filters applied alongside the keyword query.
///
/// An investigator or organization portfolio is a search with only
/// `pi_names` or `organizations` set and an empty keyword query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantCriteria {
    pub pi_names: Vec<String>,
    pub organizations: Vec<String>,
    pub fiscal_years: Vec<i32>,
    pub award_amount_min: Option<i64>,
    pub award_amount_max: Option<i64>,
    pub activity_codes: Vec<String>,
    pub agencies: Vec<String>,
}

impl GrantCriteria {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// RePORTER `criteria` keys for these filters.
    fn to_criteria(&self) -> Map<String, Value> {
        let mut criteria = Map::new();
        if !self.pi_names.is_empty() {
            let names: Vec<Value> = self
                .pi_names
                .iter()
                .map(|name| json!({ "any_name": name }))
                .collect();
            criteria.insert("pi_names".to_string(), Value::Array(names));
        }
        if !self.organizations.is_empty() {
            criteria.insert("org_names".to_string(), json!(self.organizations));
        }
        if !self.fiscal_years.is_empty() {
            criteria.insert("fiscal_years".to_string(), json!(self.fiscal_years));
        }
        if self.award_amount_min.is_some() || self.award_amount_max.is_some() {
            let mut range = Map::new();
            if let Some(min) = self.award_amount_min {
                range.insert("min_amount".to_string(), json!(min));
            }
            if let Some(max) = self.award_amount_max {
                range.insert("max_amount".to_string(), json!(max));
            }
            criteria.insert("award_amount_range".to_string(), Value::Object(range));
        }
        if !self.activity_codes.is_empty() {
            criteria.insert("activity_codes".to_string(), json!(self.activity_codes));
        }
        if !self.agencies.is_empty() {
            criteria.insert("agencies".to_string(), json!(self.agencies));
        }
        criteria
    }
}

pub struct NihReporterAdapter {
    settings: SourceSettings,
    client: SourceClient,
    criteria: GrantCriteria,
}

impl NihReporterAdapter {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let client = SourceClient::new(&settings)?;
        Ok(Self {
            settings,
            client,
            criteria: GrantCriteria::default(),
        })
    }

    /// Narrow every search made by this adapter.
    pub fn with_criteria(mut self, criteria: GrantCriteria) -> Self {
        self.criteria = criteria;
        self
    }
}

#[async_trait]
impl SourceAdapter for NihReporterAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::NihReporter
    }

    fn description(&self) -> &str {
        "NIH RePORTER funded projects"
    }

    fn page_size(&self) -> usize {
        self.settings.page_size.min(MAX_LIMIT)
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
        let body = search_body(query, &self.criteria, page.offset, page.page_size)?;
        let response = self
            .client
            .send_json(self.client.post("projects/search").json(&body))
            .await?;
        parse_results(&response, page.offset)
    }
}

fn search_body(
    query: &str,
    criteria: &GrantCriteria,
    offset: usize,
    limit: usize,
) -> Result<Value, SourceError> {
    let mut filters = criteria.to_criteria();
    let query = query.trim();
    if !query.is_empty() {
        filters.insert(
            "advanced_text_search".to_string(),
            json!({
                "operator": "and",
                "search_field": "projecttitle,terms,abstracttext",
                "search_text": query,
            }),
        );
    }
    // An unfiltered search would page through all of RePORTER.
    if filters.is_empty() {
        return Err(SourceError::permanent(
            "RePORTER search needs keywords or grant criteria",
        ));
    }

    Ok(json!({
        "criteria": filters,
        "offset": offset,
        "limit": limit.min(MAX_LIMIT),
        "sort_field": "fiscal_year",
        "sort_order": "desc",
    }))
}

fn parse_results(body: &Value, offset: usize) -> Result<Page, SourceError> {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::permanent("RePORTER response missing 'results'"))?;

    let total = body
        .get("meta")
        .and_then(|m| m.get("total"))
        .and_then(Value::as_u64)
        .map(|t| t as usize);

    let records: Vec<RawRecord> = results
        .iter()
        .filter(|r| r.is_object())
        .map(|r| RawRecord::new(SourceKind::NihReporter, r.clone()))
        .collect();

    let has_more = match total {
        Some(total) => offset + results.len() < total,
        None => !results.is_empty(),
    };

    Ok(Page::new(records, has_more).consumed(results.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body_caps_limit() {
        let body = search_body("tumor immunology", &GrantCriteria::default(), 1000, 900).unwrap();
        assert_eq!(body["offset"], 1000);
        assert_eq!(body["limit"], 500);
        assert_eq!(
            body["criteria"]["advanced_text_search"]["search_text"],
            "tumor immunology"
        );
    }

    #[test]
    fn test_search_body_carries_grant_criteria() {
        let criteria = GrantCriteria {
            pi_names: vec!["Jane Smith".to_string()],
            organizations: vec!["Johns Hopkins University".to_string()],
            fiscal_years: vec![2023, 2024],
            award_amount_min: Some(250_000),
            award_amount_max: None,
            activity_codes: vec!["R01".to_string()],
            agencies: vec!["NCI".to_string()],
        };
        let body = search_body("organoids", &criteria, 0, 25).unwrap();
        let c = &body["criteria"];
        assert_eq!(c["pi_names"], json!([{"any_name": "Jane Smith"}]));
        assert_eq!(c["org_names"], json!(["Johns Hopkins University"]));
        assert_eq!(c["fiscal_years"], json!([2023, 2024]));
        assert_eq!(c["award_amount_range"], json!({"min_amount": 250000}));
        assert_eq!(c["activity_codes"], json!(["R01"]));
        assert_eq!(c["agencies"], json!(["NCI"]));
        assert_eq!(c["advanced_text_search"]["search_text"], "organoids");
    }

    #[test]
    fn test_portfolio_search_omits_text_search() {
        let criteria = GrantCriteria {
            pi_names: vec!["Jane Smith".to_string()],
            ..GrantCriteria::default()
        };
        let body = search_body("  ", &criteria, 0, 25).unwrap();
        assert!(body["criteria"].get("advanced_text_search").is_none());
        assert!(!criteria.is_empty());
    }

    #[test]
    fn test_unfiltered_search_is_rejected() {
        let err = search_body("", &GrantCriteria::default(), 0, 25).unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn test_non_object_results_still_advance_the_offset() {
        let body = json!({"meta": {"total": 5}, "results": [{"appl_id": 1}, null, {"appl_id": 3}]});
        let page = parse_results(&body, 0).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.consumed, 3);
        assert!(page.has_more);
    }

    #[test]
    fn test_parse_results_has_more_from_total() {
        let body = json!({
            "meta": {"total": 3, "offset": 0, "limit": 2},
            "results": [{"appl_id": 1}, {"appl_id": 2}]
        });
        let page = parse_results(&body, 0).unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);

        let page = parse_results(&json!({"meta": {"total": 3}, "results": [{"appl_id": 3}]}), 2).unwrap();
        assert!(!page.has_more);
    }

    #[test]
    fn test_missing_results_is_permanent() {
        let err = parse_results(&json!({"error": "bad"}), 0).unwrap_err();
        assert!(!err.retryable);
    }
}
