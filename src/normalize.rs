//! Normalization of raw upstream items into canonical [`Record`]s.
//!
//! Each source family has its own field vocabulary; this module resolves
//! it once into the typed [`RecordDetails`] variant so that nothing
//! downstream handles loosely-typed payloads.
//!
//! Rules shared by every source:
//! - the identity key is derived deterministically from an identity-bearing
//!   field; a payload without one fails with [`Error::Normalization`]
//! - dates and years in any representation coerce to a single `i32` year
//! - the payload is preserved verbatim in `raw_payload`
//! - placeholder strings (`""`, `"N/A"`) count as absent

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::models::{RawRecord, Record, RecordDetails, SourceKind};

/// Normalize a [`RawRecord`] using its own source tag.
pub fn normalize_raw(raw: &RawRecord) -> Result<Record> {
    normalize(&raw.payload, raw.source)
}

/// Map one upstream payload from `source` onto a canonical [`Record`].
pub fn normalize(payload: &Value, source: SourceKind) -> Result<Record> {
    if !payload.is_object() {
        return Err(Error::Normalization {
            kind: source,
            message: "payload is not a JSON object".to_string(),
        });
    }

    let mut record = match source {
        SourceKind::Pubmed => normalize_pubmed(payload)?,
        SourceKind::Arxiv => normalize_arxiv(payload)?,
        SourceKind::NihReporter => normalize_nih(payload)?,
        SourceKind::ScholarProfile => normalize_scholar(payload)?,
        SourceKind::Linkedin | SourceKind::Indeed => normalize_job(payload, source)?,
    };

    let identity_key = record.identity_key.trim().to_string();
    if identity_key.is_empty() {
        return Err(missing_identity(source));
    }
    record.identity_key = identity_key;
    record.source = source;
    record.raw_payload = payload.to_string();
    Ok(record)
}

fn missing_identity(source: SourceKind) -> Error {
    Error::Normalization {
        kind: source,
        message: "no identity-bearing field present".to_string(),
    }
}

fn blank(source: SourceKind, identity_key: String, details: RecordDetails) -> Record {
    Record {
        source,
        identity_key,
        title: None,
        summary: None,
        year: None,
        url: None,
        details,
        raw_payload: String::new(),
    }
}

// ============ Per-source mappings ============

fn normalize_pubmed(p: &Value) -> Result<Record> {
    let pmid = text(p, &["uid", "pmid"]).ok_or_else(|| missing_identity(SourceKind::Pubmed))?;

    let doi = text(p, &["doi"]).or_else(|| {
        p.get("articleids")?
            .as_array()?
            .iter()
            .find(|a| a.get("idtype").and_then(Value::as_str) == Some("doi"))
            .and_then(|a| text(a, &["value"]))
    });

    let mut record = blank(
        SourceKind::Pubmed,
        pmid.clone(),
        RecordDetails::Literature {
            authors: names(p.get("authors"), "name"),
            venue: text(p, &["fulljournalname", "journal", "source"]),
            doi,
            citations: None,
        },
    );
    record.title = text(p, &["title"]);
    record.summary = text(p, &["abstract"]);
    record.year = ["pubdate", "sortpubdate", "epubdate", "year", "date"]
        .iter()
        .find_map(|k| p.get(*k).and_then(coerce_year));
    record.url = text(p, &["url"])
        .or_else(|| Some(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid)));
    Ok(record)
}

fn normalize_arxiv(p: &Value) -> Result<Record> {
    let entry_id = text(p, &["id", "url"]);
    let arxiv_id = text(p, &["arxiv_id"])
        .or_else(|| entry_id.as_deref().and_then(arxiv_id_from_entry))
        .ok_or_else(|| missing_identity(SourceKind::Arxiv))?;

    let mut record = blank(
        SourceKind::Arxiv,
        strip_arxiv_version(&arxiv_id).to_string(),
        RecordDetails::Literature {
            authors: names(p.get("authors"), "name"),
            venue: text(p, &["primary_category"]).map(|c| format!("arXiv ({})", c)),
            doi: text(p, &["doi"]),
            citations: None,
        },
    );
    record.title = text(p, &["title"]);
    record.summary = text(p, &["summary", "abstract"]);
    record.year = ["published", "updated", "year"]
        .iter()
        .find_map(|k| p.get(*k).and_then(coerce_year));
    record.url = entry_id.or_else(|| Some(format!("https://arxiv.org/abs/{}", arxiv_id)));
    Ok(record)
}

/// Grants are keyed by project number, which stays stable across the
/// per-year applications (`appl_id`) of one project.
fn normalize_nih(p: &Value) -> Result<Record> {
    let project_num = text(p, &["project_num"]);
    let appl_id = text(p, &["appl_id"]);
    let key = project_num
        .clone()
        .or_else(|| appl_id.clone())
        .ok_or_else(|| missing_identity(SourceKind::NihReporter))?;

    let pi_names = names(p.get("principal_investigators"), "full_name");

    let mut record = blank(
        SourceKind::NihReporter,
        key,
        RecordDetails::Grant {
            project_num,
            amount: number(p.get("award_amount")),
            pi_names,
            organization: p.get("organization").and_then(|o| text(o, &["org_name"])),
            agency: p
                .get("agency_ic_admin")
                .and_then(|a| text(a, &["abbreviation"])),
            activity_code: text(p, &["activity_code"]),
        },
    );
    record.title = text(p, &["project_title", "title"]);
    record.summary = text(p, &["abstract_text", "abstract"]);
    record.year = ["fiscal_year", "project_start_date", "award_notice_date"]
        .iter()
        .find_map(|k| p.get(*k).and_then(coerce_year));
    record.url = appl_id.map(|id| format!("https://reporter.nih.gov/project-details/{}", id));
    Ok(record)
}

fn normalize_scholar(p: &Value) -> Result<Record> {
    let key = text(p, &["citation_id", "scholar_url"])
        .ok_or_else(|| missing_identity(SourceKind::ScholarProfile))?;

    let mut record = blank(
        SourceKind::ScholarProfile,
        key,
        RecordDetails::Literature {
            authors: names(p.get("authors"), "name"),
            venue: text(p, &["venue"]),
            doi: None,
            citations: number(p.get("citations")).map(|c| c as i64),
        },
    );
    record.title = text(p, &["title"]);
    record.year = p.get("year").and_then(coerce_year);
    record.url = text(p, &["scholar_url"]);
    Ok(record)
}

fn normalize_job(p: &Value, source: SourceKind) -> Result<Record> {
    // Both job boards share one vocabulary.
    let url = text(p, &["job_url", "url"]);
    let key = text(p, &["id", "job_id"])
        .or_else(|| url.clone())
        .ok_or_else(|| missing_identity(source))?;

    let mut record = blank(
        source,
        key,
        RecordDetails::Job {
            company: text(p, &["company"]),
            location: text(p, &["location"]),
            salary_min: number(p.get("salary_min")).or_else(|| number(p.get("min_amount"))),
            salary_max: number(p.get("salary_max")).or_else(|| number(p.get("max_amount"))),
            currency: text(p, &["salary_currency", "currency"]),
            is_remote: p.get("is_remote").and_then(Value::as_bool).unwrap_or(false),
        },
    );
    record.title = text(p, &["title"]);
    record.summary = text(p, &["description"]);
    record.year = p.get("date_posted").and_then(coerce_year);
    record.url = url;
    Ok(record)
}

// ============ Field helpers ============

/// First present, non-placeholder string among `keys`. Numbers are
/// rendered as strings so numeric ids (e.g. `appl_id`) work as keys.
fn text(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match v.get(*k)? {
        Value::String(s) => clean(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn clean(s: &str) -> Option<String> {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || collapsed.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(collapsed)
    }
}

fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace([',', '$'], "").trim().parse().ok(),
        _ => None,
    }
}

/// Names from an array of objects (`[{"name": ..}]`), an array of strings,
/// or a single `;`/`,`-separated string.
fn names(v: Option<&Value>, field: &str) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => clean(s),
                Value::Object(_) => text(item, &[field, "name"]),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => {
            let sep = if s.contains(';') { ';' } else { ',' };
            s.split(sep).filter_map(clean).collect()
        }
        _ => Vec::new(),
    }
}

fn year_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:^|\D)(1[5-9]\d{2}|2\d{3})(?:\D|$)").ok())
        .as_ref()
}

/// Coerce an upstream date/year value to a year.
///
/// Accepts integers (`2023`), numeric strings, ISO dates
/// (`2023-05-01T00:00:00Z`), and free-form dates (`2023 May 12`,
/// `May 2023`). Anything without a plausible four-digit year is `None`.
pub fn coerce_year(v: &Value) -> Option<i32> {
    match v {
        Value::Number(n) => {
            let y = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            (1500..=2999).contains(&y).then_some(y as i32)
        }
        Value::String(s) => year_pattern()?
            .captures(s.trim())
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}

/// `http://arxiv.org/abs/2301.07041v2` → `2301.07041v2`;
/// old-style `http://arxiv.org/abs/hep-th/9901001v1` → `hep-th/9901001v1`.
fn arxiv_id_from_entry(entry: &str) -> Option<String> {
    let rest = entry.split("/abs/").nth(1).unwrap_or(entry);
    clean(rest.trim_end_matches('/'))
}

fn strip_arxiv_version(id: &str) -> &str {
    match id.rfind('v') {
        Some(pos)
            if pos + 1 < id.len()
                && id[pos + 1..].chars().all(|c| c.is_ascii_digit())
                && id[..pos].ends_with(|c: char| c.is_ascii_digit()) =>
        {
            &id[..pos]
        }
        _ => id,
    }
}
