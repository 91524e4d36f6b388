//! Core data models used throughout the harness.
//!
//! These types represent the raw upstream items, the canonical records
//! they normalize into, and the stored rows returned by the query path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Upstream system a record came from.
///
/// | Variant | Role |
/// |---------|------|
/// | `Pubmed` | literature API A |
/// | `Arxiv` | literature API B |
/// | `NihReporter` | grants registry |
/// | `ScholarProfile` | author-profile scraper |
/// | `Linkedin` | job board A |
/// | `Indeed` | job board B |
///
/// Deserialization goes through [`FromStr`], so import envelopes accept the
/// same aliases as the `--source` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum SourceKind {
    Pubmed,
    Arxiv,
    NihReporter,
    ScholarProfile,
    Linkedin,
    Indeed,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Pubmed,
        SourceKind::Arxiv,
        SourceKind::NihReporter,
        SourceKind::ScholarProfile,
        SourceKind::Linkedin,
        SourceKind::Indeed,
    ];

    /// Stable label stored in the `records.source` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pubmed => "pubmed",
            SourceKind::Arxiv => "arxiv",
            SourceKind::NihReporter => "nih-reporter",
            SourceKind::ScholarProfile => "scholar-profile",
            SourceKind::Linkedin => "linkedin",
            SourceKind::Indeed => "indeed",
        }
    }

    /// The logical database this source's records are persisted in.
    pub fn database(&self) -> Database {
        match self {
            SourceKind::Pubmed | SourceKind::Arxiv | SourceKind::ScholarProfile => {
                Database::Papers
            }
            SourceKind::NihReporter => Database::Grants,
            SourceKind::Linkedin | SourceKind::Indeed => Database::Jobs,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pubmed" | "literature-a" => Ok(SourceKind::Pubmed),
            "arxiv" | "literature-b" => Ok(SourceKind::Arxiv),
            "nih" | "nih-reporter" | "grants-registry" => Ok(SourceKind::NihReporter),
            "scholar" | "scholar-profile" | "profile-scrape" => Ok(SourceKind::ScholarProfile),
            "linkedin" | "job-board-a" => Ok(SourceKind::Linkedin),
            "indeed" | "job-board-b" => Ok(SourceKind::Indeed),
            other => Err(Error::ConstraintViolation(format!(
                "unknown source '{}'. Available: pubmed, arxiv, nih, scholar, linkedin, indeed",
                other
            ))),
        }
    }
}

impl TryFrom<String> for SourceKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// One store file per logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Papers,
    Grants,
    Jobs,
}

impl Database {
    pub const ALL: [Database; 3] = [Database::Papers, Database::Grants, Database::Jobs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Database::Papers => "papers",
            Database::Grants => "grants",
            Database::Jobs => "jobs",
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Database {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "papers" => Ok(Database::Papers),
            "grants" => Ok(Database::Grants),
            "jobs" => Ok(Database::Jobs),
            other => Err(Error::ConstraintViolation(format!(
                "unknown database '{}'. Available: papers, grants, jobs",
                other
            ))),
        }
    }
}

/// Raw item produced by a source adapter before normalization.
///
/// `payload` is the upstream record as captured (JSON responses verbatim;
/// XML and HTML sources are lifted into a JSON object field by field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: SourceKind,
    pub payload: serde_json::Value,
}

impl RawRecord {
    pub fn new(source: SourceKind, payload: serde_json::Value) -> Self {
        Self { source, payload }
    }
}

/// Source-family specific fields, resolved once by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetails {
    Literature {
        authors: Vec<String>,
        venue: Option<String>,
        doi: Option<String>,
        citations: Option<i64>,
    },
    Grant {
        /// Funder project number, e.g. `5R01CA123456-03`.
        #[serde(default)]
        project_num: Option<String>,
        amount: Option<f64>,
        pi_names: Vec<String>,
        organization: Option<String>,
        agency: Option<String>,
        activity_code: Option<String>,
    },
    Job {
        company: Option<String>,
        location: Option<String>,
        salary_min: Option<f64>,
        salary_max: Option<f64>,
        currency: Option<String>,
        is_remote: bool,
    },
}

/// Canonical normalized record: one paper, grant, or job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source: SourceKind,
    pub identity_key: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub year: Option<i32>,
    pub url: Option<String>,
    pub details: RecordDetails,
    /// Upstream payload kept verbatim for audit.
    pub raw_payload: String,
}

impl Record {
    /// Award amount; only grants carry one.
    pub fn amount(&self) -> Option<f64> {
        match &self.details {
            RecordDetails::Grant { amount, .. } => *amount,
            _ => None,
        }
    }

    /// `(min, max)` salary bounds; only job postings carry them.
    pub fn salary_range(&self) -> Option<(Option<f64>, Option<f64>)> {
        match &self.details {
            RecordDetails::Job {
                salary_min,
                salary_max,
                ..
            } => Some((*salary_min, *salary_max)),
            _ => None,
        }
    }

    /// Posting location; only job postings carry one.
    pub fn location(&self) -> Option<&str> {
        match &self.details {
            RecordDetails::Job { location, .. } => location.as_deref(),
            _ => None,
        }
    }

    pub fn identity(&self) -> (SourceKind, &str) {
        (self.source, &self.identity_key)
    }
}

/// Where a job posting stands in the application pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    New,
    Saved,
    Applied,
    Interviewing,
    Offer,
    Rejected,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::New,
        JobStatus::Saved,
        JobStatus::Applied,
        JobStatus::Interviewing,
        JobStatus::Offer,
        JobStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Saved => "saved",
            JobStatus::Applied => "applied",
            JobStatus::Interviewing => "interviewing",
            JobStatus::Offer => "offer",
            JobStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| {
                Error::ConstraintViolation(format!(
                    "unknown job status '{}'. Available: new, saved, applied, interviewing, offer, rejected",
                    wanted
                ))
            })
    }
}

/// A record as persisted in a store, with its organization metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: String,
    #[serde(flatten)]
    pub record: Record,
    pub tags: Vec<String>,
    pub note: Option<String>,
    /// Application status; set for job postings only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    pub created_at: i64,
    pub updated_at: i64,
}

const MAX_TAG_LEN: usize = 64;

/// Case-normalize a tag name.
///
/// Trims, lowercases, and collapses inner whitespace. Rejects empty names,
/// names longer than 64 characters, and names containing commas or control
/// characters.
pub fn normalize_tag(name: &str) -> Result<String> {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let normalized = collapsed.to_lowercase();

    if normalized.is_empty() {
        return Err(Error::ConstraintViolation("tag name is empty".to_string()));
    }
    if normalized.chars().count() > MAX_TAG_LEN {
        return Err(Error::ConstraintViolation(format!(
            "tag '{}' exceeds {} characters",
            normalized, MAX_TAG_LEN
        )));
    }
    if normalized.chars().any(|c| c == ',' || c.is_control()) {
        return Err(Error::ConstraintViolation(format!(
            "tag '{}' contains a comma or control character",
            normalized
        )));
    }

    Ok(normalized)
}
