//! Citation formatting for stored papers and grants.
//!
//! Job postings have no citation form and are rejected.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::{Record, RecordDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationStyle {
    Apa,
    Vancouver,
}

impl FromStr for CitationStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apa" => Ok(CitationStyle::Apa),
            "vancouver" => Ok(CitationStyle::Vancouver),
            other => Err(Error::ConstraintViolation(format!(
                "unknown citation style '{}'. Available: apa, vancouver",
                other
            ))),
        }
    }
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CitationStyle::Apa => "apa",
            CitationStyle::Vancouver => "vancouver",
        })
    }
}

const VANCOUVER_MAX_AUTHORS: usize = 3;

pub fn format_citation(record: &Record, style: CitationStyle) -> Result<String> {
    let title = record.title.as_deref().unwrap_or("Untitled");
    let year = record
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "n.d.".to_string());

    match (&record.details, style) {
        (RecordDetails::Literature { authors, venue, doi, .. }, CitationStyle::Apa) => {
            let mut out = format!("{} ({}). {}.", author_list(authors, ", "), year, title);
            if let Some(venue) = venue {
                out.push_str(&format!(" {}.", venue));
            }
            match (doi, &record.url) {
                (Some(doi), _) => out.push_str(&format!(" https://doi.org/{}", doi)),
                (None, Some(url)) => out.push_str(&format!(" {}", url)),
                (None, None) => {}
            }
            Ok(out)
        }
        (RecordDetails::Literature { authors, venue, .. }, CitationStyle::Vancouver) => {
            let mut names = author_list(&authors[..authors.len().min(VANCOUVER_MAX_AUTHORS)], ", ");
            if authors.len() > VANCOUVER_MAX_AUTHORS {
                names.push_str(", et al");
            }
            let mut out = format!("{}. {}.", names, title);
            if let Some(venue) = venue {
                out.push_str(&format!(" {}.", venue));
            }
            out.push_str(&format!(" {}.", year));
            Ok(out)
        }
        (
            RecordDetails::Grant {
                project_num,
                amount,
                pi_names,
                agency,
                ..
            },
            style,
        ) => {
            let pis = author_list(pi_names, "; ");
            let agency = agency.as_deref().unwrap_or("NIH");
            let amount = amount.map(format_amount).unwrap_or_else(|| "N/A".to_string());
            let number = project_num.as_deref().unwrap_or(&record.identity_key);
            Ok(match style {
                CitationStyle::Apa => format!(
                    "{}. ({}). {} [Grant {}]. Funder: National Institutes of Health ({}). Award Amount: {}.",
                    pis, year, title, number, agency, amount
                ),
                CitationStyle::Vancouver => format!(
                    "{}. {}. Grant: {}; Funder: NIH ({}); Year: {}; Award: {}.",
                    pis, title, number, agency, year, amount
                ),
            })
        }
        (RecordDetails::Job { .. }, _) => Err(Error::ConstraintViolation(format!(
            "{}/{} is a job posting and has no citation form",
            record.source, record.identity_key
        ))),
    }
}

fn author_list(authors: &[String], separator: &str) -> String {
    if authors.is_empty() {
        "Anonymous".to_string()
    } else {
        authors.join(separator)
    }
}

/// `512345.4` → `$512,345`.
fn format_amount(amount: f64) -> String {
    let whole = amount.round() as i64;
    let digits = whole.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if whole < 0 { "-" } else { "" };
    format!("{}${}", sign, grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn paper(authors: &[&str]) -> Record {
        Record {
            source: SourceKind::Pubmed,
            identity_key: "38234567".into(),
            title: Some("CRISPR review".into()),
            summary: None,
            year: Some(2023),
            url: Some("https://pubmed.ncbi.nlm.nih.gov/38234567/".into()),
            details: RecordDetails::Literature {
                authors: authors.iter().map(|a| a.to_string()).collect(),
                venue: Some("Nature Reviews Genetics".into()),
                doi: Some("10.1038/x".into()),
                citations: None,
            },
            raw_payload: "{}".into(),
        }
    }

    #[test]
    fn test_apa_literature() {
        let citation = format_citation(&paper(&["Doe J", "Roe R"]), CitationStyle::Apa).unwrap();
        assert_eq!(
            citation,
            "Doe J, Roe R (2023). CRISPR review. Nature Reviews Genetics. https://doi.org/10.1038/x"
        );
    }

    #[test]
    fn test_vancouver_truncates_authors() {
        let citation =
            format_citation(&paper(&["A A", "B B", "C C", "D D"]), CitationStyle::Vancouver).unwrap();
        assert_eq!(
            citation,
            "A A, B B, C C, et al. CRISPR review. Nature Reviews Genetics. 2023."
        );
    }

    fn grant(project_num: Option<&str>) -> Record {
        Record {
            source: SourceKind::NihReporter,
            identity_key: "10877412".into(),
            title: Some("Tumor immunology".into()),
            summary: None,
            year: Some(2024),
            url: None,
            details: RecordDetails::Grant {
                project_num: project_num.map(str::to_string),
                amount: Some(512345.0),
                pi_names: vec!["Jane Smith".into()],
                organization: None,
                agency: Some("NCI".into()),
                activity_code: None,
            },
            raw_payload: "{}".into(),
        }
    }

    #[test]
    fn test_grant_uses_project_number() {
        assert_eq!(
            format_citation(&grant(Some("5R01CA123456-03")), CitationStyle::Apa).unwrap(),
            "Jane Smith. (2024). Tumor immunology [Grant 5R01CA123456-03]. \
             Funder: National Institutes of Health (NCI). Award Amount: $512,345."
        );
    }

    #[test]
    fn test_grant_without_project_number_cites_identity() {
        let cited = format_citation(&grant(None), CitationStyle::Vancouver).unwrap();
        assert!(cited.contains("Grant: 10877412;"), "{}", cited);
    }

    #[test]
    fn test_jobs_have_no_citation() {
        let mut record = paper(&[]);
        record.details = RecordDetails::Job {
            company: None,
            location: None,
            salary_min: None,
            salary_max: None,
            currency: None,
            is_remote: false,
        };
        assert!(matches!(
            format_citation(&record, CitationStyle::Apa),
            Err(Error::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_format_amount_groups_thousands() {
        assert_eq!(format_amount(0.0), "$0");
        assert_eq!(format_amount(999.0), "$999");
        assert_eq!(format_amount(1_250_000.0), "$1,250,000");
    }

    #[test]
    fn test_style_parsing() {
        assert_eq!("APA".parse::<CitationStyle>().unwrap(), CitationStyle::Apa);
        assert!("bibtex".parse::<CitationStyle>().is_err());
    }
}
