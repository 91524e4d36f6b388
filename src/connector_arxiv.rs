//! arXiv adapter (Atom query API).
//!
//! Requests `query?search_query=all:<terms>&start=<offset>&max_results=<n>`
//! and lifts each Atom `<entry>` into a JSON object:
//!
//! ```json
//! {"id": "...", "title": "...", "summary": "...", "published": "...",
//!  "updated": "...", "authors": ["..."], "doi": "...",
//!  "primary_category": "cs.LG", "pdf_url": "..."}
//! ```
//!
//! arXiv reports query errors as a single entry whose id points at
//! `/api/errors`; those become permanent source errors.

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::config::SourceSettings;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::models::{RawRecord, SourceKind};
use crate::traits::{Page, PageRequest, SourceAdapter};

pub struct ArxivAdapter {
    settings: SourceSettings,
    client: SourceClient,
}

impl ArxivAdapter {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let client = SourceClient::new(&settings)?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    fn description(&self) -> &str {
        "arXiv preprints via the Atom query API"
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
        let body = self
            .client
            .send_text(self.client.get("query").query(&[
                ("search_query", search_query(query)),
                ("start", page.offset.to_string()),
                ("max_results", page.page_size.to_string()),
                ("sortBy", "relevance".to_string()),
            ]))
            .await?;

        let feed = parse_feed(&body)?;
        let received = feed.entries.len();
        let has_more = match feed.total {
            Some(total) => page.offset + received < total,
            None => received >= page.page_size,
        };

        Ok(Page::new(
            feed.entries
                .into_iter()
                .map(|e| RawRecord::new(SourceKind::Arxiv, e))
                .collect(),
            has_more,
        ))
    }
}

/// `crispr gene editing` → `all:crispr AND all:gene AND all:editing`.
fn search_query(query: &str) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("all:{}", t))
        .collect();
    if terms.is_empty() {
        "all:*".to_string()
    } else {
        terms.join(" AND ")
    }
}

#[derive(Debug, Default)]
struct Feed {
    total: Option<usize>,
    entries: Vec<Value>,
}

fn parse_feed(xml: &str) -> Result<Feed, SourceError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = Feed::default();
    let mut entry: Option<Map<String, Value>> = None;
    let mut authors: Vec<Value> = Vec::new();
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                match name.as_str() {
                    "entry" => {
                        entry = Some(Map::new());
                        authors.clear();
                    }
                    "id" | "title" | "summary" | "published" | "updated" | "doi" | "name"
                    | "journal_ref" | "comment" | "totalResults" => {
                        field = Some(name);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(current) = entry.as_mut() {
                    read_empty_element(&e, current)?;
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| SourceError::permanent(format!("invalid Atom text: {}", e)))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(t)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if field.as_deref() == Some(name.as_str()) {
                    let value = std::mem::take(&mut text);
                    match (entry.as_mut(), name.as_str()) {
                        (None, "totalResults") => feed.total = value.trim().parse().ok(),
                        (Some(_), "name") => authors.push(Value::String(value)),
                        (Some(current), _) => {
                            current.insert(name, Value::String(value));
                        }
                        (None, _) => {}
                    }
                    field = None;
                } else if name == "entry" {
                    if let Some(mut current) = entry.take() {
                        check_error_entry(&current)?;
                        current.insert("authors".to_string(), Value::Array(authors.clone()));
                        feed.entries.push(Value::Object(current));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::permanent(format!(
                    "invalid Atom feed at {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(feed)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// `<arxiv:primary_category term=".."/>` and `<link title="pdf" href=".."/>`.
fn read_empty_element(e: &BytesStart<'_>, entry: &mut Map<String, Value>) -> Result<(), SourceError> {
    let attr = |key: &str| -> Result<Option<String>, SourceError> {
        match e.try_get_attribute(key) {
            Ok(Some(a)) => a
                .unescape_value()
                .map(|v| Some(v.into_owned()))
                .map_err(|err| SourceError::permanent(format!("invalid attribute: {}", err))),
            Ok(None) => Ok(None),
            Err(err) => Err(SourceError::permanent(format!("invalid attribute: {}", err))),
        }
    };

    match local_name(e).as_str() {
        "primary_category" => {
            if let Some(term) = attr("term")? {
                entry.insert("primary_category".to_string(), json!(term));
            }
        }
        "link" => {
            if attr("title")?.as_deref() == Some("pdf") {
                if let Some(href) = attr("href")? {
                    entry.insert("pdf_url".to_string(), json!(href));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_error_entry(entry: &Map<String, Value>) -> Result<(), SourceError> {
    let is_error = entry
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| id.contains("/api/errors"));
    if is_error {
        let message = entry
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(SourceError::permanent(format!("arXiv query error: {}", message)));
    }
    Ok(())
}
