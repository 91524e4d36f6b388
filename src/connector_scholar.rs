//! Google Scholar author-profile adapter.
//!
//! The query is a Scholar user id (`qc6CJjYAAAAJ`) or a profile URL
//! containing `user=`. Pages come from
//! `citations?user=<id>&hl=en&cstart=<offset>&pagesize=<n>`; each
//! `tr.gsc_a_tr` row becomes one raw record:
//!
//! ```json
//! {"citation_id": "...", "title": "...", "authors": "...", "venue": "...",
//!  "year": 2016, "citations": 42, "scholar_url": "..."}
//! ```
//!
//! Scholar has no API, so rows are pulled out with regular expressions.
//! Further pages exist while the "Show more" button is not disabled.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::SourceSettings;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::models::{RawRecord, SourceKind};
use crate::traits::{Page, PageRequest, SourceAdapter};

const MAX_PAGE_SIZE: usize = 100;

pub struct ScholarAdapter {
    settings: SourceSettings,
    client: SourceClient,
}

impl ScholarAdapter {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let client = SourceClient::new(&settings)?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl SourceAdapter for ScholarAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::ScholarProfile
    }

    fn description(&self) -> &str {
        "Google Scholar author profile publications"
    }

    fn page_size(&self) -> usize {
        self.settings.page_size.min(MAX_PAGE_SIZE)
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
        let user = profile_user_id(query)?;
        let html = self
            .client
            .send_text(self.client.get("citations").query(&[
                ("user", user),
                ("hl", "en".to_string()),
                ("cstart", page.offset.to_string()),
                ("pagesize", page.page_size.to_string()),
            ]))
            .await?;

        let parsed = parse_profile_page(&html, &self.client.url(""))?;
        let has_more = parsed.more_available && !parsed.rows.is_empty();
        let records = parsed
            .rows
            .into_iter()
            .map(|row| RawRecord::new(SourceKind::ScholarProfile, row))
            .collect();
        Ok(Page::new(records, has_more).consumed(parsed.scanned))
    }
}

/// Extract the Scholar user id from a bare id or a profile URL.
fn profile_user_id(query: &str) -> Result<String, SourceError> {
    let query = query.trim();
    let id = match query.find("user=") {
        Some(pos) => query[pos + 5..].split(['&', '#']).next().unwrap_or(""),
        None => query,
    };
    if id.is_empty() || id.contains(char::is_whitespace) {
        return Err(SourceError::permanent(format!(
            "'{}' is not a Scholar user id or profile URL",
            query
        )));
    }
    Ok(id.to_string())
}

struct Patterns {
    row: Regex,
    title_link: Regex,
    href: Regex,
    gray: Regex,
    citations: Regex,
    year: Regex,
    more_button: Regex,
    citation_for_view: Regex,
    year_suffix: Regex,
    tag: Regex,
}

fn patterns() -> Result<&'static Patterns, SourceError> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                row: Regex::new(r#"(?s)<tr[^>]*class="gsc_a_tr"[^>]*>(.*?)</tr>"#).ok()?,
                title_link: Regex::new(r#"(?s)(<a[^>]*class="gsc_a_at"[^>]*>)(.*?)</a>"#).ok()?,
                href: Regex::new(r#"href="([^"]*)""#).ok()?,
                gray: Regex::new(r#"(?s)<div class="gs_gray">(.*?)</div>"#).ok()?,
                citations: Regex::new(r#"(?s)<a[^>]*class="gsc_a_ac[^"]*"[^>]*>(.*?)</a>"#).ok()?,
                year: Regex::new(r#"(?s)<span[^>]*class="gsc_a_h[^"]*"[^>]*>(\d{4})</span>"#).ok()?,
                more_button: Regex::new(r#"<button[^>]*id="gsc_bpf_more"[^>]*>"#).ok()?,
                citation_for_view: Regex::new(r"citation_for_view=([^&]+)").ok()?,
                year_suffix: Regex::new(r#"(?s)<span class="gs_oph">.*?</span>"#).ok()?,
                tag: Regex::new(r"<[^>]+>").ok()?,
            })
        })
        .as_ref()
        .ok_or_else(|| SourceError::permanent("Scholar row patterns failed to compile"))
}

#[derive(Debug, Default)]
struct ProfilePage {
    rows: Vec<Value>,
    /// Table rows seen, placeholders included; `cstart` counts these.
    scanned: usize,
    more_available: bool,
}

fn parse_profile_page(html: &str, base_url: &str) -> Result<ProfilePage, SourceError> {
    let p = patterns()?;
    let base = base_url.trim_end_matches('/');

    let mut rows = Vec::new();
    let mut scanned = 0;
    for row in p.row.captures_iter(html) {
        scanned += 1;
        let cells = &row[1];
        let mut item = Map::new();

        if let Some(link) = p.title_link.captures(cells) {
            item.insert("title".to_string(), json!(plain_text(&p.tag, &link[2])));
            if let Some(href) = p.href.captures(&link[1]) {
                let href = decode_entities(&href[1]);
                if let Some(id) = p.citation_for_view.captures(&href) {
                    item.insert("citation_id".to_string(), json!(&id[1]));
                }
                let url = if href.starts_with("http") {
                    href
                } else {
                    format!("{}/{}", base, href.trim_start_matches('/'))
                };
                item.insert("scholar_url".to_string(), json!(url));
            }
        }

        let mut grays = p.gray.captures_iter(cells);
        if let Some(authors) = grays.next() {
            item.insert("authors".to_string(), json!(plain_text(&p.tag, &authors[1])));
        }
        if let Some(venue) = grays.next() {
            let venue = p.year_suffix.replace_all(&venue[1], "");
            item.insert("venue".to_string(), json!(plain_text(&p.tag, &venue)));
        }

        if let Some(c) = p.citations.captures(cells) {
            if let Ok(n) = plain_text(&p.tag, &c[1]).parse::<i64>() {
                item.insert("citations".to_string(), json!(n));
            }
        }
        if let Some(y) = p.year.captures(cells) {
            if let Ok(n) = y[1].parse::<i32>() {
                item.insert("year".to_string(), json!(n));
            }
        }

        // Rows without a title link are placeholders ("There are no articles").
        if item.contains_key("title") {
            rows.push(Value::Object(item));
        }
    }

    let more_available = p
        .more_button
        .find(html)
        .is_some_and(|m| !m.as_str().contains("disabled"));

    Ok(ProfilePage {
        rows,
        scanned,
        more_available,
    })
}

fn plain_text(tag: &Regex, fragment: &str) -> String {
    let stripped = tag.replace_all(fragment, "");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><table id="gsc_a_t"><tbody id="gsc_a_b">
<tr class="gsc_a_tr"><td class="gsc_a_t"><a href="/citations?view_op=view_citation&amp;hl=en&amp;user=qc6CJjYAAAAJ&amp;citation_for_view=qc6CJjYAAAAJ:u5HHmVD_uO8C" class="gsc_a_at">Deep learning &amp; the brain</a><div class="gs_gray">A Author, B Author</div><div class="gs_gray">Nature 521 (7553)<span class="gs_oph">, 2015</span></div></td><td class="gsc_a_c"><a href="https://scholar.google.com/scholar?cites=1" class="gsc_a_ac gs_ibl">1234</a></td><td class="gsc_a_y"><span class="gsc_a_h gsc_a_hc gs_ibl">2015</span></td></tr>
<tr class="gsc_a_tr"><td class="gsc_a_t"><a href="/citations?view_op=view_citation&amp;citation_for_view=qc6CJjYAAAAJ:d1gkVwhDpl0C" class="gsc_a_at">Uncited work</a><div class="gs_gray">C Author</div><div class="gs_gray"></div></td><td class="gsc_a_c"><a class="gsc_a_ac gs_ibl"></a></td><td class="gsc_a_y"><span class="gsc_a_h gsc_a_hc gs_ibl"></span></td></tr>
</tbody></table>
<button type="button" id="gsc_bpf_more" class="gs_btnPD gs_in_ib gs_btn_flat"><span>Show more</span></button>
</body></html>"#;

    #[test]
    fn test_parse_profile_rows() {
        let page = parse_profile_page(PAGE, "https://scholar.google.com").unwrap();
        assert_eq!(page.rows.len(), 2);
        assert!(page.more_available);

        let first = &page.rows[0];
        assert_eq!(first["citation_id"], "qc6CJjYAAAAJ:u5HHmVD_uO8C");
        assert_eq!(first["title"], "Deep learning & the brain");
        assert_eq!(first["authors"], "A Author, B Author");
        assert_eq!(first["venue"], "Nature 521 (7553)");
        assert_eq!(first["citations"], 1234);
        assert_eq!(first["year"], 2015);
        assert!(first["scholar_url"]
            .as_str()
            .unwrap()
            .starts_with("https://scholar.google.com/citations?view_op=view_citation&hl=en"));

        let second = &page.rows[1];
        assert!(second.get("citations").is_none());
        assert!(second.get("year").is_none());
    }

    #[test]
    fn test_placeholder_rows_count_toward_the_offset() {
        let html = PAGE.replace(
            "</tbody>",
            r#"<tr class="gsc_a_tr"><td class="gsc_a_e" colspan="3">There are no articles in this profile.</td></tr></tbody>"#,
        );
        let page = parse_profile_page(&html, "https://scholar.google.com").unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.scanned, 3);
    }

    #[test]
    fn test_disabled_more_button_ends_pagination() {
        let html = PAGE.replace(
            r#"id="gsc_bpf_more" class"#,
            r#"id="gsc_bpf_more" disabled="" class"#,
        );
        let page = parse_profile_page(&html, "https://scholar.google.com").unwrap();
        assert!(!page.more_available);
    }

    #[test]
    fn test_profile_user_id_from_url_or_id() {
        assert_eq!(
            profile_user_id("https://scholar.google.com/citations?user=qc6CJjYAAAAJ&hl=en").unwrap(),
            "qc6CJjYAAAAJ"
        );
        assert_eq!(profile_user_id(" qc6CJjYAAAAJ ").unwrap(), "qc6CJjYAAAAJ");
        assert!(profile_user_id("").is_err());
        assert!(profile_user_id("deep learning").is_err());
    }
}
