//! Ingestion service.
//!
//! Takes aggregator output (or imported raw items), normalizes anything not
//! yet normalized, upserts each record, and attaches the requested tags.
//! One bad record never aborts the batch: it is reported in
//! [`IngestReport::skipped`] and the rest continue. Only an unreachable
//! store fails the whole call.
//!
//! [`Library`] routes records to the papers, grants, or jobs store by
//! source, opening each store file the first time it is needed.

use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::OnceCell;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::models::{normalize_tag, Database, RawRecord, Record, SourceKind, StoredRecord};
use crate::normalize::normalize_raw;
use crate::store::Store;

/// One item of an ingestion batch.
#[derive(Debug, Clone)]
pub enum IngestItem {
    Raw(RawRecord),
    Normalized(Record),
}

impl IngestItem {
    pub fn source(&self) -> SourceKind {
        match self {
            IngestItem::Raw(raw) => raw.source,
            IngestItem::Normalized(record) => record.source,
        }
    }
}

impl From<RawRecord> for IngestItem {
    fn from(raw: RawRecord) -> Self {
        IngestItem::Raw(raw)
    }
}

impl From<Record> for IngestItem {
    fn from(record: Record) -> Self {
        IngestItem::Normalized(record)
    }
}

/// An item that was not stored, or not fully tagged, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    /// Position in the input batch.
    pub index: usize,
    pub source: SourceKind,
    pub identity_key: Option<String>,
    pub reason: String,
}

/// A stored item and the row id it landed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredItem {
    pub index: usize,
    pub id: String,
    pub inserted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedTag {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: Vec<SkippedItem>,
    /// Stored but the requested tags could not be attached.
    pub untagged: Vec<SkippedItem>,
    /// Requested tags that failed validation and were applied to nothing.
    pub rejected_tags: Vec<RejectedTag>,
    /// Stored items in input order.
    pub stored: Vec<StoredItem>,
}

impl IngestReport {
    pub fn stored_count(&self) -> usize {
        self.inserted + self.updated
    }

    /// Row id of the item at input position `index`, if it was stored.
    pub fn id_of(&self, index: usize) -> Option<&str> {
        self.stored
            .iter()
            .find(|s| s.index == index)
            .map(|s| s.id.as_str())
    }

    fn merge(&mut self, other: IngestReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped.extend(other.skipped);
        self.untagged.extend(other.untagged);
        self.stored.extend(other.stored);
    }
}

/// Split requested tags into valid normalized names and rejections.
fn validate_tags(tags: &[String]) -> (Vec<String>, Vec<RejectedTag>) {
    let mut valid: Vec<String> = Vec::new();
    let mut rejected = Vec::new();
    for name in tags {
        match normalize_tag(name) {
            Ok(tag) if !valid.contains(&tag) => valid.push(tag),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(tag = %name, error = %e, "rejecting tag");
                rejected.push(RejectedTag {
                    name: name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (valid, rejected)
}

/// Ingest `items` into `store`, attaching `tags` to every stored record.
pub async fn ingest(store: &Store, items: Vec<IngestItem>, tags: &[String]) -> Result<IngestReport> {
    let (valid, rejected_tags) = validate_tags(tags);
    let mut report = ingest_indexed(store, items.into_iter().enumerate(), &valid).await?;
    report.rejected_tags = rejected_tags;
    Ok(report)
}

async fn ingest_indexed(
    store: &Store,
    items: impl IntoIterator<Item = (usize, IngestItem)>,
    tags: &[String],
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    for (index, item) in items {
        let source = item.source();
        let record = match item {
            IngestItem::Normalized(record) => record,
            IngestItem::Raw(raw) => match normalize_raw(&raw) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(index, %source, error = %e, "skipping item");
                    report.skipped.push(SkippedItem {
                        index,
                        source,
                        identity_key: None,
                        reason: e.to_string(),
                    });
                    continue;
                }
            },
        };

        let outcome = match store.upsert(&record).await {
            Ok(outcome) => outcome,
            Err(e @ Error::StoreUnavailable { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(index, %source, identity_key = %record.identity_key, error = %e, "skipping item");
                report.skipped.push(SkippedItem {
                    index,
                    source,
                    identity_key: Some(record.identity_key.clone()),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if outcome.is_inserted() {
            report.inserted += 1;
        } else {
            report.updated += 1;
        }
        tracing::debug!(%source, identity_key = %record.identity_key, id = outcome.id(), inserted = outcome.is_inserted(), "record stored");

        if !tags.is_empty() {
            if let Err(e) = store.attach_tags(outcome.id(), tags).await {
                tracing::warn!(%source, identity_key = %record.identity_key, error = %e, "tagging failed");
                report.untagged.push(SkippedItem {
                    index,
                    source,
                    identity_key: Some(record.identity_key.clone()),
                    reason: e.to_string(),
                });
            }
        }
        report.stored.push(StoredItem {
            index,
            id: outcome.id().to_string(),
            inserted: outcome.is_inserted(),
        });
    }

    Ok(report)
}

/// The papers, grants, and jobs stores, opened on first use.
pub struct Library {
    config: StoreConfig,
    papers: OnceCell<Store>,
    grants: OnceCell<Store>,
    jobs: OnceCell<Store>,
}

impl Library {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            papers: OnceCell::new(),
            grants: OnceCell::new(),
            jobs: OnceCell::new(),
        }
    }

    /// The store for `database`, opening (and migrating) it if needed.
    pub async fn store(&self, database: Database) -> Result<&Store> {
        self.cell(database)
            .get_or_try_init(|| Store::open(self.config.path_for(database)))
            .await
    }

    fn cell(&self, database: Database) -> &OnceCell<Store> {
        match database {
            Database::Papers => &self.papers,
            Database::Grants => &self.grants,
            Database::Jobs => &self.jobs,
        }
    }

    /// Ingest a mixed batch, routing each item to its source's database.
    /// Skipped indexes refer to positions in `items`.
    pub async fn ingest(&self, items: Vec<IngestItem>, tags: &[String]) -> Result<IngestReport> {
        let (valid, rejected_tags) = validate_tags(tags);

        let mut groups: BTreeMap<&'static str, (Database, Vec<(usize, IngestItem)>)> = BTreeMap::new();
        for (index, item) in items.into_iter().enumerate() {
            let database = item.source().database();
            groups
                .entry(database.as_str())
                .or_insert_with(|| (database, Vec::new()))
                .1
                .push((index, item));
        }

        let mut report = IngestReport::default();
        for (_, (database, group)) in groups {
            let store = self.store(database).await?;
            let part = ingest_indexed(store, group, &valid).await?;
            tracing::info!(
                database = %database,
                inserted = part.inserted,
                updated = part.updated,
                skipped = part.skipped.len(),
                "ingested"
            );
            report.merge(part);
        }

        report.stored.sort_by_key(|s| s.index);
        report.skipped.sort_by_key(|s| s.index);
        report.untagged.sort_by_key(|s| s.index);
        report.rejected_tags = rejected_tags;
        Ok(report)
    }

    /// Find the stored record with row id `id` in whichever store holds it.
    ///
    /// Only stores already open or present on disk are searched; a lookup
    /// never creates a store file.
    pub async fn locate(&self, id: &str) -> Result<(Database, StoredRecord)> {
        for database in Database::ALL {
            let opened = self.cell(database).initialized();
            if !opened && !self.config.path_for(database).exists() {
                continue;
            }
            match self.store(database).await?.get(id).await {
                Ok(record) => return Ok((database, record)),
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound(format!("record {}", id)))
    }

    /// Close every store that was opened.
    pub async fn close(&self) {
        for cell in [&self.papers, &self.grants, &self.jobs] {
            if let Some(store) = cell.get() {
                store.close().await;
            }
        }
    }
}
