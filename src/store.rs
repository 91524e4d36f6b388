//! Local store: one SQLite file holding records, tags, and notes.
//!
//! Every public operation is its own unit of consistency; callers never
//! see a multi-statement transaction.
//!
//! # Upsert
//!
//! `(source, identity_key)` carries a UNIQUE constraint. [`Store::upsert`]
//! first tries `INSERT .. ON CONFLICT DO NOTHING RETURNING id`; when the
//! key already exists it updates the mutable fields of the existing row.
//! Two concurrent upserts of the same key therefore never produce two
//! rows, and no external locking is involved.
//!
//! # Query semantics
//!
//! - keywords: every whitespace-separated term must occur in the title or
//!   the summary, compared after Unicode lowercasing
//! - location: substring of a job posting's location, compared the same way
//! - status: a job posting's application status is one of those requested
//! - tags: conjunctive; a record must carry all requested tags
//! - year / amount: inclusive bounds; records without the field never match
//! - salary: the record's `[salary_min, salary_max]` range must overlap the
//!   requested bounds
//!
//! Text predicates run after the SQL stage because SQLite's `LIKE` folds
//! ASCII case only.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{
    normalize_tag, JobStatus, Record, RecordDetails, SourceKind, StoredRecord,
};

const MAX_UPSERT_ATTEMPTS: usize = 3;

/// Separator for the aggregated tag list; tag names cannot contain it.
const TAG_SEPARATOR: char = '\u{1f}';

const SELECT_RECORDS: &str = r#"
    SELECT r.id, r.source, r.identity_key, r.title, r.summary, r.year, r.url,
           r.details_json, r.raw_payload, r.status, r.created_at, r.updated_at,
           n.body AS note,
           (SELECT GROUP_CONCAT(t.name, char(31))
              FROM record_tags rt JOIN tags t ON t.id = rt.tag_id
             WHERE rt.record_id = r.id) AS tag_list
      FROM records r
      LEFT JOIN notes n ON n.record_id = r.id
"#;

/// Result of [`Store::upsert`], carrying the stored row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(String),
    Updated(String),
}

impl UpsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Filters for [`Store::query`]. The default matches every record.
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub keywords: Option<String>,
    pub tags: Vec<String>,
    pub sources: Vec<SourceKind>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub location: Option<String>,
    pub statuses: Vec<JobStatus>,
}

impl StoreQuery {
    fn validate(&self) -> Result<()> {
        fn check<T: PartialOrd + std::fmt::Display>(
            field: &str,
            min: Option<T>,
            max: Option<T>,
        ) -> Result<()> {
            match (min, max) {
                (Some(lo), Some(hi)) if lo > hi => Err(Error::ConstraintViolation(format!(
                    "{} range is empty: min {} > max {}",
                    field, lo, hi
                ))),
                _ => Ok(()),
            }
        }
        check("year", self.year_min, self.year_max)?;
        check("amount", self.amount_min, self.amount_max)?;
        check("salary", self.salary_min, self.salary_max)
    }

    /// Keyword and location predicates, applied to rows the SQL stage kept.
    fn text_filter(&self) -> impl Fn(&StoredRecord) -> bool {
        let terms: Vec<String> = self
            .keywords
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let location = self
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_lowercase);

        move |stored: &StoredRecord| {
            let record = &stored.record;
            if !terms.is_empty() {
                let title = record.title.as_deref().unwrap_or_default().to_lowercase();
                let summary = record.summary.as_deref().unwrap_or_default().to_lowercase();
                if !terms
                    .iter()
                    .all(|t| title.contains(t.as_str()) || summary.contains(t.as_str()))
                {
                    return false;
                }
            }
            match &location {
                Some(wanted) => record
                    .location()
                    .is_some_and(|l| l.to_lowercase().contains(wanted.as_str())),
                None => true,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub records: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub path: PathBuf,
    pub records: i64,
    pub notes: i64,
    pub by_source: BTreeMap<String, i64>,
    pub by_year: BTreeMap<i32, i64>,
    pub undated: i64,
    pub tags: Vec<TagCount>,
}

pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open or create the store at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool, path).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert `record`, or refresh the mutable fields of the row already
    /// holding its `(source, identity_key)`.
    pub async fn upsert(&self, record: &Record) -> Result<UpsertOutcome> {
        let now = chrono::Utc::now().timestamp();
        let details_json = serde_json::to_string(&record.details)
            .map_err(|e| Error::ConstraintViolation(format!("unserializable details: {}", e)))?;
        let (salary_min, salary_max) = record.salary_range().unwrap_or((None, None));
        let initial_status = matches!(record.details, RecordDetails::Job { .. })
            .then_some(JobStatus::New.as_str());

        for attempt in 0..MAX_UPSERT_ATTEMPTS {
            let inserted: Option<String> = sqlx::query_scalar(
                r#"
                INSERT INTO records (id, source, identity_key, title, summary, year, url,
                                     amount, salary_min, salary_max, details_json, raw_payload,
                                     status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source, identity_key) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(record.source.as_str())
            .bind(&record.identity_key)
            .bind(&record.title)
            .bind(&record.summary)
            .bind(record.year)
            .bind(&record.url)
            .bind(record.amount())
            .bind(salary_min)
            .bind(salary_max)
            .bind(&details_json)
            .bind(&record.raw_payload)
            .bind(initial_status)
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = inserted {
                return Ok(UpsertOutcome::Inserted(id));
            }

            let updated: Option<String> = sqlx::query_scalar(
                r#"
                UPDATE records SET
                    title = ?, summary = ?, year = ?, url = ?, amount = ?,
                    salary_min = ?, salary_max = ?, details_json = ?, raw_payload = ?,
                    updated_at = ?
                WHERE source = ? AND identity_key = ?
                RETURNING id
                "#,
            )
            .bind(&record.title)
            .bind(&record.summary)
            .bind(record.year)
            .bind(&record.url)
            .bind(record.amount())
            .bind(salary_min)
            .bind(salary_max)
            .bind(&details_json)
            .bind(&record.raw_payload)
            .bind(now)
            .bind(record.source.as_str())
            .bind(&record.identity_key)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = updated {
                return Ok(UpsertOutcome::Updated(id));
            }

            // The conflicting row was deleted between the two statements.
            tracing::debug!(
                source = %record.source,
                identity_key = %record.identity_key,
                attempt,
                "upsert raced with delete, retrying"
            );
        }

        Err(Error::ConstraintViolation(format!(
            "upsert of {}/{} did not converge",
            record.source, record.identity_key
        )))
    }

    /// Union `names` into the record's tag set. All names are validated
    /// before anything is written; returns the normalized names.
    pub async fn attach_tags(&self, id: &str, names: &[String]) -> Result<Vec<String>> {
        let names = normalize_tags(names)?;

        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, id).await?;

        for name in &names {
            sqlx::query("INSERT INTO tags (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                INSERT INTO record_tags (record_id, tag_id)
                SELECT ?, id FROM tags WHERE name = ?
                ON CONFLICT(record_id, tag_id) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(names)
    }

    /// Remove `names` from the record's tag set; returns how many links
    /// were removed.
    pub async fn detach_tags(&self, id: &str, names: &[String]) -> Result<u64> {
        let names = normalize_tags(names)?;

        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, id).await?;

        let mut removed = 0;
        for name in &names {
            removed += sqlx::query(
                "DELETE FROM record_tags WHERE record_id = ? AND tag_id = (SELECT id FROM tags WHERE name = ?)",
            )
            .bind(id)
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Replace the record's note. The latest write wins.
    pub async fn set_note(&self, id: &str, text: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, id).await?;

        sqlx::query(
            r#"
            INSERT INTO notes (record_id, body, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(record_id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(text)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Move a job posting to `status`. Other records have no status.
    pub async fn set_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, id).await?;

        let updated = sqlx::query(
            r#"
            UPDATE records SET status = ?, updated_at = ?
            WHERE id = ? AND json_extract(details_json, '$.kind') = 'job'
            "#,
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(Error::ConstraintViolation(format!(
                "record {} is not a job posting and has no application status",
                id
            )));
        }

        tx.commit().await?;
        tracing::info!(id, %status, "job status updated");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<StoredRecord> {
        let sql = format!("{} WHERE r.id = ?", SELECT_RECORDS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("record {}", id)))?;
        row_to_stored(&row)
    }

    pub async fn find(&self, source: SourceKind, identity_key: &str) -> Result<Option<StoredRecord>> {
        let sql = format!("{} WHERE r.source = ? AND r.identity_key = ?", SELECT_RECORDS);
        let row = sqlx::query(&sql)
            .bind(source.as_str())
            .bind(identity_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_stored).transpose()
    }

    /// Delete a record together with its tag links and note.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(Error::NotFound(format!("record {}", id)));
        }
        tracing::info!(id, path = %self.path.display(), "record deleted");
        Ok(())
    }

    pub async fn query(&self, q: &StoreQuery) -> Result<Vec<StoredRecord>> {
        q.validate()?;
        let tags = normalize_tags(&q.tags)?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_RECORDS);
        qb.push(" WHERE 1 = 1");

        if !tags.is_empty() {
            qb.push(
                " AND r.id IN (SELECT rt.record_id FROM record_tags rt \
                 JOIN tags t ON t.id = rt.tag_id WHERE t.name IN (",
            );
            let mut names = qb.separated(", ");
            for tag in &tags {
                names.push_bind(tag.clone());
            }
            qb.push(") GROUP BY rt.record_id HAVING COUNT(DISTINCT t.id) = ")
                .push_bind(tags.len() as i64)
                .push(")");
        }

        if !q.sources.is_empty() {
            qb.push(" AND r.source IN (");
            let mut sources = qb.separated(", ");
            for source in &q.sources {
                sources.push_bind(source.as_str());
            }
            qb.push(")");
        }

        if !q.statuses.is_empty() {
            qb.push(" AND r.status IN (");
            let mut statuses = qb.separated(", ");
            for status in &q.statuses {
                statuses.push_bind(status.as_str());
            }
            qb.push(")");
        }

        if let Some(v) = q.year_min {
            qb.push(" AND r.year >= ").push_bind(v);
        }
        if let Some(v) = q.year_max {
            qb.push(" AND r.year <= ").push_bind(v);
        }
        if let Some(v) = q.amount_min {
            qb.push(" AND r.amount >= ").push_bind(v);
        }
        if let Some(v) = q.amount_max {
            qb.push(" AND r.amount <= ").push_bind(v);
        }
        if let Some(v) = q.salary_min {
            qb.push(" AND COALESCE(r.salary_max, r.salary_min) >= ").push_bind(v);
        }
        if let Some(v) = q.salary_max {
            qb.push(" AND COALESCE(r.salary_min, r.salary_max) <= ").push_bind(v);
        }

        qb.push(" ORDER BY r.created_at, r.rowid");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let keep = q.text_filter();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let stored = row_to_stored(row)?;
            if keep(&stored) {
                out.push(stored);
            }
        }
        Ok(out)
    }

    /// Tags in use, alphabetically, with the number of records carrying each.
    pub async fn list_tags(&self) -> Result<Vec<TagCount>> {
        let rows = sqlx::query(
            r#"
            SELECT t.name, COUNT(rt.record_id) AS records
            FROM tags t JOIN record_tags rt ON rt.tag_id = t.id
            GROUP BY t.id
            ORDER BY t.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TagCount {
                name: row.get("name"),
                records: row.get("records"),
            })
            .collect())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let records = self.count().await?;
        let notes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;

        let by_source = sqlx::query("SELECT source, COUNT(*) AS n FROM records GROUP BY source")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| (row.get::<String, _>("source"), row.get::<i64, _>("n")))
            .collect();

        let year_rows = sqlx::query("SELECT year, COUNT(*) AS n FROM records GROUP BY year")
            .fetch_all(&self.pool)
            .await?;
        let mut by_year = BTreeMap::new();
        let mut undated = 0;
        for row in &year_rows {
            match row.get::<Option<i32>, _>("year") {
                Some(year) => {
                    by_year.insert(year, row.get::<i64, _>("n"));
                }
                None => undated = row.get::<i64, _>("n"),
            }
        }

        Ok(StoreStats {
            path: self.path.clone(),
            records,
            notes,
            by_source,
            by_year,
            undated,
            tags: self.list_tags().await?,
        })
    }
}

async fn ensure_record(tx: &mut sqlx::Transaction<'_, Sqlite>, id: &str) -> Result<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM records WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(Error::NotFound(format!("record {}", id))),
    }
}

fn normalize_tags(names: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let tag = normalize_tag(name)?;
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    Ok(out)
}

fn decode_error(e: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Storage(sqlx::Error::Decode(Box::new(e)))
}

fn row_to_stored(row: &SqliteRow) -> Result<StoredRecord> {
    let source: String = row.try_get("source")?;
    let source: SourceKind = source.parse()?;
    let details_json: String = row.try_get("details_json")?;
    let details: RecordDetails = serde_json::from_str(&details_json).map_err(decode_error)?;

    let mut tags: Vec<String> = row
        .try_get::<Option<String>, _>("tag_list")?
        .map(|list| list.split(TAG_SEPARATOR).map(str::to_string).collect())
        .unwrap_or_default();
    tags.sort();

    let status = row
        .try_get::<Option<String>, _>("status")?
        .map(|s| s.parse::<JobStatus>())
        .transpose()?;

    Ok(StoredRecord {
        id: row.try_get("id")?,
        record: Record {
            source,
            identity_key: row.try_get("identity_key")?,
            title: row.try_get("title")?,
            summary: row.try_get("summary")?,
            year: row.try_get("year")?,
            url: row.try_get("url")?,
            details,
            raw_payload: row.try_get("raw_payload")?,
        },
        tags,
        note: row.try_get("note")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
