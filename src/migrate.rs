//! Versioned schema migrations.
//!
//! The applied version lives in `PRAGMA user_version`. Pending migrations
//! run in order inside one transaction; a store written by a newer build
//! is refused rather than downgraded.

use sqlx::SqlitePool;
use std::path::Path;

use crate::error::{Error, Result};

const MIGRATIONS: &[&str] = &[
    // v1: records, tags, notes
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        identity_key TEXT NOT NULL,
        title TEXT,
        summary TEXT,
        year INTEGER,
        url TEXT,
        amount REAL,
        salary_min REAL,
        salary_max REAL,
        details_json TEXT NOT NULL DEFAULT '{}',
        raw_payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(source, identity_key)
    );

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS record_tags (
        record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (record_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS notes (
        record_id TEXT PRIMARY KEY REFERENCES records(id) ON DELETE CASCADE,
        body TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_records_year ON records(year);
    CREATE INDEX IF NOT EXISTS idx_record_tags_tag ON record_tags(tag_id);
    "#,
    // v2: numeric filter and source filter indexes
    r#"
    CREATE INDEX IF NOT EXISTS idx_records_amount ON records(amount);
    CREATE INDEX IF NOT EXISTS idx_records_salary ON records(salary_min, salary_max);
    CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
    "#,
    // v3: job application status
    r#"
    ALTER TABLE records ADD COLUMN status TEXT;
    UPDATE records SET status = 'new' WHERE json_extract(details_json, '$.kind') = 'job';
    CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
    "#,
];

pub const CURRENT_SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Bring the store at `pool` up to [`CURRENT_SCHEMA_VERSION`].
pub async fn run_migrations(pool: &SqlitePool, path: &Path) -> Result<()> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(Error::StoreUnavailable {
            path: path.to_path_buf(),
            message: format!(
                "store schema version {} is newer than supported version {}",
                version, CURRENT_SCHEMA_VERSION
            ),
        });
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        tracing::debug!(path = %path.display(), version = idx + 1, "applying migration");
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
    }
    // PRAGMA does not accept bound parameters.
    sqlx::raw_sql(&format!("PRAGMA user_version = {}", CURRENT_SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(
        path = %path.display(),
        from = version,
        to = CURRENT_SCHEMA_VERSION,
        "store schema migrated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_migrations_apply_once_and_set_version() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("papers.sqlite");
        let pool = db::connect(&path).await.unwrap();

        run_migrations(&pool, &path).await.unwrap();
        run_migrations(&pool, &path).await.unwrap();

        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["notes", "record_tags", "records", "tags"]);
    }

    #[tokio::test]
    async fn test_status_column_backfills_existing_jobs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("jobs.sqlite");
        let pool = db::connect(&path).await.unwrap();

        for sql in &MIGRATIONS[..2] {
            sqlx::raw_sql(sql).execute(&pool).await.unwrap();
        }
        sqlx::raw_sql("PRAGMA user_version = 2").execute(&pool).await.unwrap();
        sqlx::raw_sql(
            r#"
            INSERT INTO records (id, source, identity_key, details_json, raw_payload, created_at, updated_at)
            VALUES ('j1', 'indeed', 'k1', '{"kind":"job","company":null,"location":null,"salary_min":null,"salary_max":null,"currency":null,"is_remote":false}', '{}', 0, 0),
                   ('p1', 'pubmed', 'k2', '{"kind":"literature","authors":[],"venue":null,"doi":null,"citations":null}', '{}', 0, 0);
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        run_migrations(&pool, &path).await.unwrap();

        let statuses: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT id, status FROM records ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(
            statuses,
            vec![
                ("j1".to_string(), Some("new".to_string())),
                ("p1".to_string(), None)
            ]
        );
    }

    #[tokio::test]
    async fn test_newer_schema_is_refused() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("papers.sqlite");
        let pool = db::connect(&path).await.unwrap();
        sqlx::raw_sql("PRAGMA user_version = 99")
            .execute(&pool)
            .await
            .unwrap();

        let result = run_migrations(&pool, &path).await;
        assert!(matches!(result, Err(Error::StoreUnavailable { .. })));
    }
}
