use research_harness::config::StoreConfig;
use research_harness::error::Error;
use research_harness::ingest::{ingest, IngestItem, Library};
use research_harness::models::{Database, JobStatus, RawRecord, SourceKind};
use research_harness::search::{search, SearchRequest};
use research_harness::store::{Store, StoreQuery};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn open_store(tmp: &TempDir, name: &str) -> Store {
    Store::open(&tmp.path().join(name)).await.unwrap()
}

fn pubmed(uid: &str, title: &str, year: i32) -> IngestItem {
    IngestItem::from(RawRecord::new(
        SourceKind::Pubmed,
        json!({
            "uid": uid,
            "title": title,
            "pubdate": format!("{} Mar 3", year),
            "fulljournalname": "Genome Research",
            "authors": [{"name": "Doe J"}],
        }),
    ))
}

fn grant(appl_id: u64, title: &str, amount: f64) -> IngestItem {
    IngestItem::from(RawRecord::new(
        SourceKind::NihReporter,
        json!({
            "appl_id": appl_id,
            "project_num": format!("5R01CA{:06}-01", appl_id),
            "project_title": title,
            "fiscal_year": 2024,
            "award_amount": amount,
            "principal_investigators": [{"full_name": "Jane Smith"}],
        }),
    ))
}

fn job(id: &str, title: &str, min: Option<f64>, max: Option<f64>) -> IngestItem {
    IngestItem::from(RawRecord::new(
        SourceKind::Linkedin,
        json!({
            "id": id,
            "title": title,
            "company": "Acme Bio",
            "min_amount": min,
            "max_amount": max,
            "date_posted": "2025-01-10",
        }),
    ))
}

fn job_at(id: &str, title: &str, location: &str) -> IngestItem {
    IngestItem::from(RawRecord::new(
        SourceKind::Indeed,
        json!({
            "job_url": format!("https://www.indeed.com/viewjob?jk={}", id),
            "title": title,
            "company": "Acme Bio",
            "location": location,
        }),
    ))
}

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_reingest_updates_in_place_and_keeps_tags() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    let first = ingest(&store, vec![pubmed("123", "Gene drives", 2023)], &tags(&["Genomics"]))
        .await
        .unwrap();
    assert_eq!(first.inserted, 1);
    let id = first.id_of(0).unwrap().to_string();

    let second = ingest(&store, vec![pubmed("123", "Gene drives", 2024)], &[])
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(second.id_of(0), Some(id.as_str()));

    assert_eq!(store.count().await.unwrap(), 1);
    let stored = store.get(&id).await.unwrap();
    assert_eq!(stored.record.year, Some(2024));
    assert_eq!(stored.tags, vec!["genomics"]);
}

#[tokio::test]
async fn test_same_key_twice_in_one_batch_is_one_row() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    let report = ingest(
        &store,
        vec![pubmed("7", "First title", 2020), pubmed("7", "Second title", 2021)],
        &[],
    )
    .await
    .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.id_of(0), report.id_of(1));
    let found = store.find(SourceKind::Pubmed, "7").await.unwrap().unwrap();
    assert_eq!(found.record.title.as_deref(), Some("Second title"));
}

#[tokio::test]
async fn test_concurrent_upserts_of_one_key() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(open_store(&tmp, "papers.sqlite").await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            ingest(&store, vec![pubmed("42", &format!("Title {}", i), 2022)], &[])
                .await
                .unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.stored_count(), 1, "skipped: {:?}", report.skipped);
        inserted += report.inserted;
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_bad_record_is_skipped_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    let items = vec![
        pubmed("1", "Good one", 2021),
        IngestItem::from(RawRecord::new(SourceKind::Pubmed, json!({"title": "no id"}))),
        pubmed("2", "Good two", 2022),
    ];
    let report = ingest(&store, items, &tags(&["ok", "bad,tag"])).await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].index, 1);
    assert_eq!(report.rejected_tags.len(), 1);
    assert_eq!(report.rejected_tags[0].name, "bad,tag");

    let tagged = store
        .query(&StoreQuery {
            tags: tags(&["ok"]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tagged.len(), 2);
}

#[tokio::test]
async fn test_tags_are_conjunctive_and_case_normalized() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    let report = ingest(
        &store,
        vec![pubmed("1", "Alpha", 2020), pubmed("2", "Beta", 2021)],
        &tags(&["ML"]),
    )
    .await
    .unwrap();
    let alpha = report.id_of(0).unwrap().to_string();
    store.attach_tags(&alpha, &tags(&["Genomics"])).await.unwrap();
    // Re-attaching is a no-op.
    store.attach_tags(&alpha, &tags(&["genomics", "ml"])).await.unwrap();

    let both = store
        .query(&StoreQuery {
            tags: tags(&["ml", "GENOMICS"]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].id, alpha);
    assert_eq!(both[0].tags, vec!["genomics", "ml"]);

    let ml = store
        .query(&StoreQuery {
            tags: tags(&["ml"]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ml.len(), 2);

    let removed = store.detach_tags(&alpha, &tags(&["ML", "unknown"])).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.get(&alpha).await.unwrap().tags, vec!["genomics"]);

    let counts = store.list_tags().await.unwrap();
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[0].name, "genomics");
    assert_eq!(counts[0].records, 1);
    assert_eq!(counts[1].name, "ml");
    assert_eq!(counts[1].records, 1);
}

#[tokio::test]
async fn test_keyword_and_year_filters() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    ingest(
        &store,
        vec![
            pubmed("1", "CRISPR base editing in mice", 2019),
            pubmed("2", "Base editing review", 2023),
            pubmed("3", "Prime editing with CRISPR", 2024),
        ],
        &[],
    )
    .await
    .unwrap();

    let crispr_editing = store
        .query(&StoreQuery {
            keywords: Some("crispr EDITING".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(crispr_editing.len(), 2);

    let recent = store
        .query(&StoreQuery {
            keywords: Some("editing".to_string()),
            year_min: Some(2020),
            year_max: Some(2023),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].record.identity_key, "2");

    let wildcard = store
        .query(&StoreQuery {
            keywords: Some("%".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(wildcard.is_empty());

    let empty_range = store
        .query(&StoreQuery {
            year_min: Some(2025),
            year_max: Some(2020),
            ..Default::default()
        })
        .await;
    assert!(matches!(empty_range, Err(Error::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_keywords_fold_non_ascii_case() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    ingest(
        &store,
        vec![
            pubmed("1", "Émergence of ΔF508 in Ärzte cohorts", 2022),
            pubmed("2", "Unrelated cohorts", 2022),
        ],
        &[],
    )
    .await
    .unwrap();

    for term in ["émergence", "δf508", "ärzte", "ÉMERGENCE ärzte"] {
        let hits = store
            .query(&StoreQuery {
                keywords: Some(term.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1, "{}", term);
        assert_eq!(hits[0].record.identity_key, "1");
    }

    let cohorts = store
        .query(&StoreQuery {
            keywords: Some("COHORTS".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(cohorts.len(), 2);
}

#[tokio::test]
async fn test_job_status_lifecycle_and_filter() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "jobs.sqlite").await;

    let report = ingest(
        &store,
        vec![
            job_at("a", "Research scientist", "Boston, MA"),
            job_at("b", "Data engineer", "Remote"),
        ],
        &[],
    )
    .await
    .unwrap();
    let first = report.id_of(0).unwrap().to_string();
    assert_eq!(store.get(&first).await.unwrap().status, Some(JobStatus::New));

    store.set_status(&first, JobStatus::Applied).await.unwrap();

    let applied = store
        .query(&StoreQuery {
            statuses: vec![JobStatus::Applied, JobStatus::Interviewing],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].id, first);

    // Re-ingesting the posting refreshes it without resetting the status.
    ingest(&store, vec![job_at("a", "Senior research scientist", "Boston, MA")], &[])
        .await
        .unwrap();
    let refreshed = store.get(&first).await.unwrap();
    assert_eq!(refreshed.status, Some(JobStatus::Applied));
    assert_eq!(refreshed.record.title.as_deref(), Some("Senior research scientist"));

    assert!(matches!(
        store.set_status("missing", JobStatus::Offer).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_status_is_only_for_job_postings() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    let report = ingest(&store, vec![pubmed("1", "Paper", 2021)], &[])
        .await
        .unwrap();
    let id = report.id_of(0).unwrap().to_string();
    assert_eq!(store.get(&id).await.unwrap().status, None);

    assert!(matches!(
        store.set_status(&id, JobStatus::Saved).await,
        Err(Error::ConstraintViolation(_))
    ));
}

#[tokio::test]
async fn test_location_filter_is_case_insensitive_substring() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "jobs.sqlite").await;

    ingest(
        &store,
        vec![
            job_at("a", "Scientist", "San Francisco, CA"),
            job_at("b", "Scientist", "Zürich, Switzerland"),
            job("c", "Scientist", None, None),
        ],
        &[],
    )
    .await
    .unwrap();

    let sf = store
        .query(&StoreQuery {
            location: Some("san francisco".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sf.len(), 1);

    let zurich = store
        .query(&StoreQuery {
            keywords: Some("scientist".to_string()),
            location: Some("ZÜRICH".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(zurich.len(), 1);
    assert_eq!(zurich[0].record.location(), Some("Zürich, Switzerland"));
}

#[tokio::test]
async fn test_amount_filter_on_grants() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "grants.sqlite").await;

    ingest(
        &store,
        vec![
            grant(1, "Small award", 50_000.0),
            grant(2, "Medium award", 250_000.0),
            grant(3, "Large award", 2_000_000.0),
        ],
        &[],
    )
    .await
    .unwrap();

    let mid = store
        .query(&StoreQuery {
            amount_min: Some(100_000.0),
            amount_max: Some(1_000_000.0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(mid.len(), 1);
    assert_eq!(mid[0].record.amount(), Some(250_000.0));
}

#[tokio::test]
async fn test_salary_filter_uses_range_overlap() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "jobs.sqlite").await;

    ingest(
        &store,
        vec![
            job("a", "Junior scientist", Some(60_000.0), Some(80_000.0)),
            job("b", "Senior scientist", Some(140_000.0), Some(180_000.0)),
            job("c", "Staff scientist", Some(120_000.0), None),
            job("d", "Unlisted salary", None, None),
        ],
        &[],
    )
    .await
    .unwrap();

    let hits = store
        .query(&StoreQuery {
            salary_min: Some(100_000.0),
            salary_max: Some(150_000.0),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut keys: Vec<_> = hits.iter().map(|r| r.record.identity_key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["b", "c"]);
}

#[tokio::test]
async fn test_notes_replace_and_delete_cascades() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    let report = ingest(&store, vec![pubmed("9", "Noted", 2022)], &tags(&["keep"]))
        .await
        .unwrap();
    let id = report.id_of(0).unwrap().to_string();

    store.set_note(&id, "first").await.unwrap();
    store.set_note(&id, "second").await.unwrap();
    assert_eq!(store.get(&id).await.unwrap().note.as_deref(), Some("second"));

    store.delete(&id).await.unwrap();
    assert!(matches!(store.get(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(store.delete(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(
        store.set_note(&id, "late").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.attach_tags(&id, &tags(&["x"])).await,
        Err(Error::NotFound(_))
    ));
    assert!(store.list_tags().await.unwrap().is_empty());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.records, 0);
    assert_eq!(stats.notes, 0);
}

#[tokio::test]
async fn test_search_orders_and_pages() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "papers.sqlite").await;

    ingest(
        &store,
        vec![
            pubmed("1", "beta", 2021),
            pubmed("2", "Alpha", 2023),
            pubmed("3", "gamma", 2023),
            pubmed("4", "delta", 2019),
        ],
        &[],
    )
    .await
    .unwrap();

    let page = search(
        &store,
        &SearchRequest {
            query: StoreQuery::default(),
            offset: 1,
            limit: Some(2),
        },
    )
    .await
    .unwrap();

    assert_eq!(page.total, 4);
    assert_eq!(page.offset, 1);
    let titles: Vec<_> = page
        .results
        .iter()
        .map(|r| r.record.title.as_deref().unwrap_or(""))
        .collect();
    assert_eq!(titles, vec!["gamma", "beta"]);
}

#[tokio::test]
async fn test_reopen_keeps_data_and_schema() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("papers.sqlite");

    let store = Store::open(&path).await.unwrap();
    ingest(&store, vec![pubmed("1", "Persisted", 2020)], &[])
        .await
        .unwrap();
    store.close().await;

    let reopened = Store::open(&path).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unwritable_location_is_store_unavailable() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();

    let result = Store::open(&blocker.join("papers.sqlite")).await;
    assert!(matches!(result, Err(Error::StoreUnavailable { .. })));
}

#[tokio::test]
async fn test_library_routes_by_source() {
    let tmp = TempDir::new().unwrap();
    let library = Library::new(StoreConfig {
        papers: tmp.path().join("papers.sqlite"),
        grants: tmp.path().join("grants.sqlite"),
        jobs: tmp.path().join("jobs.sqlite"),
    });

    let report = library
        .ingest(
            vec![
                job("j1", "Bioinformatician", Some(90_000.0), Some(110_000.0)),
                pubmed("p1", "Paper", 2022),
                grant(77, "Grant", 300_000.0),
                IngestItem::from(RawRecord::new(SourceKind::Arxiv, json!({}))),
            ],
            &tags(&["Lab"]),
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 3);
    let stored_indexes: Vec<_> = report.stored.iter().map(|s| s.index).collect();
    assert_eq!(stored_indexes, vec![0, 1, 2]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].index, 3);

    for database in Database::ALL {
        let store = library.store(database).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1, "{} store", database);
    }

    let grant_id = report.id_of(2).unwrap();
    let (database, record) = library.locate(grant_id).await.unwrap();
    assert_eq!(database, Database::Grants);
    assert_eq!(record.tags, vec!["lab"]);

    assert!(matches!(
        library.locate("no-such-id").await,
        Err(Error::NotFound(_))
    ));
    library.close().await;
}

#[tokio::test]
async fn test_locate_does_not_create_store_files() {
    let tmp = TempDir::new().unwrap();
    let library = Library::new(StoreConfig {
        papers: tmp.path().join("papers.sqlite"),
        grants: tmp.path().join("grants.sqlite"),
        jobs: tmp.path().join("jobs.sqlite"),
    });

    let report = library
        .ingest(vec![pubmed("p1", "Paper", 2022)], &[])
        .await
        .unwrap();
    let id = report.id_of(0).unwrap().to_string();

    assert!(matches!(
        library.locate("no-such-id").await,
        Err(Error::NotFound(_))
    ));
    let (database, _) = library.locate(&id).await.unwrap();
    assert_eq!(database, Database::Papers);

    assert!(!tmp.path().join("grants.sqlite").exists());
    assert!(!tmp.path().join("jobs.sqlite").exists());
    library.close().await;
}
