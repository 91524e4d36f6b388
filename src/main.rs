//! # Research Harness CLI (`rsh`)
//!
//! Fetch, store, organize, and search research records from the command
//! line. Every command prints JSON on stdout; logs go to stderr
//! (`RUST_LOG`, default `info`).
//!
//! ## Usage
//!
//! ```bash
//! rsh --config ./config/rsh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rsh init` | Create the papers, grants, and jobs stores |
//! | `rsh sources` | List source adapters and their limits |
//! | `rsh fetch <keywords> --source <src>=<n>` | Aggregate from sources and ingest |
//! | `rsh import <file.json>` | Ingest raw records from a JSON file |
//! | `rsh search [keywords]` | Query a store with tag and range filters |
//! | `rsh get <id>` | Show one stored record |
//! | `rsh tag <id> <tags..>` / `rsh untag` | Add or remove tags |
//! | `rsh note <id> <text>` | Replace a record's note |
//! | `rsh status <id> <state>` | Track a job application |
//! | `rsh delete <id>` | Delete a record |
//! | `rsh stats` | Per-store counts |
//! | `rsh cite <id>` | Format a citation |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use research_harness::aggregate::{aggregate, AggregateOptions, SourceSpec};
use research_harness::citation::{format_citation, CitationStyle};
use research_harness::config::{self, Config};
use research_harness::connector_nih::{GrantCriteria, NihReporterAdapter};
use research_harness::ingest::{IngestItem, Library};
use research_harness::migrate::CURRENT_SCHEMA_VERSION;
use research_harness::models::{Database, JobStatus, RawRecord, SourceKind};
use research_harness::search::{search, SearchRequest};
use research_harness::store::StoreQuery;
use research_harness::traits::AdapterRegistry;

const DEFAULT_SOURCE_LIMIT: usize = 10;

/// Research Harness: aggregate papers, grants, and job postings into local,
/// tag-indexed stores.
#[derive(Parser)]
#[command(name = "rsh", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/rsh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store files and apply schema migrations. Idempotent.
    Init,

    /// List source adapters with their effective settings.
    Sources,

    /// Fetch records for a keyword query and ingest them.
    Fetch {
        /// Keyword query sent to every source. May be omitted for an NIH
        /// portfolio search driven by `--pi` or `--org`.
        keywords: Option<String>,

        /// Source and per-source limit, e.g. `pubmed=20`. Repeatable; order
        /// is preserved in the output.
        #[arg(long = "source", value_parser = parse_source_spec, required = true)]
        sources: Vec<SourceSpec>,

        /// Tag to attach to every stored record. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Deadline for each source's fetch, overriding the configured one.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Aggregate and report without writing to the stores.
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        grants: GrantArgs,
    },

    /// Ingest raw records from a JSON array.
    ///
    /// Elements are `{"source": "...", "payload": {...}}` envelopes, or bare
    /// payload objects when `--source` is given.
    Import {
        file: PathBuf,

        #[arg(long)]
        source: Option<SourceKind>,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Set the application status of a stored job posting.
    Status { id: String, status: JobStatus },

    /// Search one store.
    Search {
        /// Every term must appear in the title or summary.
        keywords: Option<String>,

        #[arg(long, default_value = "papers")]
        db: Database,

        /// Restrict to these sources. Repeatable.
        #[arg(long = "source")]
        sources: Vec<SourceKind>,

        /// Require this tag. Repeatable; all must match.
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        year_min: Option<i32>,
        #[arg(long)]
        year_max: Option<i32>,
        #[arg(long)]
        amount_min: Option<f64>,
        #[arg(long)]
        amount_max: Option<f64>,
        #[arg(long)]
        salary_min: Option<f64>,
        #[arg(long)]
        salary_max: Option<f64>,

        /// Job location substring, case-insensitive.
        #[arg(long)]
        location: Option<String>,

        /// Job application status. Repeatable; any may match.
        #[arg(long = "status")]
        statuses: Vec<JobStatus>,

        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a stored record by id.
    Get { id: String },

    /// Attach tags to a record.
    Tag {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Remove tags from a record.
    Untag {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Replace a record's note.
    Note { id: String, text: String },

    /// Delete a record with its tags and note.
    Delete { id: String },

    /// Record, tag, and year counts.
    Stats {
        /// Limit to one store; all stores by default.
        #[arg(long)]
        db: Option<Database>,
    },

    /// Format a citation for a stored paper or grant.
    Cite {
        id: String,
        #[arg(long, default_value = "apa")]
        style: CitationStyle,
    },
}

/// NIH RePORTER filters for `rsh fetch`.
#[derive(clap::Args)]
struct GrantArgs {
    /// Principal investigator name. Repeatable.
    #[arg(long = "pi")]
    pi_names: Vec<String>,

    /// Awardee organization. Repeatable.
    #[arg(long = "org")]
    organizations: Vec<String>,

    /// Fiscal year. Repeatable.
    #[arg(long = "fiscal-year")]
    fiscal_years: Vec<i32>,

    #[arg(long)]
    award_min: Option<i64>,
    #[arg(long)]
    award_max: Option<i64>,

    /// Activity code such as R01. Repeatable.
    #[arg(long = "activity-code")]
    activity_codes: Vec<String>,

    /// Administering institute such as NCI. Repeatable.
    #[arg(long = "agency")]
    agencies: Vec<String>,
}

impl From<GrantArgs> for GrantCriteria {
    fn from(args: GrantArgs) -> Self {
        GrantCriteria {
            pi_names: args.pi_names,
            organizations: args.organizations,
            fiscal_years: args.fiscal_years,
            award_amount_min: args.award_min,
            award_amount_max: args.award_max,
            activity_codes: args.activity_codes,
            agencies: args.agencies,
        }
    }
}

/// Parse `source=limit` (limit optional).
fn parse_source_spec(s: &str) -> Result<SourceSpec, String> {
    let (name, limit) = match s.split_once('=') {
        Some((name, limit)) => {
            let limit = limit
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid limit in '{}'", s))?;
            (name, limit)
        }
        None => (s, DEFAULT_SOURCE_LIMIT),
    };
    let source = name.parse::<SourceKind>().map_err(|e| e.to_string())?;
    Ok(SourceSpec::new(source, limit))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;
    let library = Library::new(cfg.store.clone());

    let result = run(cli.command, &cfg, &library).await;
    library.close().await;
    result
}

async fn run(command: Commands, cfg: &Config, library: &Library) -> Result<()> {
    match command {
        Commands::Init => {
            let mut stores = serde_json::Map::new();
            for database in Database::ALL {
                let store = library.store(database).await?;
                stores.insert(database.to_string(), json!(store.path()));
            }
            print_json(&json!({
                "schema_version": CURRENT_SCHEMA_VERSION,
                "stores": stores,
            }))?;
        }

        Commands::Sources => {
            let registry = AdapterRegistry::from_config(cfg);
            let sources: Vec<_> = SourceKind::ALL
                .iter()
                .map(|&kind| match registry.get(kind) {
                    Some(adapter) => {
                        let settings = cfg.sources.settings(kind);
                        json!({
                            "source": kind,
                            "database": kind.database(),
                            "live": true,
                            "description": adapter.description(),
                            "base_url": settings.base_url,
                            "min_interval_ms": settings.min_interval.as_millis() as u64,
                            "page_size": adapter.page_size(),
                            "max_pages": adapter.max_pages(),
                        })
                    }
                    None => json!({
                        "source": kind,
                        "database": kind.database(),
                        "live": false,
                        "description": "import only",
                    }),
                })
                .collect();
            print_json(&sources)?;
        }

        Commands::Fetch {
            keywords,
            sources,
            tags,
            timeout_secs,
            dry_run,
            grants,
        } => {
            let mut registry = AdapterRegistry::from_config(cfg);
            let criteria = GrantCriteria::from(grants);
            if !criteria.is_empty() {
                let nih = NihReporterAdapter::new(cfg.sources.settings(SourceKind::NihReporter))?
                    .with_criteria(criteria);
                registry.register(Arc::new(nih));
            }
            let keywords = keywords.unwrap_or_default();
            let options = AggregateOptions {
                max_concurrent: cfg.aggregate.max_concurrent_sources,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let report = aggregate(&registry, &keywords, &sources, &options).await;

            if dry_run {
                print_json(&json!({
                    "records": report.records.len(),
                    "sources": report.sources,
                }))?;
                return Ok(());
            }

            let items = report
                .records
                .iter()
                .cloned()
                .map(IngestItem::from)
                .collect();
            let ingest = library.ingest(items, &tags).await?;
            print_json(&json!({
                "records": report.records.len(),
                "sources": report.sources,
                "ingest": ingest,
            }))?;
        }

        Commands::Import { file, source, tags } => {
            let items = read_import_file(&file, source)?;
            let report = library.ingest(items, &tags).await?;
            print_json(&report)?;
        }

        Commands::Status { id, status } => {
            let (database, _) = library.locate(&id).await?;
            let store = library.store(database).await?;
            store.set_status(&id, status).await?;
            print_json(&store.get(&id).await?)?;
        }

        Commands::Search {
            keywords,
            db,
            sources,
            tags,
            year_min,
            year_max,
            amount_min,
            amount_max,
            salary_min,
            salary_max,
            location,
            statuses,
            offset,
            limit,
        } => {
            let request = SearchRequest {
                query: StoreQuery {
                    keywords,
                    tags,
                    sources,
                    year_min,
                    year_max,
                    amount_min,
                    amount_max,
                    salary_min,
                    salary_max,
                    location,
                    statuses,
                },
                offset,
                limit: Some(limit),
            };
            let page = search(library.store(db).await?, &request).await?;
            print_json(&page)?;
        }

        Commands::Get { id } => {
            let (database, record) = library.locate(&id).await?;
            print_json(&json!({ "database": database, "record": record }))?;
        }

        Commands::Tag { id, tags } => {
            let (database, _) = library.locate(&id).await?;
            let store = library.store(database).await?;
            store.attach_tags(&id, &tags).await?;
            print_json(&store.get(&id).await?)?;
        }

        Commands::Untag { id, tags } => {
            let (database, _) = library.locate(&id).await?;
            let store = library.store(database).await?;
            let removed = store.detach_tags(&id, &tags).await?;
            print_json(&json!({ "removed": removed, "record": store.get(&id).await? }))?;
        }

        Commands::Note { id, text } => {
            let (database, _) = library.locate(&id).await?;
            let store = library.store(database).await?;
            store.set_note(&id, &text).await?;
            print_json(&store.get(&id).await?)?;
        }

        Commands::Delete { id } => {
            let (database, _) = library.locate(&id).await?;
            library.store(database).await?.delete(&id).await?;
            print_json(&json!({ "deleted": id, "database": database }))?;
        }

        Commands::Stats { db } => {
            let databases = match db {
                Some(db) => vec![db],
                None => Database::ALL.to_vec(),
            };
            let mut stats = serde_json::Map::new();
            for database in databases {
                let store = library.store(database).await?;
                stats.insert(database.to_string(), serde_json::to_value(store.stats().await?)?);
            }
            print_json(&stats)?;
        }

        Commands::Cite { id, style } => {
            let (_, stored) = library.locate(&id).await?;
            let citation = format_citation(&stored.record, style)?;
            print_json(&json!({ "id": id, "style": style.to_string(), "citation": citation }))?;
        }
    }

    Ok(())
}

fn read_import_file(path: &Path, source: Option<SourceKind>) -> Result<Vec<IngestItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| "Import file is not valid JSON")?;
    let serde_json::Value::Array(elements) = value else {
        bail!("Import file must contain a JSON array");
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(idx, element)| -> Result<IngestItem> {
            let raw = match source {
                Some(source) => RawRecord::new(source, element),
                None => serde_json::from_value::<RawRecord>(element).with_context(|| {
                    format!(
                        "Element {} is not a {{\"source\", \"payload\"}} envelope; pass --source for bare payloads",
                        idx
                    )
                })?,
            };
            Ok(IngestItem::from(raw))
        })
        .collect()
}
