//! # Research Harness
//!
//! A local-first aggregator for research records: papers, grants, and job
//! postings pulled from heterogeneous upstream sources, normalized into one
//! record shape, and kept in tag-indexed SQLite stores.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │  Source Adapters │──▶│ Normalizer │──▶│ Aggregator│──▶│ Ingestion│
//! │ PubMed/arXiv/NIH │   └────────────┘   └───────────┘   └────┬─────┘
//! │ Scholar          │                                         ▼
//! └──────────────────┘                 ┌───────────────────────────────┐
//!                                      │ SQLite stores: papers, grants,│
//!                                      │ jobs (records, tags, notes)   │
//!                                      └──────────────┬────────────────┘
//!                                                     ▼
//!                                               ┌──────────┐
//!                                               │  Search  │
//!                                               └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rsh init
//! rsh fetch "crispr base editing" --source pubmed=20 --source arxiv=10 --tag genomics
//! rsh search crispr --tag genomics --year-min 2022
//! rsh note <id> "read this first"
//! rsh cite <id> --style vancouver
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with per-source defaults |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`normalize`] | Raw upstream item → canonical record |
//! | [`http`] | Rate-limited HTTP client shared by adapters |
//! | [`traits`] | `SourceAdapter` trait and registry |
//! | [`fetch`] | Pagination, retry, and deadline driver |
//! | [`connector_pubmed`] | PubMed adapter |
//! | [`connector_arxiv`] | arXiv adapter |
//! | [`connector_nih`] | NIH RePORTER adapter |
//! | [`connector_scholar`] | Google Scholar profile adapter |
//! | [`aggregate`] | Multi-source fan-out, merge, and dedup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Local store: upsert, tags, notes, query |
//! | [`ingest`] | Ingestion service and store routing |
//! | [`search`] | Result shaping and pagination |
//! | [`citation`] | APA / Vancouver citations |

pub mod aggregate;
pub mod citation;
pub mod config;
pub mod connector_arxiv;
pub mod connector_nih;
pub mod connector_pubmed;
pub mod connector_scholar;
pub mod db;
pub mod error;
pub mod fetch;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod search;
pub mod store;
pub mod traits;

pub use error::{Error, Result};
