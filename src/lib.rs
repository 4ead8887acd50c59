//! # sq - Swiss-Army Knife for Data
//!
//! sq queries heterogeneous data sources — relational databases
//! (PostgreSQL, MySQL, SQL Server, SQLite) and document files (CSV, TSV,
//! XLSX) — through one jq-like pipeline language or native SQL, and
//! streams typed results into pluggable writers or into another source.
//!
//! ## Query Pipeline
//!
//! ```text
//! '@sakila.actor | where(.actor_id > 2) | .first_name | .[0:10]'
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 1. COMPILE: text → tokens → arena AST               │
//! │    slq::Lexer → slq::Parser                         │
//! └─────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 2. RESOLVE: handles → sources → open databases      │
//! │    Collection + driver registry + database pool     │
//! └─────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 3. RENDER: AST → dialect-specific SQL + params      │
//! │    slq::render + per-driver overrides               │
//! └─────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 4. EXECUTE: rows stream into a RecordSink           │
//! │    driver SqlConn → typed records → writer          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Document sources take a detour first: they are detected, sampled,
//! kind-inferred, and ingested into an ephemeral scratch SQLite database,
//! after which they behave exactly like any other SQL source. The same
//! scratch machinery stages cross-source joins.
//!
//! ## Module Overview
//!
//! - [`source`]: sources, handles, the collection, schema metadata
//! - [`driver`]: the polymorphic driver layer and database pool
//! - [`dialect`]: per-driver quoting, placeholders, operators, join sets
//! - [`kind`]: semantic column kinds and sample-based detection
//! - [`slq`]: the pipeline-language compiler (lex, parse, render)
//! - [`record`]: typed records, metadata munging, sinks, batch insert
//! - [`ingest`]: document sampling, header detection, scratch ingestion
//! - [`engine`]: query orchestration across sources
//! - [`run`]: per-invocation state and the cleanup stack
//! - [`diff`]: concurrent metadata fetch + unified diff input
//! - [`cli`]: thin writers and config document for the binary

pub mod cancel;
pub mod cli;
pub mod dialect;
pub mod diff;
pub mod driver;
pub mod engine;
pub mod error;
pub mod files;
pub mod ingest;
pub mod kind;
pub mod options;
pub mod record;
pub mod run;
pub mod scratch;
pub mod slq;
pub mod source;

pub use engine::{exec_slq, exec_sql, slq_to_sql, QueryContext};
pub use run::Run;
