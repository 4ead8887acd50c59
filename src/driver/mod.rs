//! # Driver Layer
//!
//! Drivers make heterogeneous backends answer one uniform contract. The
//! capability set is discovered at runtime, not by inheritance:
//!
//! - [`Driver`]: everything a backend must do — validate & canonicalize a
//!   source, open it, ping it, truncate a table.
//! - [`SqlDriver`]: the extended contract for backends that speak SQL —
//!   dialect, renderer overrides, schema metadata, DDL, prepared
//!   inserts/updates.
//! - [`DocumentDriver`]: file-format backends (CSV/TSV/XLSX) that are
//!   ingested into the scratch SQLite database and then behave as SQL.
//!
//! A [`Database`] is the runtime pairing of an open connection with its
//! driver. Connections are trait objects ([`SqlConn`]) so the query
//! pipeline never sees a backend type; result rows are *pushed* into a
//! [`RecordSink`](crate::record::sink::RecordSink) as the backend scans
//! them.
//!
//! ## Connection serialization
//!
//! Each `Database` guards its connection with a mutex, so concurrent
//! metadata fetches on one handle serialize instead of deadlocking (SQL
//! Server is the known offender).

pub mod csvd;
pub mod mysql;
pub mod postgres;
pub mod registry;
pub mod sqlite;
pub mod sqlserver;
pub mod xlsxd;

use crate::cancel::CancelToken;
use crate::dialect::Dialect;
use crate::kind::{munge_fn, Kind};
use crate::record::meta::RecordMeta;
use crate::record::sink::RecordSink;
use crate::record::{Record, Value};
use crate::slq::render::Renderer;
use crate::source::metadata::{SourceMetadata, TableMetadata};
use crate::source::{DriverType, Source};
use eyre::Result;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Static facts about a driver implementation.
#[derive(Debug, Clone)]
pub struct DriverMetadata {
    pub typ: DriverType,
    pub description: &'static str,
    pub doc_url: &'static str,
    pub is_sql: bool,
    /// True for sources that present exactly one table (CSV).
    pub monotable: bool,
    pub default_port: Option<u16>,
}

/// The baseline capability set every driver supplies.
pub trait Driver: Send + Sync {
    fn metadata(&self) -> DriverMetadata;

    /// Checks `src` and rewrites its location into canonical form.
    /// Idempotent: validating an already-canonical source is a no-op.
    fn validate_source(&self, src: &Source) -> Result<Source>;

    /// Opens a connection and wraps it as a [`Database`]. For document
    /// drivers this triggers ingest into scratch on first open.
    fn open(&self, src: &Source, cancel: &CancelToken) -> Result<Database>;

    /// Connectivity check: cheap open + round trip.
    fn ping(&self, src: &Source, cancel: &CancelToken) -> Result<()>;

    /// Deletes all rows from `tbl`, optionally resetting any identity
    /// counter. Returns the number of rows removed.
    fn truncate(&self, src: &Source, tbl: &str, reset: bool, cancel: &CancelToken)
        -> Result<i64>;

    /// Capability test: SQL drivers return themselves.
    fn as_sql(&self) -> Option<&dyn SqlDriver> {
        None
    }

    /// Capability test: document drivers return themselves.
    fn as_document(&self) -> Option<&dyn DocumentDriver> {
        None
    }
}

/// The extended contract for SQL-speaking drivers. All schema/DDL methods
/// operate on a borrowed connection so callers control pooling.
pub trait SqlDriver: Driver {
    fn dialect(&self) -> Dialect;

    /// Renderer with this driver's quirk overrides applied. The default
    /// renderer itself is never mutated.
    fn renderer(&self) -> Renderer {
        Renderer::default()
    }

    fn current_schema(&self, conn: &mut dyn SqlConn) -> Result<String>;

    fn table_exists(&self, conn: &mut dyn SqlConn, tbl: &str) -> Result<bool>;

    /// Column metadata for `tbl`, probed with a one-row query. Empty `cols`
    /// means all columns.
    fn table_column_meta(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        cols: &[&str],
    ) -> Result<RecordMeta>;

    fn create_table(&self, conn: &mut dyn SqlConn, def: &TableDef) -> Result<()>;

    fn alter_table_add_column(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        col: &str,
        kind: Kind,
    ) -> Result<()>;

    fn alter_table_rename(&self, conn: &mut dyn SqlConn, tbl: &str, new_name: &str)
        -> Result<()>;

    fn alter_table_rename_column(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        col: &str,
        new_name: &str,
    ) -> Result<()>;

    /// Copies `from_tbl` to a new `to_tbl` with identical schema, with or
    /// without data. Returns rows copied (0 when `copy_data` is false).
    fn copy_table(
        &self,
        conn: &mut dyn SqlConn,
        from_tbl: &str,
        to_tbl: &str,
        copy_data: bool,
    ) -> Result<i64>;

    /// Drops `tbl`. With `if_exists`, dropping a nonexistent table is a
    /// no-op; without it, the error is tagged NotExist.
    fn drop_table(&self, conn: &mut dyn SqlConn, tbl: &str, if_exists: bool) -> Result<()>;

    /// Prepares a multi-row INSERT for `n_rows` rows into `tbl`. The
    /// destination metadata is read first so the execer can munge incoming
    /// records to the destination kinds.
    fn prepare_insert_stmt<'a>(
        &self,
        conn: &'a mut dyn SqlConn,
        tbl: &str,
        cols: &[&str],
        n_rows: usize,
    ) -> Result<Box<dyn StmtExecer + 'a>> {
        let dest_meta = self.table_column_meta(&mut *conn, tbl, cols)?;
        conn.prepare_insert(tbl, cols, dest_meta, n_rows)
    }

    /// Prepares `UPDATE tbl SET col = ?, … WHERE <where_clause>`.
    fn prepare_update_stmt<'a>(
        &self,
        conn: &'a mut dyn SqlConn,
        tbl: &str,
        cols: &[&str],
        where_clause: &str,
    ) -> Result<Box<dyn StmtExecer + 'a>> {
        let dest_meta = self.table_column_meta(&mut *conn, tbl, cols)?;
        conn.prepare_update(tbl, cols, dest_meta, where_clause)
    }

    fn db_properties(&self, conn: &mut dyn SqlConn) -> Result<Vec<(String, String)>>;

    fn source_metadata(
        &self,
        conn: &mut dyn SqlConn,
        src: &Source,
        no_schema: bool,
    ) -> Result<SourceMetadata>;

    fn table_metadata(&self, conn: &mut dyn SqlConn, tbl: &str) -> Result<TableMetadata>;
}

/// File-format drivers that are ingested into scratch.
pub trait DocumentDriver: Driver {
    /// Sniffs `path`, returning a confidence score in `[0,1]`, or `None`
    /// if the file is definitely not this format.
    fn detect(&self, path: &Path) -> Result<Option<f32>>;
}

/// A live backend connection behind the uniform interface. One per
/// [`Database`]; access is serialized by the owning database.
pub trait SqlConn: Send {
    fn ping(&mut self) -> Result<()>;

    /// Executes `sql`, streaming result rows into `sink` in backend order.
    /// Metadata is delivered to the sink before the first row (also for
    /// empty result sets). Returns the row count.
    fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        sink: &mut dyn RecordSink,
        cancel: &CancelToken,
    ) -> Result<u64>;

    /// Executes a statement, returning affected rows.
    fn exec(&mut self, sql: &str, args: &[Value]) -> Result<i64>;

    /// Prepares a multi-row INSERT sized for `rows_per_batch` rows.
    /// `dest_meta` carries the destination column kinds for munging.
    fn prepare_insert<'a>(
        &'a mut self,
        tbl: &str,
        cols: &[&str],
        dest_meta: RecordMeta,
        rows_per_batch: usize,
    ) -> Result<Box<dyn StmtExecer + 'a>>;

    /// Prepares an UPDATE statement with the given SET columns and WHERE
    /// clause text.
    fn prepare_update<'a>(
        &'a mut self,
        tbl: &str,
        cols: &[&str],
        dest_meta: RecordMeta,
        where_clause: &str,
    ) -> Result<Box<dyn StmtExecer + 'a>>;
}

/// A prepared write statement. `munge` coerces a record into the
/// destination's kinds; `exec` runs one (possibly multi-row) batch of
/// already-munged args.
pub trait StmtExecer {
    fn dest_meta(&self) -> &RecordMeta;

    /// Coerces `rec` in place to the destination column kinds.
    fn munge(&self, rec: &mut Record) -> Result<()> {
        default_insert_munge(self.dest_meta(), rec)
    }

    /// Executes with `args` (already munged), returning affected rows.
    fn exec(&mut self, args: &[Value]) -> Result<i64>;

    /// Rows per full batch this statement was prepared for.
    fn rows_per_batch(&self) -> usize;
}

/// Default munge for write paths: coerce each value to the destination
/// field's kind. Mismatched values that cannot coerce are errors.
pub fn default_insert_munge(dest: &RecordMeta, rec: &mut Record) -> Result<()> {
    eyre::ensure!(
        rec.len() == dest.len(),
        "record has {} values but destination has {} columns",
        rec.len(),
        dest.len()
    );

    for (i, val) in rec.iter_mut().enumerate() {
        if val.is_null() || val.kind() == dest[i].kind {
            continue;
        }
        if let Some(f) = munge_fn(dest[i].kind) {
            *val = f(val)?;
        }
    }
    Ok(())
}

/// Definition of a table to create: the subset of DDL the pipeline needs.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub cols: Vec<ColDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, cols: Vec<ColDef>) -> Self {
        TableDef { name: name.into(), cols }
    }

    /// Convenience constructor pairing names with kinds.
    pub fn from_kinds(name: impl Into<String>, names: &[String], kinds: &[Kind]) -> Self {
        let cols = names
            .iter()
            .zip(kinds)
            .map(|(n, k)| ColDef::new(n.clone(), *k))
            .collect();
        TableDef { name: name.into(), cols }
    }

    pub fn col_names(&self) -> Vec<&str> {
        self.cols.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ColDef {
    pub name: String,
    pub kind: Kind,
    pub not_null: bool,
    pub primary_key: bool,
}

impl ColDef {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        ColDef {
            name: name.into(),
            kind,
            not_null: false,
            primary_key: false,
        }
    }
}

/// Runtime pairing of an open connection and its SQL driver. For document
/// sources the underlying driver is the scratch database's (SQLite) while
/// `source` still reports the document source.
pub struct Database {
    src: Source,
    drvr: Arc<dyn SqlDriver>,
    conn: Mutex<Box<dyn SqlConn>>,
}

impl Database {
    pub fn new(src: Source, drvr: Arc<dyn SqlDriver>, conn: Box<dyn SqlConn>) -> Self {
        Database {
            src,
            drvr,
            conn: Mutex::new(conn),
        }
    }

    pub fn source(&self) -> &Source {
        &self.src
    }

    pub fn sql_driver(&self) -> &Arc<dyn SqlDriver> {
        &self.drvr
    }

    pub fn dialect(&self) -> Dialect {
        self.drvr.dialect()
    }

    /// Runs `f` with exclusive access to the connection. All higher-level
    /// operations funnel through here, which is what serializes concurrent
    /// metadata fetches.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&dyn SqlDriver, &mut dyn SqlConn) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        f(self.drvr.as_ref(), conn.as_mut())
    }

    pub fn query(
        &self,
        sql: &str,
        args: &[Value],
        sink: &mut dyn RecordSink,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let mut conn = self.conn.lock();
        conn.query(sql, args, sink, cancel)
    }

    pub fn exec(&self, sql: &str, args: &[Value]) -> Result<i64> {
        let mut conn = self.conn.lock();
        conn.exec(sql, args)
    }

    pub fn ping(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.ping()
    }

    pub fn source_metadata(&self, no_schema: bool) -> Result<SourceMetadata> {
        self.with_conn(|drvr, conn| drvr.source_metadata(conn, &self.src, no_schema))
    }

    pub fn table_metadata(&self, tbl: &str) -> Result<TableMetadata> {
        self.with_conn(|drvr, conn| drvr.table_metadata(conn, tbl))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("src", &self.src.handle)
            .field("driver", &self.drvr.metadata().typ)
            .finish()
    }
}

/// Runs `sql` expecting a single-row, single-column result.
pub(crate) fn query_one_value(
    conn: &mut dyn SqlConn,
    sql: &str,
    args: &[Value],
) -> Result<Value> {
    let mut buf = crate::record::sink::RecordBuffer::new();
    conn.query(sql, args, &mut buf, &CancelToken::new())?;
    buf.recs
        .into_iter()
        .next()
        .and_then(|mut r| (!r.is_empty()).then(|| r.remove(0)))
        .ok_or_else(|| {
            crate::error::SqError::db(format!("query returned no rows: {sql}")).into()
        })
}

pub(crate) fn query_one_text(conn: &mut dyn SqlConn, sql: &str, args: &[Value]) -> Result<String> {
    query_one_value(conn, sql, args).map(|v| v.render())
}

pub(crate) fn query_one_int(conn: &mut dyn SqlConn, sql: &str, args: &[Value]) -> Result<i64> {
    query_one_value(conn, sql, args)?.as_int()
}

/// Probes `SELECT cols FROM tbl <tail>` for column metadata. The tail is
/// the dialect's one-row limiter (`LIMIT 1`, or SQL Server's
/// `ORDER BY (SELECT 0) OFFSET 0 ROWS FETCH NEXT 1 ROWS ONLY`).
pub(crate) fn probe_column_meta(
    conn: &mut dyn SqlConn,
    dialect: &Dialect,
    tbl: &str,
    cols: &[&str],
    limit_tail: &str,
) -> Result<RecordMeta> {
    let cols_clause = if cols.is_empty() {
        "*".to_string()
    } else {
        cols.iter()
            .map(|c| dialect.enquote(c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let sql = format!(
        "SELECT {cols_clause} FROM {} {limit_tail}",
        dialect.enquote(tbl)
    );

    let mut buf = crate::record::sink::RecordBuffer::new();
    conn.query(&sql, &[], &mut buf, &CancelToken::new())?;
    buf.meta.ok_or_else(|| {
        crate::error::SqError::internal("probe query delivered no metadata").into()
    })
}

/// Opens databases on demand. Implemented by the per-run database pool.
pub trait DbOpener: Send + Sync {
    fn open_db(&self, src: &Source) -> Result<Arc<Database>>;
}

/// Opens the scratch database used for document ingest.
pub trait ScratchDbOpener: Send + Sync {
    fn open_scratch(&self, name: &str) -> Result<Arc<Database>>;
}

/// Opens the database that hosts a cross-source join (in practice the
/// scratch database).
pub trait JoinDbOpener: Send + Sync {
    fn open_join(&self, srcs: &[&Source]) -> Result<Arc<Database>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::meta::FieldMeta;

    fn meta2() -> RecordMeta {
        RecordMeta::new(vec![
            FieldMeta {
                munged_name: "id".into(),
                name: "id".into(),
                kind: Kind::Int,
                db_type_name: "INTEGER".into(),
                nullable: Some(false),
            },
            FieldMeta {
                munged_name: "active".into(),
                name: "active".into(),
                kind: Kind::Bool,
                db_type_name: "BOOLEAN".into(),
                nullable: Some(true),
            },
        ])
    }

    #[test]
    fn default_munge_coerces_to_dest_kinds() {
        let dest = meta2();
        let mut rec = vec![Value::Text("42".into()), Value::Text("true".into())];
        default_insert_munge(&dest, &mut rec).unwrap();
        assert_eq!(rec, vec![Value::Int(42), Value::Bool(true)]);
    }

    #[test]
    fn default_munge_passes_nulls_and_matches() {
        let dest = meta2();
        let mut rec = vec![Value::Int(1), Value::Null];
        default_insert_munge(&dest, &mut rec).unwrap();
        assert_eq!(rec, vec![Value::Int(1), Value::Null]);
    }

    #[test]
    fn default_munge_rejects_arity_mismatch() {
        let dest = meta2();
        let mut rec = vec![Value::Int(1)];
        assert!(default_insert_munge(&dest, &mut rec).is_err());
    }
}
