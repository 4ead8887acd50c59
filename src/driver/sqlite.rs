//! # SQLite Driver
//!
//! The busiest driver: it backs real `sqlite3://` sources *and* the scratch
//! database every document source is ingested into.
//!
//! ## Dynamic typing
//!
//! SQLite columns declare an affinity, not a type: a column declared REAL
//! can happily hand back strings. The record pipeline therefore treats the
//! declared kind as a *request*: each scanned value is coerced via the
//! kind's munge function, and a value that cannot coerce surfaces a
//! TypeMismatch tagged with column and row index. Columns with no declared
//! type at all (expressions, e.g. `COUNT(*)`) take their kind from the
//! first row's value, falling back to Text for empty result sets.
//!
//! ## Location munging
//!
//! [`munge_location`] canonicalizes the many ways users spell a SQLite
//! location into `sqlite3://<absolute-path>`:
//!
//! | Input | Canonical |
//! |-------|-----------|
//! | `sakila.db`, `./sakila.db` | `sqlite3://<CWD>/sakila.db` |
//! | `sqlite3:sakila.db` | `sqlite3://<CWD>/sakila.db` |
//! | `sqlite3:/sakila.db` | `sqlite3:///sakila.db` |
//! | `/path/to/sakila.db` | `sqlite3:///path/to/sakila.db` |
//! | `sqlite3:///path/to/sakila.db` | unchanged |
//!
//! Windows drive-letter paths are preserved as-is after the scheme.

use super::{
    probe_column_meta, query_one_int, query_one_text, ColDef, Database, Driver,
    DriverMetadata, SqlConn, SqlDriver, StmtExecer, TableDef,
};
use crate::cancel::CancelToken;
use crate::dialect::{
    self, Dialect, ALL_JOINS, DEFAULT_OPS,
};
use crate::error::SqError;
use crate::kind::{munge_fn, Kind};
use crate::record::meta::{munge_result_col_names, FieldMeta, RecordMeta};
use crate::record::sink::{RecordBuffer, RecordSink};
use crate::record::{Record, Value};
use crate::source::metadata::{
    ColMetadata, SourceMetadata, TableMetadata, TableType,
};
use crate::source::{DriverType, Source};
use eyre::{Result, WrapErr};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const SCHEME: &str = "sqlite3://";

#[derive(Debug, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(SqliteDriver)
    }

    /// Opens a database directly on a filesystem path, bypassing location
    /// munging. Used for the scratch database.
    pub fn open_path(self: &Arc<Self>, src: Source, path: &Path) -> Result<Database> {
        let conn = Connection::open(path)
            .map_err(errw)
            .wrap_err_with(|| format!("open sqlite db: {}", path.display()))?;
        Ok(Database::new(
            src,
            self.clone() as Arc<dyn SqlDriver>,
            Box::new(SqliteConn { conn }),
        ))
    }

    fn connect(&self, src: &Source) -> Result<Connection> {
        let path = path_from_location(src)?;
        Connection::open(&path)
            .map_err(errw)
            .wrap_err_with(|| format!("open sqlite db: {}", path.display()))
    }
}

impl Driver for SqliteDriver {
    fn metadata(&self) -> DriverMetadata {
        DriverMetadata {
            typ: DriverType::Sqlite3,
            description: "SQLite",
            doc_url: "https://sqlite.org",
            is_sql: true,
            monotable: false,
            default_port: None,
        }
    }

    fn validate_source(&self, src: &Source) -> Result<Source> {
        if src.typ != DriverType::Sqlite3 {
            return Err(SqError::invalid_source(format!(
                "expected driver type sqlite3 but got {}",
                src.typ
            ))
            .into());
        }
        let mut out = src.clone();
        out.location = munge_location(&src.location)?;
        Ok(out)
    }

    fn open(&self, src: &Source, _cancel: &CancelToken) -> Result<Database> {
        debug!(handle = %src.handle, "open sqlite source");
        let conn = self.connect(src)?;
        Ok(Database::new(
            src.clone(),
            Arc::new(SqliteDriver) as Arc<dyn SqlDriver>,
            Box::new(SqliteConn { conn }),
        ))
    }

    fn ping(&self, src: &Source, _cancel: &CancelToken) -> Result<()> {
        let conn = self.connect(src)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(errw)
            .wrap_err_with(|| format!("ping {}", src.handle))
    }

    fn truncate(
        &self,
        src: &Source,
        tbl: &str,
        reset: bool,
        _cancel: &CancelToken,
    ) -> Result<i64> {
        let conn = self.connect(src)?;
        let affected = conn
            .execute(&format!("DELETE FROM {}", dialect::double_quote(tbl)), [])
            .map_err(errw)
            .wrap_err_with(|| format!("truncate: failed to delete from \"{tbl}\""))?;

        if reset {
            // AUTOINCREMENT counters live in sqlite_sequence, which only
            // exists once some table uses AUTOINCREMENT.
            let _ = conn.execute("DELETE FROM sqlite_sequence WHERE name = ?1", [tbl]);
        }
        Ok(affected as i64)
    }

    fn as_sql(&self) -> Option<&dyn SqlDriver> {
        Some(self)
    }
}

impl SqlDriver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect {
            typ: DriverType::Sqlite3,
            placeholders: dialect::placeholders_question,
            placeholder: dialect::placeholder_question,
            enquote: dialect::double_quote,
            int_bool: true,
            max_batch_values: 500,
            ops: &DEFAULT_OPS,
            joins: ALL_JOINS,
        }
    }

    fn current_schema(&self, conn: &mut dyn SqlConn) -> Result<String> {
        query_one_text(
            conn,
            "SELECT name FROM pragma_database_list WHERE seq = 0",
            &[],
        )
    }

    fn table_exists(&self, conn: &mut dyn SqlConn, tbl: &str) -> Result<bool> {
        let count = query_one_int(
            conn,
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
            &[Value::Text(tbl.to_string())],
        )?;
        Ok(count > 0)
    }

    fn table_column_meta(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        cols: &[&str],
    ) -> Result<RecordMeta> {
        probe_column_meta(conn, &self.dialect(), tbl, cols, "LIMIT 1")
    }

    fn create_table(&self, conn: &mut dyn SqlConn, def: &TableDef) -> Result<()> {
        let sql = build_create_table(def);
        conn.exec(&sql, &[])?;
        Ok(())
    }

    fn alter_table_add_column(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        col: &str,
        kind: Kind,
    ) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            dialect::double_quote(tbl),
            dialect::double_quote(col),
            db_type_for_kind(kind)
        );
        conn.exec(&sql, &[])
            .wrap_err_with(|| format!("alter table: failed to add column \"{col}\" to \"{tbl}\""))?;
        Ok(())
    }

    fn alter_table_rename(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        new_name: &str,
    ) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            dialect::double_quote(tbl),
            dialect::double_quote(new_name)
        );
        conn.exec(&sql, &[])?;
        Ok(())
    }

    fn alter_table_rename_column(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        col: &str,
        new_name: &str,
    ) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            dialect::double_quote(tbl),
            dialect::double_quote(col),
            dialect::double_quote(new_name)
        );
        conn.exec(&sql, &[])?;
        Ok(())
    }

    fn copy_table(
        &self,
        conn: &mut dyn SqlConn,
        from_tbl: &str,
        to_tbl: &str,
        copy_data: bool,
    ) -> Result<i64> {
        // CREATE TABLE AS would lose the declared column types, so clone
        // the original DDL with the table name swapped.
        let create_sql = query_one_text(
            conn,
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::Text(from_tbl.to_string())],
        )
        .map_err(|_| SqError::not_exist(format!("table not found: {from_tbl}")))?;

        let body = create_sql
            .find('(')
            .map(|i| &create_sql[i..])
            .ok_or_else(|| SqError::internal(format!("malformed DDL for \"{from_tbl}\"")))?;
        conn.exec(
            &format!("CREATE TABLE {} {body}", dialect::double_quote(to_tbl)),
            &[],
        )?;

        if !copy_data {
            return Ok(0);
        }
        conn.exec(
            &format!(
                "INSERT INTO {} SELECT * FROM {}",
                dialect::double_quote(to_tbl),
                dialect::double_quote(from_tbl)
            ),
            &[],
        )
    }

    fn drop_table(&self, conn: &mut dyn SqlConn, tbl: &str, if_exists: bool) -> Result<()> {
        let sql = if if_exists {
            format!("DROP TABLE IF EXISTS {}", dialect::double_quote(tbl))
        } else {
            format!("DROP TABLE {}", dialect::double_quote(tbl))
        };
        conn.exec(&sql, &[])?;
        Ok(())
    }

    fn db_properties(&self, conn: &mut dyn SqlConn) -> Result<Vec<(String, String)>> {
        let mut props = Vec::new();
        for pragma in ["journal_mode", "page_size", "encoding", "user_version", "foreign_keys"] {
            if let Ok(val) = query_one_text(conn, &format!("SELECT * FROM pragma_{pragma}"), &[]) {
                props.push((pragma.to_string(), val));
            }
        }
        Ok(props)
    }

    fn source_metadata(
        &self,
        conn: &mut dyn SqlConn,
        src: &Source,
        no_schema: bool,
    ) -> Result<SourceMetadata> {
        let path = path_from_location(src).ok();
        let (name, size) = match &path {
            Some(p) => (
                p.file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                std::fs::metadata(p).ok().map(|m| m.len() as i64),
            ),
            None => (src.location.clone(), None),
        };

        let mut md = SourceMetadata {
            handle: src.handle.clone(),
            driver: DriverType::Sqlite3,
            name,
            schema: self.current_schema(conn)?,
            location: src.redacted_location(),
            size,
            tables: Vec::new(),
            db_properties: self.db_properties(conn)?,
        };

        if no_schema {
            return Ok(md);
        }

        let mut buf = RecordBuffer::new();
        conn.query(
            "SELECT name, type, sql FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
            &mut buf,
            &CancelToken::new(),
        )?;

        let names: Vec<(String, String, String)> = buf
            .recs
            .iter()
            .map(|rec| {
                let name = rec[0].as_str().unwrap_or_default().to_string();
                let typ = rec[1].as_str().unwrap_or_default().to_string();
                let sql = match &rec[2] {
                    Value::Text(s) => s.clone(),
                    _ => String::new(),
                };
                (name, typ, sql)
            })
            .collect();

        for (tbl_name, tbl_type, create_sql) in names {
            let mut tbl_md = self.table_metadata(conn, &tbl_name)?;
            tbl_md.table_type = table_type_of(&tbl_type, &create_sql);
            md.tables.push(tbl_md);
        }

        Ok(md)
    }

    fn table_metadata(&self, conn: &mut dyn SqlConn, tbl: &str) -> Result<TableMetadata> {
        let mut buf = RecordBuffer::new();
        conn.query(
            &format!("SELECT * FROM pragma_table_info({})", quote_str(tbl)),
            &[],
            &mut buf,
            &CancelToken::new(),
        )?;

        if buf.recs.is_empty() {
            return Err(SqError::not_exist(format!("table not found: {tbl}")).into());
        }

        // pragma_table_info: cid, name, type, notnull, dflt_value, pk
        let mut columns = Vec::with_capacity(buf.recs.len());
        for (i, rec) in buf.recs.iter().enumerate() {
            let col_type = match &rec[2] {
                Value::Text(s) => s.clone(),
                _ => String::new(),
            };
            columns.push(ColMetadata {
                name: rec[1].as_str().unwrap_or_default().to_string(),
                position: i as i64 + 1,
                kind: kind_from_decl(&col_type),
                base_type: base_type_of(&col_type),
                column_type: col_type,
                nullable: rec[3].as_int().unwrap_or(0) == 0,
                primary_key: rec[5].as_int().unwrap_or(0) > 0,
            });
        }

        let row_count = query_one_int(
            conn,
            &format!("SELECT COUNT(*) FROM {}", dialect::double_quote(tbl)),
            &[],
        )?;

        Ok(TableMetadata {
            name: tbl.to_string(),
            table_type: TableType::Table,
            row_count,
            columns,
        })
    }
}

/// The rusqlite-backed connection.
pub struct SqliteConn {
    conn: Connection,
}

impl SqliteConn {
    pub fn new(conn: Connection) -> Self {
        SqliteConn { conn }
    }
}

impl SqlConn for SqliteConn {
    fn ping(&mut self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(errw)
    }

    fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        sink: &mut dyn RecordSink,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let mut stmt = self.conn.prepare(sql).map_err(errw)?;
        let col_count = stmt.column_count();

        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let decls: Vec<Option<String>> = stmt
            .columns()
            .iter()
            .map(|c| c.decl_type().map(|d| d.to_string()))
            .collect();

        let params = rusqlite::params_from_iter(args.iter().map(to_sql_value));
        let mut rows = stmt.query(params).map_err(errw)?;

        // The first row settles the kinds of undeclared columns; empty
        // result sets fall back to Text.
        let first = rows.next().map_err(errw)?;
        let mut kinds = Vec::with_capacity(col_count);
        for i in 0..col_count {
            let decl_kind = decls[i].as_deref().map(kind_from_decl);
            let kind = match decl_kind {
                Some(k) => k,
                None => match first {
                    Some(row) => match row.get_ref(i).map_err(errw)? {
                        ValueRef::Null => Kind::Text,
                        ValueRef::Integer(_) => Kind::Int,
                        ValueRef::Real(_) => Kind::Float,
                        ValueRef::Text(_) => Kind::Text,
                        ValueRef::Blob(_) => Kind::Bytes,
                    },
                    None => Kind::Text,
                },
            };
            kinds.push(kind);
        }

        let meta = build_meta(&names, &kinds, &decls);
        sink.meta(&meta)?;

        let tbl = table_from_sql(sql).unwrap_or_else(|| "?".to_string());
        let mut count: u64 = 0;
        if let Some(row) = first {
            sink.record(scan_row(row, &meta, &tbl, count)?)?;
            count += 1;
        }
        loop {
            cancel.check()?;
            match rows.next().map_err(errw)? {
                Some(row) => {
                    sink.record(scan_row(row, &meta, &tbl, count)?)?;
                    count += 1;
                }
                None => break,
            }
        }

        sink.flush()?;
        Ok(count)
    }

    fn exec(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        let params = rusqlite::params_from_iter(args.iter().map(to_sql_value));
        let affected = self.conn.execute(sql, params).map_err(errw)?;
        Ok(affected as i64)
    }

    fn prepare_insert<'a>(
        &'a mut self,
        tbl: &str,
        cols: &[&str],
        dest_meta: RecordMeta,
        rows_per_batch: usize,
    ) -> Result<Box<dyn StmtExecer + 'a>> {
        let sql = build_insert_sql(tbl, cols, rows_per_batch);
        // Validate eagerly so a bad table/column surfaces here, not mid-batch.
        self.conn.prepare_cached(&sql).map_err(errw)?;
        Ok(Box::new(SqliteStmtExecer {
            conn: &self.conn,
            tbl: tbl.to_string(),
            cols: cols.iter().map(|c| (*c).to_string()).collect(),
            dest_meta,
            rows_per_batch,
        }))
    }

    fn prepare_update<'a>(
        &'a mut self,
        tbl: &str,
        cols: &[&str],
        dest_meta: RecordMeta,
        where_clause: &str,
    ) -> Result<Box<dyn StmtExecer + 'a>> {
        let sets: Vec<String> = cols
            .iter()
            .map(|c| format!("{} = ?", dialect::double_quote(c)))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect::double_quote(tbl),
            sets.join(", ")
        );
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        self.conn.prepare_cached(&sql).map_err(errw)?;
        Ok(Box::new(SqliteRawExecer {
            conn: &self.conn,
            sql,
            dest_meta,
        }))
    }
}

struct SqliteStmtExecer<'a> {
    conn: &'a Connection,
    tbl: String,
    cols: Vec<String>,
    dest_meta: RecordMeta,
    rows_per_batch: usize,
}

impl StmtExecer for SqliteStmtExecer<'_> {
    fn dest_meta(&self) -> &RecordMeta {
        &self.dest_meta
    }

    fn exec(&mut self, args: &[Value]) -> Result<i64> {
        let n_cols = self.cols.len();
        eyre::ensure!(
            n_cols > 0 && args.len() % n_cols == 0,
            "insert args ({}) not a multiple of column count ({n_cols})",
            args.len()
        );
        let n_rows = args.len() / n_cols;
        let cols: Vec<&str> = self.cols.iter().map(String::as_str).collect();
        let sql = build_insert_sql(&self.tbl, &cols, n_rows);

        let mut stmt = self.conn.prepare_cached(&sql).map_err(errw)?;
        let params = rusqlite::params_from_iter(args.iter().map(to_sql_value));
        let affected = stmt.execute(params).map_err(errw)?;
        Ok(affected as i64)
    }

    fn rows_per_batch(&self) -> usize {
        self.rows_per_batch
    }
}

struct SqliteRawExecer<'a> {
    conn: &'a Connection,
    sql: String,
    dest_meta: RecordMeta,
}

impl StmtExecer for SqliteRawExecer<'_> {
    fn dest_meta(&self) -> &RecordMeta {
        &self.dest_meta
    }

    fn exec(&mut self, args: &[Value]) -> Result<i64> {
        let mut stmt = self.conn.prepare_cached(&self.sql).map_err(errw)?;
        let params = rusqlite::params_from_iter(args.iter().map(to_sql_value));
        let affected = stmt.execute(params).map_err(errw)?;
        Ok(affected as i64)
    }

    fn rows_per_batch(&self) -> usize {
        1
    }
}

fn build_insert_sql(tbl: &str, cols: &[&str], n_rows: usize) -> String {
    let quoted: Vec<String> = cols.iter().map(|c| dialect::double_quote(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect::double_quote(tbl),
        quoted.join(", "),
        dialect::placeholders_question(cols.len(), n_rows)
    )
}

fn build_create_table(def: &TableDef) -> String {
    let cols: Vec<String> = def.cols.iter().map(render_col_def).collect();
    format!(
        "CREATE TABLE {} ({})",
        dialect::double_quote(&def.name),
        cols.join(", ")
    )
}

fn render_col_def(col: &ColDef) -> String {
    let mut s = format!(
        "{} {}",
        dialect::double_quote(&col.name),
        db_type_for_kind(col.kind)
    );
    if col.primary_key {
        s.push_str(" PRIMARY KEY");
    }
    if col.not_null {
        s.push_str(" NOT NULL");
    }
    s
}

fn db_type_for_kind(kind: Kind) -> &'static str {
    match kind {
        Kind::Int => "INTEGER",
        Kind::Float => "REAL",
        Kind::Decimal => "NUMERIC",
        Kind::Bool => "BOOLEAN",
        Kind::Bytes => "BLOB",
        Kind::Datetime => "DATETIME",
        Kind::Date => "DATE",
        Kind::Time => "TIME",
        Kind::Text | Kind::Null | Kind::Unknown => "TEXT",
    }
}

/// Maps a declared column type to a kind, following SQLite's affinity
/// rules (substring matching). Order matters: DATETIME before DATE/TIME.
pub fn kind_from_decl(decl: &str) -> Kind {
    let d = decl.to_ascii_lowercase();
    if d.contains("datetime") || d.contains("timestamp") {
        Kind::Datetime
    } else if d.contains("date") {
        Kind::Date
    } else if d.contains("time") {
        Kind::Time
    } else if d.contains("bool") {
        Kind::Bool
    } else if d.contains("int") {
        Kind::Int
    } else if d.contains("char") || d.contains("clob") || d.contains("text") {
        Kind::Text
    } else if d.contains("blob") {
        Kind::Bytes
    } else if d.contains("real") || d.contains("floa") || d.contains("doub") {
        Kind::Float
    } else if d.contains("num") || d.contains("dec") {
        Kind::Decimal
    } else {
        Kind::Text
    }
}

fn base_type_of(col_type: &str) -> String {
    let t = col_type.to_ascii_lowercase();
    match t.find('(') {
        Some(i) => t[..i].trim().to_string(),
        None => t,
    }
}

fn table_type_of(master_type: &str, create_sql: &str) -> TableType {
    if master_type == "view" {
        TableType::View
    } else if create_sql.to_ascii_uppercase().contains("CREATE VIRTUAL") {
        TableType::Virtual
    } else {
        TableType::Table
    }
}

fn build_meta(names: &[String], kinds: &[Kind], decls: &[Option<String>]) -> RecordMeta {
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let munged = munge_result_col_names(&name_refs);

    let fields = names
        .iter()
        .enumerate()
        .map(|(i, name)| FieldMeta {
            munged_name: munged[i].clone(),
            name: name.clone(),
            kind: kinds[i],
            db_type_name: decls[i].clone().unwrap_or_default(),
            nullable: None,
        })
        .collect();
    RecordMeta::new(fields)
}

/// Scans one row into a record, coercing each raw value toward its declared
/// kind. SQLite may return any type in any column; mismatches that cannot
/// coerce are TypeMismatch errors tagged with table, column, and row index.
fn scan_row(
    row: &rusqlite::Row<'_>,
    meta: &RecordMeta,
    tbl: &str,
    row_idx: u64,
) -> Result<Record> {
    let mut rec = Vec::with_capacity(meta.len());
    for i in 0..meta.len() {
        let raw = match row.get_ref(i).map_err(errw)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Float(v),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
        };

        let field = &meta[i];
        let val = if raw.is_null() || raw.kind() == field.kind {
            raw
        } else if field.kind == Kind::Text {
            Value::Text(raw.render())
        } else if field.kind == Kind::Bytes {
            match raw {
                Value::Text(s) => Value::Bytes(s.into_bytes()),
                other => Value::Bytes(other.render().into_bytes()),
            }
        } else {
            match munge_fn(field.kind) {
                Some(f) => f(&raw).map_err(|e| {
                    SqError::type_mismatch(format!(
                        "table \"{tbl}\", column \"{}\", row {row_idx}: {e}",
                        field.name
                    ))
                })?,
                None => raw,
            }
        };
        rec.push(val);
    }
    Ok(rec)
}

fn to_sql_value(val: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match val {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Decimal(d) => SqlValue::Text(d.to_string()),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => SqlValue::Text(t.format("%H:%M:%S").to_string()),
        Value::Datetime(dt) => SqlValue::Text(dt.to_rfc3339()),
    }
}

/// Best-effort extraction of the first table name after FROM, for error
/// tagging. Quoting is stripped; subqueries and expression-only statements
/// yield None.
fn table_from_sql(sql: &str) -> Option<String> {
    let lower = sql.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut at = 0;
    let from = loop {
        let i = lower[at..].find("from")? + at;
        let before_ok = i == 0 || !bytes[i - 1].is_ascii_alphanumeric() && bytes[i - 1] != b'_';
        let after = i + 4;
        let after_ok = after >= bytes.len()
            || !bytes[after].is_ascii_alphanumeric() && bytes[after] != b'_';
        if before_ok && after_ok {
            break after;
        }
        at = i + 4;
    };

    let rest = sql[from..].trim_start();
    match rest.chars().next() {
        None | Some('(') => None,
        Some(open) if matches!(open, '"' | '`' | '[') => {
            let close = if open == '[' { ']' } else { open };
            let end = rest[1..].find(close)? + 1;
            let token = &rest[1..end];
            (!token.is_empty()).then(|| token.to_string())
        }
        Some(_) => {
            let token: String = rest
                .chars()
                .take_while(|c| !c.is_whitespace() && !matches!(c, ',' | ';' | ')'))
                .collect();
            (!token.is_empty()).then_some(token)
        }
    }
}

/// SQL string literal quoting for PRAGMA arguments.
fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Classifies a rusqlite error into the shared taxonomy.
pub(crate) fn errw(err: rusqlite::Error) -> eyre::Report {
    let msg = err.to_string();
    if msg.contains("no such table") || msg.contains("no such column") {
        return SqError::not_exist(msg).into();
    }
    if msg.contains("not authorized") {
        return SqError::auth(msg).into();
    }
    let code = match &err {
        rusqlite::Error::SqliteFailure(e, _) => Some(format!("{:?}", e.code)),
        _ => None,
    };
    match code {
        Some(code) => SqError::with_code(crate::error::ErrorKind::DbError, msg, code).into(),
        None => SqError::db(msg).into(),
    }
}

/// Canonicalizes a SQLite location per the table in the module docs.
pub fn munge_location(loc: &str) -> Result<String> {
    if loc.trim().is_empty() {
        return Err(SqError::invalid_source("location is empty").into());
    }

    let path_part = loc
        .strip_prefix(SCHEME)
        .or_else(|| loc.strip_prefix("sqlite3:"))
        .unwrap_or(loc);

    if path_part.is_empty() {
        return Err(SqError::invalid_source(format!("invalid sqlite3 location: {loc}")).into());
    }

    let path = PathBuf::from(path_part);
    let abs = if path.is_absolute() || is_windows_drive_path(path_part) {
        path
    } else {
        std::env::current_dir()
            .map_err(|e| SqError::io(format!("cannot resolve current dir: {e}")))?
            .join(path)
    };

    Ok(format!("{SCHEME}{}", clean_path(&abs)))
}

/// Extracts the filesystem path from a canonical `sqlite3://` location.
pub fn path_from_location(src: &Source) -> Result<PathBuf> {
    if src.typ != DriverType::Sqlite3 {
        return Err(SqError::invalid_source(format!(
            "driver {} does not have a file path: {}",
            src.typ, src.handle
        ))
        .into());
    }
    let path = src.location.strip_prefix(SCHEME).ok_or_else(|| {
        SqError::invalid_source(format!(
            "sqlite3 location missing {SCHEME} scheme: {}",
            src.location
        ))
    })?;
    Ok(PathBuf::from(path))
}

fn is_windows_drive_path(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// Lexically normalizes `.` and `..` segments; forward slashes throughout.
fn clean_path(path: &Path) -> String {
    use std::path::Component;

    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::RootDir => {}
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
        }
    }
    format!("{prefix}/{}", parts.join("/"))
}
