//! # MySQL Driver
//!
//! Backtick quoting, `?` placeholders, no FULL OUTER JOIN, and BOOLEAN
//! stored as TINYINT(1) (`int_bool`). Uses the synchronous `mysql` client
//! over the binary protocol, so row values arrive typed rather than as
//! text.

use super::{
    probe_column_meta, query_one_int, query_one_value, ColDef, Database, Driver,
    DriverMetadata, SqlConn, SqlDriver, StmtExecer, TableDef,
};
use crate::cancel::CancelToken;
use crate::dialect::{self, Dialect, DEFAULT_OPS, JOINS_NO_FULL_OUTER};
use crate::error::{ErrorKind, SqError};
use crate::kind::Kind;
use crate::record::meta::{munge_result_col_names, FieldMeta, RecordMeta};
use crate::record::sink::{RecordBuffer, RecordSink};
use crate::record::{Decimal, Record, Value};
use crate::slq::ast::Range;
use crate::slq::render::Renderer;
use crate::source::metadata::{
    ColMetadata, SourceMetadata, TableMetadata, TableType,
};
use crate::source::{DriverType, Source};
use ::mysql::consts::{ColumnFlags, ColumnType};
use ::mysql::prelude::Queryable;
use ::mysql::{Column, Conn, Opts, Params, Row, Value as MyValue};
use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MysqlDriver;

impl MysqlDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(MysqlDriver)
    }

    fn connect(&self, src: &Source) -> Result<Conn> {
        let opts = Opts::from_url(&src.location).map_err(|e| {
            SqError::invalid_source(format!(
                "invalid mysql location {}: {e}",
                src.redacted_location()
            ))
        })?;
        Conn::new(opts)
            .map_err(errw)
            .wrap_err_with(|| format!("open mysql source: {}", src.handle))
    }
}

impl Driver for MysqlDriver {
    fn metadata(&self) -> DriverMetadata {
        DriverMetadata {
            typ: DriverType::Mysql,
            description: "MySQL / MariaDB",
            doc_url: "https://www.mysql.com",
            is_sql: true,
            monotable: false,
            default_port: Some(3306),
        }
    }

    fn validate_source(&self, src: &Source) -> Result<Source> {
        if src.typ != DriverType::Mysql {
            return Err(SqError::invalid_source(format!(
                "expected driver type mysql but got {}",
                src.typ
            ))
            .into());
        }
        if !src.location.starts_with("mysql://") {
            return Err(SqError::invalid_source(format!(
                "invalid mysql location: {}",
                src.redacted_location()
            ))
            .into());
        }
        Ok(src.clone())
    }

    fn open(&self, src: &Source, _cancel: &CancelToken) -> Result<Database> {
        debug!(handle = %src.handle, "open mysql source");
        let conn = self.connect(src)?;
        Ok(Database::new(
            src.clone(),
            Arc::new(MysqlDriver) as Arc<dyn SqlDriver>,
            Box::new(MyConn { conn }),
        ))
    }

    fn ping(&self, src: &Source, _cancel: &CancelToken) -> Result<()> {
        let mut conn = self.connect(src)?;
        conn.query_drop("SELECT 1")
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
        let mut conn = self.connect(src)?;
        let quoted = dialect::backtick_quote(tbl);

        let affected: i64 = conn
            .query_first::<i64, _>(format!("SELECT COUNT(*) FROM {quoted}"))
            .map_err(errw)?
            .unwrap_or(0);

        if reset {
            // TRUNCATE implicitly resets AUTO_INCREMENT.
            conn.query_drop(format!("TRUNCATE TABLE {quoted}"))
                .map_err(errw)
                .wrap_err_with(|| format!("truncate: failed to truncate `{tbl}`"))?;
        } else {
            conn.query_drop(format!("DELETE FROM {quoted}"))
                .map_err(errw)
                .wrap_err_with(|| format!("truncate: failed to delete from `{tbl}`"))?;
        }
        Ok(affected)
    }

    fn as_sql(&self) -> Option<&dyn SqlDriver> {
        Some(self)
    }
}

impl SqlDriver for MysqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect {
            typ: DriverType::Mysql,
            placeholders: dialect::placeholders_question,
            placeholder: dialect::placeholder_question,
            enquote: dialect::backtick_quote,
            int_bool: true,
            max_batch_values: 500,
            ops: &DEFAULT_OPS,
            joins: JOINS_NO_FULL_OUTER,
        }
    }

    fn renderer(&self) -> Renderer {
        Renderer {
            range: render_range,
            ..Renderer::default()
        }
    }

    fn current_schema(&self, conn: &mut dyn SqlConn) -> Result<String> {
        query_one_value(conn, "SELECT DATABASE()", &[]).map(|v| v.render())
    }

    fn table_exists(&self, conn: &mut dyn SqlConn, tbl: &str) -> Result<bool> {
        let count = query_one_int(
            conn,
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
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
        let cols: Vec<String> = def.cols.iter().map(render_col_def).collect();
        let sql = format!(
            "CREATE TABLE {} ({})",
            dialect::backtick_quote(&def.name),
            cols.join(", ")
        );
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
            dialect::backtick_quote(tbl),
            dialect::backtick_quote(col),
            db_type_for_kind(kind)
        );
        conn.exec(&sql, &[])
            .wrap_err_with(|| format!("alter table: failed to add column `{col}` to `{tbl}`"))?;
        Ok(())
    }

    fn alter_table_rename(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        new_name: &str,
    ) -> Result<()> {
        let sql = format!(
            "RENAME TABLE {} TO {}",
            dialect::backtick_quote(tbl),
            dialect::backtick_quote(new_name)
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
            dialect::backtick_quote(tbl),
            dialect::backtick_quote(col),
            dialect::backtick_quote(new_name)
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
        let from = dialect::backtick_quote(from_tbl);
        let to = dialect::backtick_quote(to_tbl);

        conn.exec(&format!("CREATE TABLE {to} LIKE {from}"), &[])?;
        if !copy_data {
            return Ok(0);
        }
        conn.exec(&format!("INSERT INTO {to} SELECT * FROM {from}"), &[])
    }

    fn drop_table(&self, conn: &mut dyn SqlConn, tbl: &str, if_exists: bool) -> Result<()> {
        let sql = if if_exists {
            format!("DROP TABLE IF EXISTS {}", dialect::backtick_quote(tbl))
        } else {
            format!("DROP TABLE {}", dialect::backtick_quote(tbl))
        };
        conn.exec(&sql, &[])?;
        Ok(())
    }

    fn db_properties(&self, conn: &mut dyn SqlConn) -> Result<Vec<(String, String)>> {
        let mut buf = RecordBuffer::new();
        conn.query(
            "SHOW VARIABLES WHERE Variable_name IN \
             ('version', 'character_set_server', 'collation_server', 'max_connections')",
            &[],
            &mut buf,
            &CancelToken::new(),
        )?;
        Ok(buf
            .recs
            .iter()
            .map(|r| (r[0].render(), r[1].render()))
            .collect())
    }

    fn source_metadata(
        &self,
        conn: &mut dyn SqlConn,
        src: &Source,
        no_schema: bool,
    ) -> Result<SourceMetadata> {
        let name = self.current_schema(conn)?;

        let mut md = SourceMetadata {
            handle: src.handle.clone(),
            driver: DriverType::Mysql,
            name: name.clone(),
            schema: name,
            location: src.redacted_location(),
            size: None,
            tables: Vec::new(),
            db_properties: self.db_properties(conn)?,
        };

        if no_schema {
            return Ok(md);
        }

        let mut buf = RecordBuffer::new();
        conn.query(
            "SELECT table_name, table_type FROM information_schema.tables \
             WHERE table_schema = DATABASE() ORDER BY table_name",
            &[],
            &mut buf,
            &CancelToken::new(),
        )?;
        let tables: Vec<(String, String)> = buf
            .recs
            .iter()
            .map(|r| (r[0].render(), r[1].render()))
            .collect();

        for (tbl_name, tbl_type) in tables {
            let mut tbl_md = self.table_metadata(conn, &tbl_name)?;
            tbl_md.table_type = if tbl_type.eq_ignore_ascii_case("view") {
                TableType::View
            } else {
                TableType::Table
            };
            md.tables.push(tbl_md);
        }

        Ok(md)
    }

    fn table_metadata(&self, conn: &mut dyn SqlConn, tbl: &str) -> Result<TableMetadata> {
        let mut buf = RecordBuffer::new();
        conn.query(
            "SELECT column_name, ordinal_position, column_type, data_type, is_nullable, \
                    column_key \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
             ORDER BY ordinal_position",
            &[Value::Text(tbl.to_string())],
            &mut buf,
            &CancelToken::new(),
        )?;

        if buf.recs.is_empty() {
            return Err(SqError::not_exist(format!("table not found: {tbl}")).into());
        }

        let columns = buf
            .recs
            .iter()
            .map(|r| {
                let base_type = r[3].render();
                ColMetadata {
                    name: r[0].render(),
                    position: r[1].as_int().unwrap_or(0),
                    kind: kind_from_db_type(&base_type),
                    column_type: r[2].render(),
                    base_type,
                    nullable: r[4].render().eq_ignore_ascii_case("yes"),
                    primary_key: r[5].render().eq_ignore_ascii_case("pri"),
                }
            })
            .collect();

        let row_count = query_one_int(
            conn,
            &format!("SELECT COUNT(*) FROM {}", dialect::backtick_quote(tbl)),
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

pub struct MyConn {
    conn: Conn,
}

impl SqlConn for MyConn {
    fn ping(&mut self) -> Result<()> {
        self.conn.query_drop("SELECT 1").map_err(errw)
    }

    fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        sink: &mut dyn RecordSink,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let params = my_params(args);
        let mut result = self.conn.exec_iter(sql, params).map_err(errw)?;

        let columns: Vec<Column> = result.columns().as_ref().to_vec();
        let meta = build_meta(&columns);
        sink.meta(&meta)?;

        let mut count: u64 = 0;
        for row in result.by_ref() {
            cancel.check()?;
            let row: Row = row.map_err(errw)?;
            sink.record(scan_row(row, &meta)?)?;
            count += 1;
        }
        sink.flush()?;
        Ok(count)
    }

    fn exec(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        let params = my_params(args);
        let result = self.conn.exec_iter(sql, params).map_err(errw)?;
        Ok(result.affected_rows() as i64)
    }

    fn prepare_insert<'a>(
        &'a mut self,
        tbl: &str,
        cols: &[&str],
        dest_meta: RecordMeta,
        rows_per_batch: usize,
    ) -> Result<Box<dyn StmtExecer + 'a>> {
        let sql = build_insert_sql(tbl, cols, rows_per_batch);
        self.conn.prep(&sql).map_err(errw)?;
        Ok(Box::new(MyStmtExecer {
            conn: &mut self.conn,
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
            .map(|c| format!("{} = ?", dialect::backtick_quote(c)))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect::backtick_quote(tbl),
            sets.join(", ")
        );
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        Ok(Box::new(MyRawExecer {
            conn: &mut self.conn,
            sql,
            dest_meta,
        }))
    }
}

struct MyStmtExecer<'a> {
    conn: &'a mut Conn,
    tbl: String,
    cols: Vec<String>,
    dest_meta: RecordMeta,
    rows_per_batch: usize,
}

impl StmtExecer for MyStmtExecer<'_> {
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
        let cols: Vec<&str> = self.cols.iter().map(String::as_str).collect();
        let sql = build_insert_sql(&self.tbl, &cols, args.len() / n_cols);

        let result = self
            .conn
            .exec_iter(sql.as_str(), my_params(args))
            .map_err(errw)?;
        Ok(result.affected_rows() as i64)
    }

    fn rows_per_batch(&self) -> usize {
        self.rows_per_batch
    }
}

struct MyRawExecer<'a> {
    conn: &'a mut Conn,
    sql: String,
    dest_meta: RecordMeta,
}

impl StmtExecer for MyRawExecer<'_> {
    fn dest_meta(&self) -> &RecordMeta {
        &self.dest_meta
    }

    fn exec(&mut self, args: &[Value]) -> Result<i64> {
        let result = self
            .conn
            .exec_iter(self.sql.as_str(), my_params(args))
            .map_err(errw)?;
        Ok(result.affected_rows() as i64)
    }

    fn rows_per_batch(&self) -> usize {
        1
    }
}

/// MySQL cannot express OFFSET without LIMIT; the documented idiom is a
/// huge row count.
fn render_range(_dialect: &crate::dialect::Dialect, range: &Range) -> String {
    let start = range.start.unwrap_or(0);
    match range.end {
        Some(end) => format!("LIMIT {} OFFSET {}", end - start, start),
        None => format!("LIMIT 18446744073709551615 OFFSET {start}"),
    }
}

fn build_insert_sql(tbl: &str, cols: &[&str], n_rows: usize) -> String {
    let quoted: Vec<String> = cols.iter().map(|c| dialect::backtick_quote(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect::backtick_quote(tbl),
        quoted.join(", "),
        dialect::placeholders_question(cols.len(), n_rows)
    )
}

fn render_col_def(col: &ColDef) -> String {
    let mut s = format!(
        "{} {}",
        dialect::backtick_quote(&col.name),
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
        Kind::Int => "BIGINT",
        Kind::Float => "DOUBLE",
        Kind::Decimal => "DECIMAL(65,30)",
        Kind::Bool => "TINYINT(1)",
        Kind::Bytes => "BLOB",
        Kind::Datetime => "DATETIME",
        Kind::Date => "DATE",
        Kind::Time => "TIME",
        Kind::Text | Kind::Null | Kind::Unknown => "TEXT",
    }
}

fn kind_of_column(col: &Column) -> Kind {
    use ColumnType::*;
    match col.column_type() {
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_LONG | MYSQL_TYPE_LONGLONG
        | MYSQL_TYPE_INT24 | MYSQL_TYPE_YEAR => Kind::Int,
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => Kind::Float,
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => Kind::Decimal,
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => Kind::Date,
        MYSQL_TYPE_TIME => Kind::Time,
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIMESTAMP => Kind::Datetime,
        MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB
        | MYSQL_TYPE_BLOB => {
            if col.flags().contains(ColumnFlags::BINARY_FLAG) {
                Kind::Bytes
            } else {
                Kind::Text
            }
        }
        _ => Kind::Text,
    }
}

fn kind_from_db_type(data_type: &str) -> Kind {
    match data_type.to_ascii_lowercase().as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "bigint" | "year" => Kind::Int,
        "float" | "double" => Kind::Float,
        "decimal" | "numeric" => Kind::Decimal,
        "date" => Kind::Date,
        "time" => Kind::Time,
        "datetime" | "timestamp" => Kind::Datetime,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => Kind::Bytes,
        _ => Kind::Text,
    }
}

fn build_meta(columns: &[Column]) -> RecordMeta {
    let names: Vec<String> = columns
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let munged = munge_result_col_names(&name_refs);

    let fields = columns
        .iter()
        .enumerate()
        .map(|(i, col)| FieldMeta {
            munged_name: munged[i].clone(),
            name: names[i].clone(),
            kind: kind_of_column(col),
            db_type_name: format!("{:?}", col.column_type()),
            nullable: Some(!col.flags().contains(ColumnFlags::NOT_NULL_FLAG)),
        })
        .collect();
    RecordMeta::new(fields)
}

fn scan_row(row: Row, meta: &RecordMeta) -> Result<Record> {
    let values = row.unwrap();
    let mut rec = Vec::with_capacity(values.len());

    for (i, raw) in values.into_iter().enumerate() {
        let kind = meta[i].kind;
        let val = match raw {
            MyValue::NULL => Value::Null,
            MyValue::Int(v) => match kind {
                Kind::Bool => Value::Bool(v != 0),
                _ => Value::Int(v),
            },
            MyValue::UInt(v) => Value::Int(v as i64),
            MyValue::Float(v) => Value::Float(v as f64),
            MyValue::Double(v) => Value::Float(v),
            MyValue::Bytes(bytes) => match kind {
                Kind::Bytes => Value::Bytes(bytes),
                Kind::Decimal => {
                    let s = String::from_utf8_lossy(&bytes);
                    Decimal::parse(&s).map(Value::Decimal).map_err(|e| {
                        SqError::type_mismatch(format!(
                            "column `{}`: bad decimal {s:?}: {e}",
                            meta[i].name
                        ))
                    })?
                }
                _ => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
            },
            MyValue::Date(y, mo, d, h, mi, s, us) => {
                if kind == Kind::Date && h == 0 && mi == 0 && s == 0 {
                    match NaiveDate::from_ymd_opt(y as i32, mo as u32, d as u32) {
                        Some(date) => Value::Date(date),
                        None => Value::Null,
                    }
                } else {
                    let dt = NaiveDate::from_ymd_opt(y as i32, mo as u32, d as u32)
                        .and_then(|date| {
                            date.and_hms_micro_opt(h as u32, mi as u32, s as u32, us)
                        });
                    match dt {
                        Some(ndt) => Value::Datetime(Utc.from_utc_datetime(&ndt)),
                        None => Value::Null,
                    }
                }
            }
            MyValue::Time(neg, days, h, mi, s, us) => {
                if neg || days > 0 {
                    // Durations beyond a day fall back to text.
                    Value::Text(format!("{}{}d {h:02}:{mi:02}:{s:02}", if neg { "-" } else { "" }, days))
                } else {
                    match NaiveTime::from_hms_micro_opt(h as u32, mi as u32, s as u32, us) {
                        Some(t) => Value::Time(t),
                        None => Value::Null,
                    }
                }
            }
        };
        rec.push(val);
    }
    Ok(rec)
}

fn my_params(args: &[Value]) -> Params {
    if args.is_empty() {
        return Params::Empty;
    }
    let vals: Vec<MyValue> = args
        .iter()
        .map(|v| match v {
            Value::Null => MyValue::NULL,
            Value::Bool(b) => MyValue::Int(i64::from(*b)),
            Value::Int(i) => MyValue::Int(*i),
            Value::Float(f) => MyValue::Double(*f),
            Value::Decimal(d) => MyValue::Bytes(d.to_string().into_bytes()),
            Value::Text(s) => MyValue::Bytes(s.clone().into_bytes()),
            Value::Bytes(b) => MyValue::Bytes(b.clone()),
            Value::Date(d) => {
                MyValue::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
            }
            Value::Time(t) => MyValue::Time(
                false,
                0,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
                t.nanosecond() / 1_000,
            ),
            Value::Datetime(dt) => {
                let n = dt.naive_utc();
                MyValue::Date(
                    n.year() as u16,
                    n.month() as u8,
                    n.day() as u8,
                    n.hour() as u8,
                    n.minute() as u8,
                    n.second() as u8,
                    n.nanosecond() / 1_000,
                )
            }
        })
        .collect();
    Params::Positional(vals)
}

/// Classifies a mysql error by server error code.
pub(crate) fn errw(err: ::mysql::Error) -> eyre::Report {
    if let ::mysql::Error::MySqlError(ref server_err) = err {
        let kind = match server_err.code {
            1049 | 1051 | 1054 | 1146 => ErrorKind::NotExist,
            1044 | 1045 | 1142 | 1227 => ErrorKind::Auth,
            _ => ErrorKind::DbError,
        };
        return SqError::with_code(kind, server_err.message.clone(), server_err.code.to_string())
            .into();
    }
    if matches!(err, ::mysql::Error::IoError(_)) {
        return SqError::io(err.to_string()).into();
    }
    SqError::db(err.to_string()).into()
}
