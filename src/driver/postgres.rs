//! # PostgreSQL Driver
//!
//! Speaks to PostgreSQL via the synchronous `postgres` client. Numbered
//! `$n` placeholders, double-quote identifiers, the full join set.
//!
//! NUMERIC values arrive in postgres's binary wire format (base-10000
//! digit groups); [`PgNumeric`] decodes them into the fixed-point
//! [`Decimal`] scan target without a float round trip.

use super::{
    query_one_value, ColDef, Database, Driver, DriverMetadata, SqlConn, SqlDriver,
    StmtExecer, TableDef,
};
use crate::cancel::CancelToken;
use crate::dialect::{self, Dialect, ALL_JOINS, DEFAULT_OPS};
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
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use eyre::{Result, WrapErr};
use postgres::types::{FromSql, ToSql, Type};
use postgres::{Client, NoTls};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(PostgresDriver)
    }

    fn connect(&self, src: &Source) -> Result<Client> {
        Client::connect(&src.location, NoTls)
            .map_err(errw)
            .wrap_err_with(|| format!("open postgres source: {}", src.handle))
    }
}

impl Driver for PostgresDriver {
    fn metadata(&self) -> DriverMetadata {
        DriverMetadata {
            typ: DriverType::Postgres,
            description: "PostgreSQL",
            doc_url: "https://www.postgresql.org",
            is_sql: true,
            monotable: false,
            default_port: Some(5432),
        }
    }

    fn validate_source(&self, src: &Source) -> Result<Source> {
        if src.typ != DriverType::Postgres {
            return Err(SqError::invalid_source(format!(
                "expected driver type postgres but got {}",
                src.typ
            ))
            .into());
        }
        if !src.location.starts_with("postgres://") && !src.location.starts_with("postgresql://") {
            return Err(SqError::invalid_source(format!(
                "invalid postgres location: {}",
                src.redacted_location()
            ))
            .into());
        }
        Ok(src.clone())
    }

    fn open(&self, src: &Source, _cancel: &CancelToken) -> Result<Database> {
        debug!(handle = %src.handle, "open postgres source");
        let client = self.connect(src)?;
        Ok(Database::new(
            src.clone(),
            Arc::new(PostgresDriver) as Arc<dyn SqlDriver>,
            Box::new(PgConn { client }),
        ))
    }

    fn ping(&self, src: &Source, _cancel: &CancelToken) -> Result<()> {
        let mut client = self.connect(src)?;
        client
            .query_one("SELECT 1", &[])
            .map_err(errw)
            .map(|_| ())
            .wrap_err_with(|| format!("ping {}", src.handle))
    }

    fn truncate(
        &self,
        src: &Source,
        tbl: &str,
        reset: bool,
        _cancel: &CancelToken,
    ) -> Result<i64> {
        let mut client = self.connect(src)?;
        let quoted = dialect::double_quote(tbl);

        let count_sql = format!("SELECT COUNT(*) FROM {quoted}");
        let row = client.query_one(count_sql.as_str(), &[]).map_err(errw)?;
        let affected: i64 = row.get(0);

        let stmt = if reset {
            format!("TRUNCATE TABLE {quoted} RESTART IDENTITY")
        } else {
            format!("TRUNCATE TABLE {quoted}")
        };
        client
            .execute(stmt.as_str(), &[])
            .map_err(errw)
            .wrap_err_with(|| format!("truncate: failed to truncate \"{tbl}\""))?;
        Ok(affected)
    }

    fn as_sql(&self) -> Option<&dyn SqlDriver> {
        Some(self)
    }
}

impl SqlDriver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect {
            typ: DriverType::Postgres,
            placeholders: dialect::placeholders_dollar,
            placeholder: dialect::placeholder_dollar,
            enquote: dialect::double_quote,
            int_bool: false,
            max_batch_values: 1000,
            ops: &DEFAULT_OPS,
            joins: ALL_JOINS,
        }
    }

    fn renderer(&self) -> Renderer {
        Renderer {
            range: render_range,
            ..Renderer::default()
        }
    }

    fn current_schema(&self, conn: &mut dyn SqlConn) -> Result<String> {
        query_one_value(conn, "SELECT current_schema()", &[]).map(|v| v.render())
    }

    fn table_exists(&self, conn: &mut dyn SqlConn, tbl: &str) -> Result<bool> {
        let mut buf = RecordBuffer::new();
        conn.query(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1",
            &[Value::Text(tbl.to_string())],
            &mut buf,
            &CancelToken::new(),
        )?;
        Ok(matches!(buf.recs.first().and_then(|r| r.first()), Some(Value::Int(n)) if *n > 0))
    }

    fn table_column_meta(
        &self,
        conn: &mut dyn SqlConn,
        tbl: &str,
        cols: &[&str],
    ) -> Result<RecordMeta> {
        super::probe_column_meta(conn, &self.dialect(), tbl, cols, "LIMIT 1")
    }

    fn create_table(&self, conn: &mut dyn SqlConn, def: &TableDef) -> Result<()> {
        let cols: Vec<String> = def.cols.iter().map(render_col_def).collect();
        let sql = format!(
            "CREATE TABLE {} ({})",
            dialect::double_quote(&def.name),
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
        let from = dialect::double_quote(from_tbl);
        let to = dialect::double_quote(to_tbl);
        let sql = if copy_data {
            format!("CREATE TABLE {to} AS TABLE {from}")
        } else {
            format!("CREATE TABLE {to} AS TABLE {from} WITH NO DATA")
        };
        conn.exec(&sql, &[])
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
        let mut buf = RecordBuffer::new();
        conn.query(
            "SELECT name, setting FROM pg_settings \
             WHERE name IN ('server_version', 'TimeZone', 'max_connections', 'server_encoding') \
             ORDER BY name",
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
        let name = query_one_value(conn, "SELECT current_database()", &[])?.render();
        let schema = self.current_schema(conn)?;

        let mut md = SourceMetadata {
            handle: src.handle.clone(),
            driver: DriverType::Postgres,
            name,
            schema,
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
             WHERE table_schema = current_schema() ORDER BY table_name",
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
            "SELECT column_name, ordinal_position, data_type, udt_name, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
            &[Value::Text(tbl.to_string())],
            &mut buf,
            &CancelToken::new(),
        )?;

        if buf.recs.is_empty() {
            return Err(SqError::not_exist(format!("table not found: {tbl}")).into());
        }

        let mut pk_buf = RecordBuffer::new();
        conn.query(
            "SELECT kcu.column_name FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.table_schema = current_schema() \
               AND tc.table_name = $1 AND tc.constraint_type = 'PRIMARY KEY'",
            &[Value::Text(tbl.to_string())],
            &mut pk_buf,
            &CancelToken::new(),
        )?;
        let pk_cols: Vec<String> = pk_buf.recs.iter().map(|r| r[0].render()).collect();

        let columns = buf
            .recs
            .iter()
            .map(|r| {
                let name = r[0].render();
                let column_type = r[2].render();
                let base_type = r[3].render();
                ColMetadata {
                    primary_key: pk_cols.contains(&name),
                    kind: kind_from_db_type(&base_type),
                    position: r[1].as_int().unwrap_or(0),
                    nullable: r[4].render().eq_ignore_ascii_case("yes"),
                    name,
                    column_type,
                    base_type,
                }
            })
            .collect();

        let row_count = query_one_value(
            conn,
            &format!("SELECT COUNT(*) FROM {}", dialect::double_quote(tbl)),
            &[],
        )?
        .as_int()?;

        Ok(TableMetadata {
            name: tbl.to_string(),
            table_type: TableType::Table,
            row_count,
            columns,
        })
    }
}

pub struct PgConn {
    client: Client,
}

impl SqlConn for PgConn {
    fn ping(&mut self) -> Result<()> {
        self.client.query_one("SELECT 1", &[]).map_err(errw)?;
        Ok(())
    }

    fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        sink: &mut dyn RecordSink,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let stmt = self.client.prepare(sql).map_err(errw)?;

        let names: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let types: Vec<Type> = stmt.columns().iter().map(|c| c.type_().clone()).collect();
        let meta = build_meta(&names, &types);
        sink.meta(&meta)?;

        let boxed = pg_params(args);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();
        let rows = self.client.query(&stmt, &refs).map_err(errw)?;

        let mut count: u64 = 0;
        for row in rows {
            cancel.check()?;
            sink.record(scan_row(&row, &types)?)?;
            count += 1;
        }
        sink.flush()?;
        Ok(count)
    }

    fn exec(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        let boxed = pg_params(args);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();
        let affected = self.client.execute(sql, &refs).map_err(errw)?;
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
        self.client.prepare(&sql).map_err(errw)?;
        Ok(Box::new(PgStmtExecer {
            client: &mut self.client,
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
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", dialect::double_quote(c), i + 1))
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
        Ok(Box::new(PgRawExecer {
            client: &mut self.client,
            sql,
            dest_meta,
        }))
    }
}

struct PgStmtExecer<'a> {
    client: &'a mut Client,
    tbl: String,
    cols: Vec<String>,
    dest_meta: RecordMeta,
    rows_per_batch: usize,
}

impl StmtExecer for PgStmtExecer<'_> {
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

        let boxed = pg_params(args);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();
        let affected = self.client.execute(sql.as_str(), &refs).map_err(errw)?;
        Ok(affected as i64)
    }

    fn rows_per_batch(&self) -> usize {
        self.rows_per_batch
    }
}

struct PgRawExecer<'a> {
    client: &'a mut Client,
    sql: String,
    dest_meta: RecordMeta,
}

impl StmtExecer for PgRawExecer<'_> {
    fn dest_meta(&self) -> &RecordMeta {
        &self.dest_meta
    }

    fn exec(&mut self, args: &[Value]) -> Result<i64> {
        let boxed = pg_params(args);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();
        let affected = self.client.execute(self.sql.as_str(), &refs).map_err(errw)?;
        Ok(affected as i64)
    }

    fn rows_per_batch(&self) -> usize {
        1
    }
}

/// Unbounded ends render a bare OFFSET; postgres has no LIMIT -1 form.
fn render_range(_dialect: &crate::dialect::Dialect, range: &Range) -> String {
    let start = range.start.unwrap_or(0);
    match range.end {
        Some(end) => format!("LIMIT {} OFFSET {}", end - start, start),
        None => format!("OFFSET {start}"),
    }
}

fn build_insert_sql(tbl: &str, cols: &[&str], n_rows: usize) -> String {
    let quoted: Vec<String> = cols.iter().map(|c| dialect::double_quote(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect::double_quote(tbl),
        quoted.join(", "),
        dialect::placeholders_dollar(cols.len(), n_rows)
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
        Kind::Int => "BIGINT",
        Kind::Float => "DOUBLE PRECISION",
        Kind::Decimal => "NUMERIC",
        Kind::Bool => "BOOLEAN",
        Kind::Bytes => "BYTEA",
        Kind::Datetime => "TIMESTAMPTZ",
        Kind::Date => "DATE",
        Kind::Time => "TIME",
        Kind::Text | Kind::Null | Kind::Unknown => "TEXT",
    }
}

fn kind_from_type(ty: &Type) -> Kind {
    match *ty {
        Type::BOOL => Kind::Bool,
        Type::INT2 | Type::INT4 | Type::INT8 => Kind::Int,
        Type::FLOAT4 | Type::FLOAT8 => Kind::Float,
        Type::NUMERIC => Kind::Decimal,
        Type::BYTEA => Kind::Bytes,
        Type::DATE => Kind::Date,
        Type::TIME => Kind::Time,
        Type::TIMESTAMP | Type::TIMESTAMPTZ => Kind::Datetime,
        _ => Kind::Text,
    }
}

/// Maps `udt_name` strings from information_schema into kinds.
fn kind_from_db_type(udt: &str) -> Kind {
    match udt {
        "bool" => Kind::Bool,
        "int2" | "int4" | "int8" => Kind::Int,
        "float4" | "float8" => Kind::Float,
        "numeric" => Kind::Decimal,
        "bytea" => Kind::Bytes,
        "date" => Kind::Date,
        "time" | "timetz" => Kind::Time,
        "timestamp" | "timestamptz" => Kind::Datetime,
        _ => Kind::Text,
    }
}

fn build_meta(names: &[String], types: &[Type]) -> RecordMeta {
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let munged = munge_result_col_names(&name_refs);
    let fields = names
        .iter()
        .enumerate()
        .map(|(i, name)| FieldMeta {
            munged_name: munged[i].clone(),
            name: name.clone(),
            kind: kind_from_type(&types[i]),
            db_type_name: types[i].name().to_string(),
            nullable: None,
        })
        .collect();
    RecordMeta::new(fields)
}

fn scan_row(row: &postgres::Row, types: &[Type]) -> Result<Record> {
    let mut rec = Vec::with_capacity(types.len());
    for (i, ty) in types.iter().enumerate() {
        let val = match *ty {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(i)
                .map_err(errw)?
                .map_or(Value::Null, |v| Value::Int(v as i64)),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(i)
                .map_err(errw)?
                .map_or(Value::Null, |v| Value::Int(v as i64)),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Int),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(i)
                .map_err(errw)?
                .map_or(Value::Null, |v| Value::Float(v as f64)),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Float),
            Type::NUMERIC => row
                .try_get::<_, Option<PgNumeric>>(i)
                .map_err(errw)?
                .map_or(Value::Null, |v| Value::Decimal(v.0)),
            Type::BYTEA => row
                .try_get::<_, Option<Vec<u8>>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Bytes),
            Type::DATE => row
                .try_get::<_, Option<NaiveDate>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Date),
            Type::TIME => row
                .try_get::<_, Option<NaiveTime>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Time),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(i)
                .map_err(errw)?
                .map_or(Value::Null, |v| Value::Datetime(Utc.from_utc_datetime(&v))),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<DateTime<Utc>>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Datetime),
            _ => row
                .try_get::<_, Option<String>>(i)
                .map_err(errw)?
                .map_or(Value::Null, Value::Text),
        };
        rec.push(val);
    }
    Ok(rec)
}

fn pg_params(args: &[Value]) -> Vec<Box<dyn ToSql + Sync>> {
    args.iter()
        .map(|v| -> Box<dyn ToSql + Sync> {
            match v {
                Value::Null => Box::new(Option::<String>::None),
                Value::Bool(b) => Box::new(*b),
                Value::Int(i) => Box::new(*i),
                Value::Float(f) => Box::new(*f),
                // NUMERIC params round-trip through float8; postgres casts
                // on assignment.
                Value::Decimal(d) => Box::new(d.to_string().parse::<f64>().unwrap_or(0.0)),
                Value::Text(s) => Box::new(s.clone()),
                Value::Bytes(b) => Box::new(b.clone()),
                Value::Date(d) => Box::new(*d),
                Value::Time(t) => Box::new(*t),
                Value::Datetime(dt) => Box::new(*dt),
            }
        })
        .collect()
}

/// Decodes postgres's binary NUMERIC format: a sequence of base-10000
/// digit groups with a decimal weight and scale.
struct PgNumeric(Decimal);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let rd_i16 = |off: usize| -> i16 {
            i16::from_be_bytes([raw[off], raw[off + 1]])
        };
        if raw.len() < 8 {
            return Err("numeric: short buffer".into());
        }

        let n_digits = rd_i16(0) as usize;
        let weight = rd_i16(2) as i32;
        let sign = rd_i16(4) as u16;
        let dscale = rd_i16(6) as i32;
        if raw.len() < 8 + n_digits * 2 {
            return Err("numeric: short digit buffer".into());
        }
        if sign == 0xC000 {
            return Err("numeric: NaN not representable".into());
        }

        let mut acc: i128 = 0;
        for i in 0..n_digits {
            acc = acc
                .checked_mul(10_000)
                .and_then(|a| a.checked_add(rd_i16(8 + i * 2) as i128))
                .ok_or("numeric: exceeds 38 digits")?;
        }

        // acc currently carries 4*(n_digits - 1 - weight) fractional
        // digits; rescale to dscale.
        let frac = if n_digits == 0 {
            0
        } else {
            4 * (n_digits as i32 - 1 - weight)
        };
        let mut shift = dscale - frac;
        while shift > 0 {
            acc = acc.checked_mul(10).ok_or("numeric: exceeds 38 digits")?;
            shift -= 1;
        }
        while shift < 0 {
            acc /= 10;
            shift += 1;
        }

        if sign == 0x4000 {
            acc = -acc;
        }
        Ok(PgNumeric(Decimal::new(acc, dscale.max(0) as u32)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Classifies a postgres error: SQLSTATE first, then message.
pub(crate) fn errw(err: postgres::Error) -> eyre::Report {
    if let Some(db_err) = err.as_db_error() {
        let code = db_err.code().code();
        let msg = db_err.message().to_string();
        let kind = match code {
            "42P01" | "42703" => ErrorKind::NotExist,
            "42501" => ErrorKind::Auth,
            c if c.starts_with("28") => ErrorKind::Auth,
            _ => ErrorKind::DbError,
        };
        return SqError::with_code(kind, msg, code).into();
    }
    SqError::db(err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &[u8]) -> Decimal {
        PgNumeric::from_sql(&Type::NUMERIC, raw).unwrap().0
    }

    fn numeric_bytes(n_digits: i16, weight: i16, sign: u16, dscale: i16, digits: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&n_digits.to_be_bytes());
        out.extend_from_slice(&weight.to_be_bytes());
        out.extend_from_slice(&(sign as i16).to_be_bytes());
        out.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            out.extend_from_slice(&d.to_be_bytes());
        }
        out
    }

    #[test]
    fn numeric_decode_simple() {
        // 123.45 = digits [123, 4500], weight 0, dscale 2
        let raw = numeric_bytes(2, 0, 0, 2, &[123, 4500]);
        assert_eq!(decode(&raw), Decimal::new(12345, 2));
    }

    #[test]
    fn numeric_decode_negative_and_integral() {
        // -7 = digits [7], weight 0, sign negative, dscale 0
        let raw = numeric_bytes(1, 0, 0x4000, 0, &[7]);
        assert_eq!(decode(&raw), Decimal::new(-7, 0));

        // 40000 = digits [4], weight 1, dscale 0
        let raw = numeric_bytes(1, 1, 0, 0, &[4]);
        assert_eq!(decode(&raw), Decimal::new(40_000, 0));
    }

    #[test]
    fn numeric_decode_zero() {
        let raw = numeric_bytes(0, 0, 0, 0, &[]);
        assert_eq!(decode(&raw), Decimal::new(0, 0));
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(kind_from_type(&Type::INT4), Kind::Int);
        assert_eq!(kind_from_type(&Type::NUMERIC), Kind::Decimal);
        assert_eq!(kind_from_type(&Type::VARCHAR), Kind::Text);
        assert_eq!(kind_from_db_type("timestamptz"), Kind::Datetime);
    }

    #[test]
    fn insert_sql_numbers_across_rows() {
        assert_eq!(
            build_insert_sql("t", &["a", "b"], 2),
            r#"INSERT INTO "t" ("a", "b") VALUES ($1,$2),($3,$4)"#
        );
    }
}
