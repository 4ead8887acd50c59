//! # Query Orchestration
//!
//! Ties the pipeline together: resolve handles against the collection,
//! open databases through the context's openers, compile the query for
//! the target dialect, execute, and stream records into the caller's
//! sink.
//!
//! Single-source queries run directly on that source's database. When a
//! query joins across sources, every referenced table is first
//! materialized (streaming, via batch insert) into the scratch join
//! database and the join runs there, in SQLite's dialect.
//!
//! Databases opened here come from the pool and stay open for the life of
//! the run; nothing is closed per query.

use crate::cancel::CancelToken;
use crate::driver::{
    Database, DbOpener, JoinDbOpener, ScratchDbOpener, TableDef,
};
use crate::error::SqError;
use crate::record::batch::BatchInsert;
use crate::record::meta::RecordMeta;
use crate::record::sink::RecordSink;
use crate::record::{Record, Value};
use crate::slq::ast::{Query, Segment};
use crate::slq::{parse, render};
use crate::source::collection::Collection;
use crate::source::Source;
use bumpalo::Bump;
use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Everything a query needs, immutable once compilation starts.
pub struct QueryContext<'a> {
    pub collection: &'a Collection,
    pub db_opener: &'a dyn DbOpener,
    pub join_db_opener: &'a dyn JoinDbOpener,
    pub scratch_db_opener: &'a dyn ScratchDbOpener,
    /// `--arg k v` values, substituted for `$k` in the query text.
    pub args: HashMap<String, String>,
}

/// Compiles `slq_text` and returns the SQL that would execute, without
/// running it. Databases are still opened (document sources must ingest
/// before their dialect is known to be scratch-backed).
pub fn slq_to_sql(qc: &QueryContext<'_>, slq_text: &str) -> Result<String> {
    let arena = Bump::new();
    let query = parse(&arena, slq_text)?;
    let plan = plan_query(qc, &query)?;
    Ok(plan.sql)
}

/// Executes `slq_text`, streaming result records into `sink`. Returns the
/// row count.
pub fn exec_slq(
    qc: &QueryContext<'_>,
    slq_text: &str,
    sink: &mut dyn RecordSink,
    cancel: &CancelToken,
) -> Result<u64> {
    let arena = Bump::new();
    let query = parse(&arena, slq_text)?;
    let plan = plan_query(qc, &query)?;

    for (src, tbl) in &plan.materialize {
        materialize_table(qc, src, tbl, &plan.db, cancel)
            .wrap_err_with(|| format!("materialize {}.{tbl}", src.handle))?;
    }

    debug!(sql = %plan.sql, "execute query");
    plan.db.query(&plan.sql, &plan.params, sink, cancel)
}

/// Raw SQL passthrough (`sq sql`): execute as-is on `db`.
pub fn exec_sql(
    db: &Database,
    sql: &str,
    sink: &mut dyn RecordSink,
    cancel: &CancelToken,
) -> Result<u64> {
    db.query(sql, &[], sink, cancel)
}

/// Executes `slq_text` and batch-inserts the results into `dest_tbl` on
/// `dest_src`, creating the table when it doesn't exist. Returns rows
/// inserted.
///
/// The result set is staged in memory before writing: source and
/// destination may be the same database, whose single connection cannot
/// be read and written concurrently.
pub fn exec_slq_insert(
    qc: &QueryContext<'_>,
    slq_text: &str,
    dest_src: &Source,
    dest_tbl: &str,
    cancel: &CancelToken,
) -> Result<i64> {
    let mut buf = crate::record::sink::RecordBuffer::new();
    exec_slq(qc, slq_text, &mut buf, cancel)?;
    let Some(meta) = buf.meta else {
        return Ok(0);
    };

    let dest_db = qc.db_opener.open_db(dest_src)?;
    let names: Vec<String> = meta.munged_names().iter().map(|s| s.to_string()).collect();

    let exists = dest_db.with_conn(|drvr, conn| drvr.table_exists(conn, dest_tbl))?;
    if !exists {
        let def = TableDef::from_kinds(dest_tbl, &names, &meta.kinds());
        dest_db
            .with_conn(|drvr, conn| drvr.create_table(conn, &def))
            .wrap_err_with(|| format!("create destination table \"{dest_tbl}\""))?;
    }

    let mut bi = BatchInsert::new(dest_db, dest_tbl, names, 250, cancel.clone());
    for rec in buf.recs {
        bi.send(rec)?;
    }
    bi.finish()
}

struct QueryPlan {
    db: Arc<Database>,
    sql: String,
    params: Vec<Value>,
    /// (source, table) pairs to stage into the join database first.
    materialize: Vec<(Source, String)>,
}

fn plan_query(qc: &QueryContext<'_>, query: &Query<'_>) -> Result<QueryPlan> {
    let primary = resolve_source(qc, query.table.handle)?;

    // Collect the distinct sources the query touches, primary first.
    let mut sources: Vec<Source> = vec![primary.clone()];
    let mut tables: Vec<(Source, String)> = vec![(primary.clone(), query.table.table.to_string())];
    for seg in query.segments {
        if let Segment::Join(join) = seg {
            let src = resolve_source(qc, join.target.handle.or(Some(primary.handle.as_str())))?;
            if !sources.iter().any(|s| s.handle == src.handle) {
                sources.push(src.clone());
            }
            tables.push((src, join.target.table.to_string()));
        }
    }

    if sources.len() == 1 {
        let db = qc.db_opener.open_db(&primary)?;
        let drvr = db.sql_driver();
        let (sql, params) = render(query, &db.dialect(), &drvr.renderer(), &qc.args)?;
        return Ok(QueryPlan {
            db,
            sql,
            params,
            materialize: Vec::new(),
        });
    }

    // Cross-source: stage everything into the scratch join database and
    // run the join locally.
    let src_refs: Vec<&Source> = sources.iter().collect();
    let join_db = qc.join_db_opener.open_join(&src_refs)?;
    let drvr = join_db.sql_driver();
    let (sql, params) = render(query, &join_db.dialect(), &drvr.renderer(), &qc.args)?;

    Ok(QueryPlan {
        db: join_db,
        sql,
        params,
        materialize: tables,
    })
}

fn resolve_source(qc: &QueryContext<'_>, handle: Option<&str>) -> Result<Source> {
    match handle {
        Some(h) => Ok(qc.collection.get(h)?.clone()),
        None => qc
            .collection
            .active()
            .cloned()
            .ok_or_else(|| SqError::not_exist("no active source (and no @handle in query)").into()),
    }
}

/// Copies `src.tbl` into the join database, streaming rows through a
/// batch insert.
fn materialize_table(
    qc: &QueryContext<'_>,
    src: &Source,
    tbl: &str,
    join_db: &Arc<Database>,
    cancel: &CancelToken,
) -> Result<()> {
    let src_db = qc.db_opener.open_db(src)?;
    let meta = src_db.with_conn(|drvr, conn| drvr.table_column_meta(conn, tbl, &[]))?;

    let names: Vec<String> = meta.names().iter().map(|s| s.to_string()).collect();
    let def = TableDef::from_kinds(tbl, &names, &meta.kinds());
    join_db.with_conn(|drvr, conn| {
        drvr.drop_table(conn, tbl, true)?;
        drvr.create_table(conn, &def)
    })?;

    debug!(handle = %src.handle, tbl, "materialize into join db");

    let mut bi = BatchInsert::new(join_db.clone(), tbl, names, 250, cancel.clone());
    let sql = format!("SELECT * FROM {}", src_db.dialect().enquote(tbl));
    let mut feed = FeedSink { bi: &mut bi };
    src_db.query(&sql, &[], &mut feed, cancel)?;
    bi.finish()?;
    Ok(())
}

/// Forwards a record stream into a batch insert.
struct FeedSink<'a> {
    bi: &'a mut BatchInsert,
}

impl RecordSink for FeedSink<'_> {
    fn meta(&mut self, _meta: &RecordMeta) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, rec: Record) -> Result<()> {
        self.bi.send(rec)
    }
}
