//! Driver-contract tests exercised against SQLite, the one backend that
//! is always available. The same contract binds every SQL driver; the
//! backend-specific pieces (placeholder grammar, error codes, renderer
//! overrides) are covered by unit tests in their driver modules.

mod common;

use common::{seed_sakila, ACTOR_COUNT};
use sq::cancel::CancelToken;
use sq::driver::sqlite::SqliteDriver;
use sq::driver::{Database, Driver, SqlDriver};
use sq::error::is_not_exist;
use sq::kind::Kind;
use sq::record::batch::BatchInsert;
use sq::record::sink::RecordBuffer;
use sq::record::Value;
use sq::source::{DriverType, Source};
use std::sync::Arc;
use tempfile::TempDir;

fn sakila_db(dir: &TempDir) -> (Arc<SqliteDriver>, Source, Database) {
    let path = dir.path().join("sakila.db");
    seed_sakila(&path);

    let drvr = SqliteDriver::new();
    let src = Source::new(
        "@sakila",
        DriverType::Sqlite3,
        format!("sqlite3://{}", path.display()),
    );
    let db = drvr.open(&src, &CancelToken::new()).unwrap();
    (drvr, src, db)
}

fn row_count(db: &Database, tbl: &str) -> i64 {
    let mut buf = RecordBuffer::new();
    db.query(
        &format!("SELECT COUNT(*) FROM \"{tbl}\""),
        &[],
        &mut buf,
        &CancelToken::new(),
    )
    .unwrap();
    buf.recs[0][0].as_int().unwrap()
}

#[test]
fn ping_matches_open() {
    let dir = tempfile::tempdir().unwrap();
    let (drvr, src, db) = sakila_db(&dir);

    drvr.ping(&src, &CancelToken::new()).unwrap();
    db.ping().unwrap();
}

#[test]
fn validate_source_is_idempotent() {
    let drvr = SqliteDriver::new();
    let src = Source::new("@s", DriverType::Sqlite3, "sakila.db");

    let once = drvr.validate_source(&src).unwrap();
    let twice = drvr.validate_source(&once).unwrap();
    assert_eq!(once, twice);
    assert!(once.location.starts_with("sqlite3://"));
}

#[test]
fn copy_table_with_and_without_data() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    let copied = db
        .with_conn(|drvr, conn| drvr.copy_table(conn, "actor", "actor2", true))
        .unwrap();
    assert_eq!(copied, ACTOR_COUNT as i64);
    assert_eq!(row_count(&db, "actor2"), ACTOR_COUNT as i64);

    let copied = db
        .with_conn(|drvr, conn| drvr.copy_table(conn, "actor", "actor3", false))
        .unwrap();
    assert_eq!(copied, 0);
    assert_eq!(row_count(&db, "actor3"), 0);

    // Schema of the no-data copy matches the original.
    let meta_orig = db
        .with_conn(|drvr, conn| drvr.table_column_meta(conn, "actor", &[]))
        .unwrap();
    let meta_copy = db
        .with_conn(|drvr, conn| drvr.table_column_meta(conn, "actor3", &[]))
        .unwrap();
    assert_eq!(meta_orig.names(), meta_copy.names());
    assert_eq!(meta_orig.kinds(), meta_copy.kinds());
}

#[test]
fn drop_table_if_exists_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    db.with_conn(|drvr, conn| drvr.copy_table(conn, "actor", "doomed", false))
        .unwrap();
    db.with_conn(|drvr, conn| drvr.drop_table(conn, "doomed", true))
        .unwrap();

    // Nonexistent + if_exists: no-op.
    db.with_conn(|drvr, conn| drvr.drop_table(conn, "not_a_table", true))
        .unwrap();

    // Nonexistent without if_exists: NotExist.
    let err = db
        .with_conn(|drvr, conn| drvr.drop_table(conn, "not_a_table", false))
        .unwrap_err();
    assert!(is_not_exist(&err), "got: {err:?}");
}

#[test]
fn table_exists_and_current_schema() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    assert!(db
        .with_conn(|drvr, conn| drvr.table_exists(conn, "actor"))
        .unwrap());
    assert!(!db
        .with_conn(|drvr, conn| drvr.table_exists(conn, "no_such"))
        .unwrap());

    let schema = db.with_conn(|drvr, conn| drvr.current_schema(conn)).unwrap();
    assert_eq!(schema, "main");
}

#[test]
fn table_column_meta_full_and_subset() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    let meta = db
        .with_conn(|drvr, conn| drvr.table_column_meta(conn, "actor", &[]))
        .unwrap();
    assert_eq!(
        meta.names(),
        vec!["actor_id", "first_name", "last_name", "last_update"]
    );
    assert_eq!(
        meta.kinds(),
        vec![Kind::Int, Kind::Text, Kind::Text, Kind::Datetime]
    );

    let meta = db
        .with_conn(|drvr, conn| drvr.table_column_meta(conn, "actor", &["actor_id", "last_name"]))
        .unwrap();
    assert_eq!(meta.names(), vec!["actor_id", "last_name"]);
}

#[test]
fn batch_insert_with_non_divisor_batch_size() {
    // 70 deliberately doesn't divide 200, so the final flush is partial.
    const BATCH_SIZE: usize = 70;

    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    db.with_conn(|drvr, conn| drvr.copy_table(conn, "actor", "actor_bi", false))
        .unwrap();

    let mut source_rows = RecordBuffer::new();
    db.query("SELECT * FROM actor", &[], &mut source_rows, &CancelToken::new())
        .unwrap();

    let db = Arc::new(db);
    let cols: Vec<String> = source_rows
        .rec_meta()
        .names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut bi = BatchInsert::new(db.clone(), "actor_bi", cols, BATCH_SIZE, CancelToken::new());

    for rec in source_rows.recs.clone() {
        bi.send(rec).unwrap();
    }
    let affected = bi.finish().unwrap();

    assert_eq!(affected, ACTOR_COUNT as i64);
    assert_eq!(row_count(&db, "actor_bi"), ACTOR_COUNT as i64);
}

#[test]
fn batch_insert_reports_exec_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);
    let db = Arc::new(db);

    let mut bi = BatchInsert::new(
        db.clone(),
        "no_such_table",
        vec!["a".to_string()],
        10,
        CancelToken::new(),
    );
    // Either the send or the finish surfaces the failure.
    let send_err = bi.send(vec![Value::Int(1)]).is_err();
    let finish_err = bi.finish().is_err();
    assert!(send_err || finish_err);
}

#[test]
fn prepare_update_stmt_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    let affected = db
        .with_conn(|drvr, conn| {
            let mut execer = drvr.prepare_update_stmt(
                conn,
                "actor",
                &["first_name", "last_name"],
                "actor_id = ?",
            )?;
            assert_eq!(execer.dest_meta().names(), vec!["first_name", "last_name"]);

            let mut rec = vec![
                Value::Text("Kubla".into()),
                Value::Text("Khan".into()),
            ];
            execer.munge(&mut rec)?;
            rec.push(Value::Int(1));
            execer.exec(&rec)
        })
        .unwrap();
    assert_eq!(affected, 1);

    let mut buf = RecordBuffer::new();
    db.query(
        "SELECT first_name, last_name FROM actor WHERE actor_id = 1",
        &[],
        &mut buf,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(buf.recs[0][0], Value::Text("Kubla".into()));
    assert_eq!(buf.recs[0][1], Value::Text("Khan".into()));
}

#[test]
fn alter_table_add_and_rename() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    db.with_conn(|drvr, conn| drvr.copy_table(conn, "actor", "actor_alter", true))
        .unwrap();

    db.with_conn(|drvr, conn| drvr.alter_table_add_column(conn, "actor_alter", "col_int", Kind::Int))
        .unwrap();
    let meta = db
        .with_conn(|drvr, conn| drvr.table_column_meta(conn, "actor_alter", &[]))
        .unwrap();
    assert_eq!(meta.names().last().copied(), Some("col_int"));
    assert_eq!(meta.kinds().last().copied(), Some(Kind::Int));

    db.with_conn(|drvr, conn| {
        drvr.alter_table_rename_column(conn, "actor_alter", "first_name", "given_name")
    })
    .unwrap();
    db.with_conn(|drvr, conn| drvr.alter_table_rename(conn, "actor_alter", "actor_renamed"))
        .unwrap();

    let md = db.table_metadata("actor_renamed").unwrap();
    assert_eq!(md.row_count, ACTOR_COUNT as i64);
    assert!(md.column("given_name").is_some());
    assert!(md.column("first_name").is_none());
}

#[test]
fn truncate_deletes_all_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (drvr, src, db) = sakila_db(&dir);

    db.with_conn(|d, conn| d.copy_table(conn, "actor", "actor_trunc", true))
        .unwrap();

    let affected = drvr
        .truncate(&src, "actor_trunc", true, &CancelToken::new())
        .unwrap();
    assert_eq!(affected, ACTOR_COUNT as i64);
    assert_eq!(row_count(&db, "actor_trunc"), 0);
}

#[test]
fn source_metadata_lists_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);

    let md = db.source_metadata(false).unwrap();
    assert_eq!(md.schema, "main");
    assert_eq!(md.name, "sakila.db");

    let actor = md.table("actor").expect("actor table present");
    assert_eq!(actor.row_count, ACTOR_COUNT as i64);
    assert_eq!(actor.columns.len(), 4);
    assert_eq!(actor.columns[0].name, "actor_id");
    assert_eq!(actor.columns[0].kind, Kind::Int);
    assert!(actor.columns[0].primary_key);

    assert!(md.table("film_actor").is_some());
}

#[test]
fn source_metadata_is_safe_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, db) = sakila_db(&dir);
    let db = Arc::new(db);

    std::thread::scope(|scope| {
        for _ in 0..5 {
            let db = db.clone();
            scope.spawn(move || {
                let md = db.source_metadata(false).unwrap();
                assert_eq!(md.table("actor").unwrap().row_count, ACTOR_COUNT as i64);
            });
        }
    });
}

#[test]
fn dynamic_typing_coerces_per_declared_kind() {
    // A REAL column holding a parseable string still scans as Float.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dyn.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE scan_test (col1 REAL);
             INSERT INTO scan_test VALUES (NULL);
             INSERT INTO scan_test VALUES (7.5);
             INSERT INTO scan_test VALUES ('8.25');",
        )
        .unwrap();
    }

    let drvr = SqliteDriver::new();
    let src = Source::new(
        "@dyn",
        DriverType::Sqlite3,
        format!("sqlite3://{}", path.display()),
    );
    let db = drvr.open(&src, &CancelToken::new()).unwrap();

    let mut buf = RecordBuffer::new();
    db.query("SELECT col1 FROM scan_test", &[], &mut buf, &CancelToken::new())
        .unwrap();

    assert_eq!(buf.recs[0][0], Value::Null);
    assert_eq!(buf.recs[1][0], Value::Float(7.5));
    assert_eq!(buf.recs[2][0], Value::Float(8.25));
}

#[test]
fn uncoercible_value_is_type_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE scan_test (col1 REAL);
             INSERT INTO scan_test VALUES ('banana');",
        )
        .unwrap();
    }

    let drvr = SqliteDriver::new();
    let src = Source::new(
        "@bad",
        DriverType::Sqlite3,
        format!("sqlite3://{}", path.display()),
    );
    let db = drvr.open(&src, &CancelToken::new()).unwrap();

    let mut buf = RecordBuffer::new();
    let err = db
        .query("SELECT col1 FROM scan_test", &[], &mut buf, &CancelToken::new())
        .unwrap_err();
    assert!(sq::error::is_type_mismatch(&err), "got: {err:?}");

    // The tag carries table, column, and row index.
    let msg = err.to_string();
    assert!(msg.contains("scan_test"), "missing table: {msg}");
    assert!(msg.contains("col1"), "missing column: {msg}");
    assert!(msg.contains("row 0"), "missing row: {msg}");
}

#[test]
fn whitespace_column_names_survive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ws.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE actor (\"actor id\" INTEGER, \"first name\" TEXT);
             INSERT INTO actor VALUES (1, 'PENELOPE');",
        )
        .unwrap();
    }

    let drvr = SqliteDriver::new();
    let src = Source::new(
        "@ws",
        DriverType::Sqlite3,
        format!("sqlite3://{}", path.display()),
    );
    let db = drvr.open(&src, &CancelToken::new()).unwrap();

    let mut buf = RecordBuffer::new();
    db.query("SELECT * FROM actor", &[], &mut buf, &CancelToken::new())
        .unwrap();
    assert_eq!(buf.rec_meta().names(), vec!["actor id", "first name"]);
    assert_eq!(buf.rec_meta().munged_names(), vec!["actor id", "first name"]);
}
