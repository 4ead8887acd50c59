//! End-to-end pipeline-query tests against real temp SQLite databases.
//!
//! Each case compiles a query, checks the rendered SQL where specified,
//! executes it through the full stack (collection → pool → driver →
//! record sink), and verifies the result stream. This mirrors how the
//! tool is actually driven, rather than poking at internals.

mod common;

use common::{seed_address, seed_person, seed_sakila, ACTOR_COUNT};
use hashbrown::HashMap;
use sq::engine::{exec_slq, exec_slq_insert, slq_to_sql};
use sq::error::is_not_exist;
use sq::record::sink::RecordBuffer;
use sq::record::Value;
use sq::run::Run;
use sq::source::collection::Collection;
use sq::source::{DriverType, Source};
use tempfile::TempDir;

/// One rendering/execution case. `want_sql` empty means the SQL is not
/// asserted (but the query still runs). `want_rec_count` is skipped when
/// `skip_exec` is set.
struct QueryCase {
    name: &'static str,
    input: &'static str,
    args: &'static [(&'static str, &'static str)],
    want_sql: &'static str,
    want_rec_count: usize,
    skip_exec: bool,
}

const CASES: &[QueryCase] = &[
    QueryCase {
        name: "select all",
        input: "@sakila.actor",
        args: &[],
        want_sql: r#"SELECT * FROM "actor""#,
        want_rec_count: ACTOR_COUNT,
        skip_exec: false,
    },
    QueryCase {
        name: "range",
        input: "@sakila.actor | .[0:5]",
        args: &[],
        want_sql: r#"SELECT * FROM "actor" LIMIT 5 OFFSET 0"#,
        want_rec_count: 5,
        skip_exec: false,
    },
    QueryCase {
        name: "single row index",
        input: "@sakila.actor | .[2]",
        args: &[],
        want_sql: r#"SELECT * FROM "actor" LIMIT 1 OFFSET 2"#,
        want_rec_count: 1,
        skip_exec: false,
    },
    QueryCase {
        name: "where and projection",
        input: "@sakila.actor | where(.actor_id == 1) | .first_name",
        args: &[],
        want_sql: r#"SELECT "first_name" FROM "actor" WHERE "actor_id" = ?"#,
        want_rec_count: 1,
        skip_exec: false,
    },
    QueryCase {
        name: "count star",
        input: "@sakila.actor | count()",
        args: &[],
        want_sql: r#"SELECT COUNT(*) FROM "actor""#,
        want_rec_count: 1,
        skip_exec: false,
    },
    QueryCase {
        name: "order by desc with range",
        input: "@sakila.actor | order_by(.actor_id desc) | .[0:3]",
        args: &[],
        want_sql: r#"SELECT * FROM "actor" ORDER BY "actor_id" DESC LIMIT 3 OFFSET 0"#,
        want_rec_count: 3,
        skip_exec: false,
    },
    QueryCase {
        name: "same-source join",
        input: "@sakila.actor | join(.film_actor, .actor_id) | .[0:10]",
        args: &[],
        want_sql: "",
        want_rec_count: 10,
        skip_exec: false,
    },
    QueryCase {
        name: "group by aggregate",
        input: "@sakila.film_actor | group_by(.actor_id) | .actor_id, count() | .[0:7]",
        args: &[],
        want_sql: "",
        want_rec_count: 7,
        skip_exec: false,
    },
    QueryCase {
        name: "query args",
        input: "@sakila.actor | where(.first_name == $fname)",
        args: &[("fname", "PENELOPE")],
        want_sql: r#"SELECT * FROM "actor" WHERE "first_name" = ?"#,
        want_rec_count: 1,
        skip_exec: false,
    },
    QueryCase {
        name: "arithmetic in where",
        input: "@sakila.actor | where(.actor_id * 2 <= 10)",
        args: &[],
        want_sql: r#"SELECT * FROM "actor" WHERE "actor_id" * ? <= ?"#,
        want_rec_count: 5,
        skip_exec: false,
    },
    QueryCase {
        name: "aggregates",
        input: "@sakila.actor | max(.actor_id), min(.actor_id)",
        args: &[],
        want_sql: r#"SELECT MAX("actor_id"), MIN("actor_id") FROM "actor""#,
        want_rec_count: 1,
        skip_exec: false,
    },
    QueryCase {
        name: "unbounded range start",
        input: "@sakila.actor | .[190:]",
        args: &[],
        want_sql: r#"SELECT * FROM "actor" LIMIT -1 OFFSET 190"#,
        want_rec_count: 10,
        skip_exec: false,
    },
];

fn sakila_run(dir: &TempDir) -> Run {
    let db_path = dir.path().join("sakila.db");
    seed_sakila(&db_path);

    let mut coll = Collection::new();
    coll.add(Source::new(
        "@sakila",
        DriverType::Sqlite3,
        format!("sqlite3://{}", db_path.display()),
    ))
    .unwrap();
    coll.set_active("@sakila").unwrap();
    Run::new(coll).unwrap()
}

#[test]
fn query_cases() {
    let dir = tempfile::tempdir().unwrap();
    let run = sakila_run(&dir);

    for case in CASES {
        let mut args = HashMap::new();
        for (k, v) in case.args {
            args.insert((*k).to_string(), (*v).to_string());
        }
        let qc = run.query_context(args);

        let got_sql = slq_to_sql(&qc, case.input)
            .unwrap_or_else(|e| panic!("{}: compile failed: {e}", case.name));
        if !case.want_sql.is_empty() {
            assert_eq!(got_sql, case.want_sql, "{}", case.name);
        }

        if case.skip_exec {
            continue;
        }
        let mut sink = RecordBuffer::new();
        exec_slq(&qc, case.input, &mut sink, &run.cancel)
            .unwrap_or_else(|e| panic!("{}: exec failed: {e}", case.name));
        assert_eq!(sink.recs.len(), case.want_rec_count, "{}", case.name);
    }

    run.close().unwrap();
}

#[test]
fn where_projection_yields_penelope() {
    let dir = tempfile::tempdir().unwrap();
    let run = sakila_run(&dir);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(
        &qc,
        "@sakila.actor | where(.actor_id == 1) | .first_name",
        &mut sink,
        &run.cancel,
    )
    .unwrap();

    assert_eq!(sink.recs.len(), 1);
    assert_eq!(sink.recs[0][0], Value::Text("PENELOPE".into()));
    assert_eq!(sink.rec_meta().munged_names(), vec!["first_name"]);

    run.close().unwrap();
}

#[test]
fn count_returns_actor_count() {
    let dir = tempfile::tempdir().unwrap();
    let run = sakila_run(&dir);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, "@sakila.actor | count()", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs[0][0], Value::Int(ACTOR_COUNT as i64));

    run.close().unwrap();
}

#[test]
fn bare_table_uses_active_source() {
    let dir = tempfile::tempdir().unwrap();
    let run = sakila_run(&dir);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, ".actor | .[0:5]", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs.len(), 5);

    run.close().unwrap();
}

#[test]
fn unknown_table_is_not_exist() {
    let dir = tempfile::tempdir().unwrap();
    let run = sakila_run(&dir);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    let err = exec_slq(&qc, "@sakila.does_not_exist", &mut sink, &run.cancel).unwrap_err();
    assert!(is_not_exist(&err), "got: {err:?}");

    run.close().unwrap();
}

#[test]
fn unknown_handle_is_not_exist() {
    let dir = tempfile::tempdir().unwrap();
    let run = sakila_run(&dir);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    let err = exec_slq(&qc, "@ghost.actor", &mut sink, &run.cancel).unwrap_err();
    assert!(is_not_exist(&err));

    run.close().unwrap();
}

#[test]
fn cross_source_join_materializes_through_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let person_path = dir.path().join("people.db");
    let address_path = dir.path().join("addresses.db");
    seed_person(&person_path);
    seed_address(&address_path);

    let mut coll = Collection::new();
    coll.add(Source::new(
        "@people",
        DriverType::Sqlite3,
        format!("sqlite3://{}", person_path.display()),
    ))
    .unwrap();
    coll.add(Source::new(
        "@addresses",
        DriverType::Sqlite3,
        format!("sqlite3://{}", address_path.display()),
    ))
    .unwrap();
    let run = Run::new(coll).unwrap();
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(
        &qc,
        "@people.person | join(@addresses.address, .uid) | .username, .city",
        &mut sink,
        &run.cancel,
    )
    .unwrap();

    assert_eq!(sink.recs.len(), 2);
    assert_eq!(sink.rec_meta().munged_names(), vec!["username", "city"]);
    assert_eq!(sink.recs[0][0], Value::Text("neilotoole".into()));
    assert_eq!(sink.recs[0][1], Value::Text("Washington".into()));

    run.close().unwrap();
}

#[test]
fn left_join_keeps_unmatched_rows() {
    let dir = tempfile::tempdir().unwrap();
    let person_path = dir.path().join("people.db");
    let address_path = dir.path().join("addresses.db");
    seed_person(&person_path);
    seed_address(&address_path);

    let mut coll = Collection::new();
    coll.add(Source::new(
        "@people",
        DriverType::Sqlite3,
        format!("sqlite3://{}", person_path.display()),
    ))
    .unwrap();
    coll.add(Source::new(
        "@addresses",
        DriverType::Sqlite3,
        format!("sqlite3://{}", address_path.display()),
    ))
    .unwrap();
    let run = Run::new(coll).unwrap();
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(
        &qc,
        "@people.person | left_join(@addresses.address, .uid) | .username, .city",
        &mut sink,
        &run.cancel,
    )
    .unwrap();

    // Three people, one without an address.
    assert_eq!(sink.recs.len(), 3);
    assert!(sink.recs.iter().any(|r| r[1] == Value::Null));

    run.close().unwrap();
}

#[test]
fn insert_into_other_source() {
    let dir = tempfile::tempdir().unwrap();
    let sakila_path = dir.path().join("sakila.db");
    seed_sakila(&sakila_path);
    let dest_path = dir.path().join("dest.db");

    let mut coll = Collection::new();
    coll.add(Source::new(
        "@sakila",
        DriverType::Sqlite3,
        format!("sqlite3://{}", sakila_path.display()),
    ))
    .unwrap();
    coll.add(Source::new(
        "@dest",
        DriverType::Sqlite3,
        format!("sqlite3://{}", dest_path.display()),
    ))
    .unwrap();
    let run = Run::new(coll).unwrap();

    let qc = run.query_context(HashMap::new());
    let dest_src = run.collection.get("@dest").unwrap().clone();
    let affected = exec_slq_insert(
        &qc,
        "@sakila.actor | .[0:25]",
        &dest_src,
        "actor_copy",
        &run.cancel,
    )
    .unwrap();
    assert_eq!(affected, 25);

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, "@dest.actor_copy | count()", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs[0][0], Value::Int(25));

    run.close().unwrap();
}
