//! Document-source ingest, end to end: CSV/TSV files (and spooled stdin)
//! flow through detection, sampling, kind inference, and scratch-table
//! ingest, then answer pipeline queries like any SQL source.

mod common;

use hashbrown::HashMap;
use sq::engine::exec_slq;
use sq::kind::Kind;
use sq::record::sink::RecordBuffer;
use sq::record::Value;
use sq::run::Run;
use sq::source::collection::Collection;
use sq::source::{DriverType, Source, STDIN_HANDLE};
use std::path::Path;

const ACTOR_CSV: &str = "\
actor_id,first_name,last_name,active
1,PENELOPE,GUINESS,true
2,NICK,WAHLBERG,false
3,ED,CHASE,true
4,JENNIFER,DAVIS,true
5,JOHNNY,LOLLOBRIGIDA,false
6,BETTE,NICHOLSON,true
7,GRACE,MOSTEL,true
8,MATTHEW,JOHANSSON,false
9,JOE,SWANK,true
10,CHRISTIAN,GABLE,true
11,ZERO,CAGE,false
12,KARL,BERRY,true
";

fn csv_run(dir: &Path, name: &str, content: &str, typ: DriverType) -> Run {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();

    let mut coll = Collection::new();
    coll.add(Source::new(
        "@data1",
        typ,
        path.to_string_lossy().into_owned(),
    ))
    .unwrap();
    coll.set_active("@data1").unwrap();
    Run::new(coll).unwrap()
}

#[test]
fn csv_ingests_and_answers_queries() {
    let dir = tempfile::tempdir().unwrap();
    let run = csv_run(dir.path(), "actor.csv", ACTOR_CSV, DriverType::Csv);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, ".data | .[0:10]", &mut sink, &run.cancel).unwrap();

    assert_eq!(sink.recs.len(), 10);
    assert_eq!(
        sink.rec_meta().munged_names(),
        vec!["actor_id", "first_name", "last_name", "active"]
    );
    // Kinds inferred from the data, not the header.
    assert_eq!(
        sink.rec_meta().kinds(),
        vec![Kind::Int, Kind::Text, Kind::Text, Kind::Bool]
    );
    assert_eq!(sink.recs[0][0], Value::Int(1));
    assert_eq!(sink.recs[0][1], Value::Text("PENELOPE".into()));
    assert_eq!(sink.recs[0][3], Value::Bool(true));

    run.close().unwrap();
}

#[test]
fn csv_where_and_count() {
    let dir = tempfile::tempdir().unwrap();
    let run = csv_run(dir.path(), "actor.csv", ACTOR_CSV, DriverType::Csv);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, ".data | count()", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs[0][0], Value::Int(12));

    let mut sink = RecordBuffer::new();
    exec_slq(
        &qc,
        ".data | where(.actor_id == 1) | .first_name",
        &mut sink,
        &run.cancel,
    )
    .unwrap();
    assert_eq!(sink.recs.len(), 1);
    assert_eq!(sink.recs[0][0], Value::Text("PENELOPE".into()));

    run.close().unwrap();
}

#[test]
fn csv_second_query_hits_ingest_cache() {
    let dir = tempfile::tempdir().unwrap();
    let run = csv_run(dir.path(), "actor.csv", ACTOR_CSV, DriverType::Csv);
    let qc = run.query_context(HashMap::new());

    for _ in 0..2 {
        let mut sink = RecordBuffer::new();
        exec_slq(&qc, ".data | count()", &mut sink, &run.cancel).unwrap();
        assert_eq!(sink.recs[0][0], Value::Int(12));
    }

    run.close().unwrap();
}

#[test]
fn tsv_uses_tab_delimiter() {
    let tsv = "uid\tcity\n1\tWashington\n2\tUlan Bator\n";
    let dir = tempfile::tempdir().unwrap();
    let run = csv_run(dir.path(), "cities.tsv", tsv, DriverType::Tsv);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, ".data", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs.len(), 2);
    assert_eq!(sink.rec_meta().munged_names(), vec!["uid", "city"]);
    assert_eq!(sink.recs[1][1], Value::Text("Ulan Bator".into()));

    run.close().unwrap();
}

#[test]
fn headerless_csv_gets_letter_columns() {
    let csv = "PENELOPE,GUINESS\nNICK,WAHLBERG\n";
    let dir = tempfile::tempdir().unwrap();
    let run = csv_run(dir.path(), "names.csv", csv, DriverType::Csv);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, ".data", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs.len(), 2);
    assert_eq!(sink.rec_meta().munged_names(), vec!["A", "B"]);

    run.close().unwrap();
}

#[test]
fn ragged_rows_pad_with_nulls() {
    let csv = "a,b,c\n1,2,3\n4,5\n6,7,8\n";
    let dir = tempfile::tempdir().unwrap();
    let run = csv_run(dir.path(), "ragged.csv", csv, DriverType::Csv);
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    exec_slq(&qc, ".data", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs.len(), 3);
    assert_eq!(sink.recs[1][2], Value::Null);
    assert_eq!(sink.recs[2][2], Value::Int(8));

    run.close().unwrap();
}

#[test]
fn stdin_source_ingests_from_spool() {
    let mut coll = Collection::new();
    coll.add(Source::new(STDIN_HANDLE, DriverType::Csv, STDIN_HANDLE))
        .unwrap();
    coll.set_active(STDIN_HANDLE).unwrap();

    let run = Run::new(coll).unwrap();
    run.files.add_stdin(ACTOR_CSV.as_bytes()).unwrap();

    let qc = run.query_context(HashMap::new());
    let mut sink = RecordBuffer::new();
    exec_slq(&qc, ".data | .[0:10]", &mut sink, &run.cancel).unwrap();
    assert_eq!(sink.recs.len(), 10);

    run.close().unwrap();
}

#[test]
fn missing_file_errors_not_exist() {
    let mut coll = Collection::new();
    coll.add(Source::new(
        "@ghost",
        DriverType::Csv,
        "/no/such/file.csv",
    ))
    .unwrap();
    let run = Run::new(coll).unwrap();
    let qc = run.query_context(HashMap::new());

    let mut sink = RecordBuffer::new();
    let err = exec_slq(&qc, "@ghost.data", &mut sink, &run.cancel).unwrap_err();
    assert!(sq::error::is_not_exist(&err), "got: {err:?}");

    run.close().unwrap();
}
