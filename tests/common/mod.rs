//! Shared fixtures: a miniature film-rental dataset seeded into temp
//! SQLite files, mirroring the shape the query tests expect.

#![allow(dead_code)]

use rusqlite::Connection;
use std::path::Path;

pub const ACTOR_COUNT: usize = 200;

/// Seeds an `actor` + `film_actor` schema. Actor 1 is always
/// PENELOPE GUINESS; actor 2 is NICK WAHLBERG.
pub fn seed_sakila(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE actor (
             actor_id INTEGER PRIMARY KEY,
             first_name VARCHAR(45) NOT NULL,
             last_name VARCHAR(45) NOT NULL,
             last_update DATETIME NOT NULL
         );
         CREATE TABLE film_actor (
             actor_id INTEGER NOT NULL,
             film_id INTEGER NOT NULL,
             last_update DATETIME NOT NULL
         );",
    )
    .unwrap();

    let mut insert_actor = conn
        .prepare("INSERT INTO actor (actor_id, first_name, last_name, last_update) VALUES (?1, ?2, ?3, ?4)")
        .unwrap();
    let mut insert_fa = conn
        .prepare("INSERT INTO film_actor (actor_id, film_id, last_update) VALUES (?1, ?2, ?3)")
        .unwrap();

    const TS: &str = "2020-02-15 06:59:28";
    for i in 1..=ACTOR_COUNT as i64 {
        let (first, last) = match i {
            1 => ("PENELOPE".to_string(), "GUINESS".to_string()),
            2 => ("NICK".to_string(), "WAHLBERG".to_string()),
            _ => (format!("FIRST_{i}"), format!("LAST_{i}")),
        };
        insert_actor
            .execute(rusqlite::params![i, first, last, TS])
            .unwrap();
        insert_fa.execute(rusqlite::params![i, i * 2, TS]).unwrap();
    }
}

/// Seeds the two-source join fixture: `person` in one db, `address` in
/// another.
pub fn seed_person(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE person (uid INTEGER PRIMARY KEY, username TEXT NOT NULL);
         INSERT INTO person VALUES (1, 'neilotoole'), (2, 'ksoze'), (3, 'kubla');",
    )
    .unwrap();
}

pub fn seed_address(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE address (uid INTEGER NOT NULL, city TEXT NOT NULL);
         INSERT INTO address VALUES (1, 'Washington'), (2, 'Ulan Bator');",
    )
    .unwrap();
}
