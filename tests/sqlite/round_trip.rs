//! Round Trip Tests
//!
//! - Writes and reads inside one transaction share the connection
//! - Every value type survives SQLite storage
//! - Single-row queries stop at the second row

use crate::common::*;
use crate::{count_users, sqlite_db};
use chrono::{DateTime, TimeZone, Utc};

#[test]
fn insert_and_read_back_in_one_transaction() {
    let db = sqlite_db();

    let user = db
        .transaction(Propagation::Required, || -> txflow::Result<Option<User>> {
            db.execute(
                "INSERT INTO users (account, active) VALUES (?, ?)",
                &params!["gugu", true],
            )?;
            // Only visible on the connection that did the insert
            let id: Option<i64> = db.query_scalar("SELECT last_insert_rowid()", &[])?;
            db.query_one(
                "SELECT id, account, active FROM users WHERE id = ?",
                User::from_row,
                &params![id.unwrap_or(0)],
            )
        })
        .unwrap();

    assert_eq!(
        user,
        Some(User {
            id: 1,
            account: "gugu".into(),
            active: true
        })
    );
    assert_eq!(count_users(&db), 1);
}

#[test]
fn text_true_stays_text() {
    let db = sqlite_db();
    db.execute("CREATE TABLE flags (label TEXT, flag BOOLEAN)", &[])
        .unwrap();
    db.execute("INSERT INTO flags VALUES (?, ?)", &params!["true", true])
        .unwrap();

    let typed: Option<String> = db
        .query_scalar("SELECT typeof(label) || '/' || typeof(flag) FROM flags", &[])
        .unwrap();
    assert_eq!(typed.as_deref(), Some("text/integer"));
}

#[test]
fn all_value_types_round_trip() {
    let db = sqlite_db();
    db.execute(
        "CREATE TABLE samples (n INTEGER, f REAL, s TEXT, b BLOB, ts TEXT, missing TEXT)",
        &[],
    )
    .unwrap();
    let at = Utc.with_ymd_and_hms(2023, 11, 5, 22, 15, 30).unwrap();

    db.execute(
        "INSERT INTO samples VALUES (?, ?, ?, ?, ?, ?)",
        &params![-42i64, 2.25, "zażółć", vec![0u8, 255], at, Option::<i64>::None],
    )
    .unwrap();

    let row = db
        .query_one(
            "SELECT * FROM samples",
            |row| {
                Ok((
                    row.get::<i64, _>("n")?,
                    row.get::<f64, _>("f")?,
                    row.get::<String, _>("s")?,
                    row.get::<Vec<u8>, _>("b")?,
                    row.get::<DateTime<Utc>, _>("ts")?,
                    row.get::<Option<i64>, _>("missing")?,
                ))
            },
            &[],
        )
        .unwrap()
        .unwrap();

    assert_eq!(row, (-42, 2.25, "zażółć".to_string(), vec![0, 255], at, None));
}

#[test]
fn batch_insert_then_map_in_order() {
    let db = sqlite_db();
    let counts = db
        .execute_batch(
            "INSERT INTO users (account, active) VALUES (?, ?)",
            &[params!["a", true], params!["b", false], params!["c", true]],
        )
        .unwrap();
    assert_eq!(counts, vec![1, 1, 1]);

    let users = db
        .query("SELECT * FROM users ORDER BY id", User::from_row, &[])
        .unwrap();
    let accounts: Vec<&str> = users.iter().map(|u| u.account.as_str()).collect();
    assert_eq!(accounts, vec!["a", "b", "c"]);
    assert!(!users[1].active);
}

#[test]
fn constraint_violation_is_data_access() {
    let db = sqlite_db();
    let err = db
        .execute(
            "INSERT INTO users (account, active) VALUES (?, ?)",
            &params![Option::<String>::None, true],
        )
        .unwrap_err();

    assert!(err.is_data_access());
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn placeholder_mismatch_is_rejected() {
    let db = sqlite_db();
    let err = db
        .execute("INSERT INTO users (account, active) VALUES (?, ?)", &params!["a"])
        .unwrap_err();
    assert!(err.to_string().contains("2 placeholder(s) but 1 parameter(s)"));
    assert_eq!(count_users(&db), 0);
}

#[test]
fn query_one_stops_reading_after_second_row() {
    let db = sqlite_db();
    for account in ["a", "b", "c"] {
        db.execute(
            "INSERT INTO users (account, active) VALUES (?, ?)",
            &params![account, true],
        )
        .unwrap();
    }

    // Stepping to the third row raises an integer overflow
    let err = db
        .query_scalar::<i64>(
            "SELECT CASE WHEN id < 3 THEN id \
             ELSE abs(id - 3 - 9223372036854775807 - 1) END FROM users",
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, Error::TooManyResults { actual: 2, .. }));
}
