//! Result Cardinality Tests
//!
//! - query returns every row
//! - query_one distinguishes zero, one and many rows

use crate::common::*;
use txflow::single_column;

fn seed(t: &MemoryDb, accounts: &[(i64, &str)]) {
    for (id, account) in accounts {
        insert_user(&t.db, *id, account).unwrap();
    }
}

#[test]
fn query_on_empty_table_is_empty() {
    let t = MemoryDb::new();
    let users = t.db.query("SELECT * FROM users", User::from_row, &[]).unwrap();
    assert!(users.is_empty());
}

#[test]
fn query_one_with_no_rows_is_none() {
    let t = MemoryDb::new();
    let user = t
        .db
        .query_one("SELECT * FROM users WHERE id = ?", User::from_row, &params![1])
        .unwrap();
    assert!(user.is_none());
}

#[test]
fn query_one_with_one_row_maps_it() {
    let t = MemoryDb::new();
    seed(&t, &[(1, "gugu"), (2, "other")]);

    let user = t
        .db
        .query_one("SELECT * FROM users WHERE id = ?", User::from_row, &params![1])
        .unwrap();
    assert_eq!(
        user,
        Some(User {
            id: 1,
            account: "gugu".into(),
            active: true
        })
    );
}

#[test]
fn query_one_with_two_rows_reports_actual_count() {
    let t = MemoryDb::new();
    seed(&t, &[(1, "gugu"), (1, "gugu again")]);

    let err = t
        .db
        .query_one("SELECT account FROM users WHERE id = ?", single_column::<String>(0), &params![1])
        .unwrap_err();

    match err {
        Error::TooManyResults { command, actual } => {
            assert_eq!(actual, 2);
            assert_eq!(command, "SELECT account FROM users WHERE id = ?");
        }
        other => panic!("expected TooManyResults, got {:?}", other),
    }
    t.assert_clean();
}

#[test]
fn too_many_results_stops_after_second_row() {
    let t = MemoryDb::new();
    seed(&t, &[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);

    let err = t.db.query_scalar::<i64>("SELECT id FROM users", &[]).unwrap_err();
    assert!(matches!(err, Error::TooManyResults { actual: 2, .. }));
}

#[test]
fn query_scalar_reads_first_column() {
    let t = MemoryDb::new();
    seed(&t, &[(1, "a"), (2, "b")]);

    let count: Option<i64> = t.db.query_scalar("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(count, Some(2));
}
