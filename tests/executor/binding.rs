//! Parameter Binding Tests
//!
//! - Values bind left to right through their native setter
//! - The parameter count must equal the placeholder count

use crate::common::*;
use chrono::{TimeZone, Utc};
use txflow::values;

fn last_params(t: &MemoryDb) -> Vec<SqlValue> {
    t.provider
        .statements()
        .pop()
        .map(|(_, params)| params)
        .unwrap_or_default()
}

// ============================================================================
// Ordering and types
// ============================================================================

#[test]
fn parameters_bind_in_declaration_order() {
    let t = MemoryDb::new();
    t.db.execute("INSERT INTO users VALUES (?, ?, ?)", &params![7, "gugu", true])
        .unwrap();

    assert_eq!(
        last_params(&t),
        vec![
            SqlValue::Int(7),
            SqlValue::Text("gugu".into()),
            SqlValue::Bool(true)
        ]
    );
}

#[test]
fn text_true_is_not_coerced_to_bool() {
    let t = MemoryDb::new();
    t.db.execute("INSERT INTO users VALUES (?, ?, ?)", &params![1, "true", true])
        .unwrap();

    let row = t
        .db
        .query_one("SELECT * FROM users WHERE id = ?", values(), &params![1])
        .unwrap()
        .unwrap();
    assert_eq!(row[1], SqlValue::Text("true".into()));
    assert_eq!(row[2], SqlValue::Bool(true));
}

#[test]
fn none_binds_as_null() {
    let t = MemoryDb::new();
    t.db.execute(
        "INSERT INTO users VALUES (?, ?, ?)",
        &params![2, Option::<String>::None, false],
    )
    .unwrap();

    assert_eq!(
        last_params(&t),
        vec![SqlValue::Int(2), SqlValue::Null, SqlValue::Bool(false)]
    );
    let account: Option<Option<String>> = t
        .db
        .query_one("SELECT account FROM users", |row| row.get(0usize), &[])
        .unwrap();
    assert_eq!(account, Some(None));
}

#[test]
fn timestamps_and_bytes_keep_their_variant() {
    let t = MemoryDb::new();
    let at = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap();
    t.db.execute("INSERT INTO audit VALUES (?, ?)", &params![at, vec![0u8, 159, 255]])
        .unwrap();

    assert_eq!(
        last_params(&t),
        vec![SqlValue::Timestamp(at), SqlValue::Bytes(vec![0, 159, 255])]
    );
}

#[test]
fn no_parameters_for_no_placeholders() {
    let t = MemoryDb::new();
    let count: Option<i64> = t.db.query_scalar("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(count, Some(0));
    assert!(last_params(&t).is_empty());
}

// ============================================================================
// Count mismatch
// ============================================================================

#[test]
fn too_few_parameters_is_rejected_before_execution() {
    let t = MemoryDb::new();
    let err = t
        .db
        .execute("INSERT INTO users VALUES (?, ?, ?)", &params![1, "a"])
        .unwrap_err();

    assert_eq!(err.error_code(), "DataAccess");
    assert!(err.to_string().contains("3 placeholder(s) but 2 parameter(s)"));
    assert!(t.provider.statements().is_empty(), "nothing may execute");
    t.assert_clean();
}

#[test]
fn too_many_parameters_is_rejected_before_execution() {
    let t = MemoryDb::new();
    let err = t
        .db
        .query("SELECT * FROM users WHERE id = ?", values(), &params![1, 2])
        .unwrap_err();

    assert!(err.is_data_access());
    assert!(t.provider.statements().is_empty());
    t.assert_clean();
}
