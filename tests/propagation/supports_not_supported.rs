//! SUPPORTS and NOT_SUPPORTED Tests
//!
//! - SUPPORTS joins when there is a transaction, otherwise runs without one
//! - NOT_SUPPORTED always runs without one, suspending any caller transaction

use crate::common::*;

// ============================================================================
// SUPPORTS
// ============================================================================

#[test]
fn supports_without_transaction_autocommits_each_statement() {
    let t = MemoryDb::new();
    let db = &t.db;

    let result = db.transaction(Propagation::Supports, || -> txflow::Result<()> {
        assert_eq!(db.current_state(), TransactionState::NoTransaction);
        insert_user(db, 1, "a")?;
        insert_user(db, 2, "b")?;
        Err(Error::unit_of_work("nothing to roll back"))
    });

    assert!(result.is_err());
    assert_eq!(t.user_ids(), vec![1, 2]);
    assert_eq!(t.begins(), 0);
    assert_eq!(t.acquires(), 2, "one connection per statement");
    t.assert_clean();
}

#[test]
fn supports_inside_transaction_joins() {
    let t = MemoryDb::new();
    let db = &t.db;

    let result = db.transaction(Propagation::Required, || -> txflow::Result<()> {
        let outer = bound_transaction(db);
        db.transaction(Propagation::Supports, || -> txflow::Result<()> {
            assert_eq!(bound_transaction(db), outer);
            insert_user(db, 1, "joined").map(|_| ())
        })?;
        Err(Error::unit_of_work("outer fails"))
    });

    assert!(result.is_err());
    assert!(t.user_ids().is_empty());
    t.assert_clean();
}

// ============================================================================
// NOT_SUPPORTED
// ============================================================================

#[test]
fn not_supported_suspends_and_autocommits() {
    let t = MemoryDb::new();
    let db = &t.db;

    let result = db.transaction(Propagation::Required, || -> txflow::Result<()> {
        let outer = bound_transaction(db);
        insert_user(db, 1, "transactional")?;
        db.transaction(Propagation::NotSupported, || -> txflow::Result<()> {
            assert_eq!(db.current_state(), TransactionState::Suspended);
            assert!(bound_transaction(db).is_none());
            insert_audit(db, 1, "outside").map(|_| ())
        })?;
        assert_eq!(bound_transaction(db), outer);
        Err(Error::unit_of_work("outer fails"))
    });

    assert!(result.is_err());
    assert!(t.user_ids().is_empty());
    assert_eq!(t.audit_ids(), vec![1], "non-transactional write is already applied");
    t.assert_clean();
}

#[test]
fn not_supported_error_still_resumes_outer() {
    let t = MemoryDb::new();
    let db = &t.db;

    db.transaction(Propagation::Required, || -> txflow::Result<()> {
        let outer = bound_transaction(db);
        let inner: txflow::Result<()> = db.transaction(Propagation::NotSupported, || {
            Err(Error::unit_of_work("fails outside"))
        });
        assert!(inner.is_err());
        assert_eq!(bound_transaction(db), outer);
        insert_user(db, 1, "a").map(|_| ())
    })
    .unwrap();

    assert_eq!(t.user_ids(), vec![1]);
    t.assert_clean();
}

#[test]
fn required_inside_not_supported_starts_fresh_transaction() {
    let t = MemoryDb::new();
    let db = &t.db;

    let result = db.transaction(Propagation::Required, || -> txflow::Result<()> {
        let outer = bound_transaction(db);
        db.transaction(Propagation::NotSupported, || {
            // Suspended resolves like no transaction at all
            db.transaction(Propagation::Required, || -> txflow::Result<()> {
                assert_ne!(bound_transaction(db), outer);
                insert_audit(db, 1, "own transaction").map(|_| ())
            })
        })?;
        Err(Error::unit_of_work("outer fails"))
    });

    assert!(result.is_err());
    assert_eq!(t.audit_ids(), vec![1]);
    assert_eq!(t.begins(), 2);
    t.assert_clean();
}
