//! NESTED Tests
//!
//! - Without a transaction NESTED behaves like REQUIRED
//! - Inside one, the inner part runs in a savepoint of the same connection
//! - Connections without savepoints fail fast

use crate::common::*;
use std::cell::Cell;

#[test]
fn nested_without_transaction_starts_one() {
    let t = MemoryDb::new();
    let db = &t.db;

    let result = db.transaction(Propagation::Nested, || -> txflow::Result<()> {
        assert_eq!(db.current_state(), TransactionState::Active);
        insert_user(db, 1, "a")?;
        Err(Error::unit_of_work("rolls back"))
    });

    assert!(result.is_err());
    assert!(t.user_ids().is_empty());
    assert_eq!(t.begins(), 1);
    assert_eq!(t.rollbacks(), 1);
    assert_eq!(t.provider.count(|e| matches!(e, MemoryEvent::Savepoint { .. })), 0);
    t.assert_clean();
}

#[test]
fn inner_failure_rolls_back_to_savepoint_only() {
    let t = MemoryDb::new();
    let db = &t.db;

    db.transaction(Propagation::Required, || -> txflow::Result<()> {
        let outer = bound_transaction(db);
        insert_user(db, 1, "row A")?;
        let inner: txflow::Result<()> = db.transaction(Propagation::Nested, || {
            assert_eq!(bound_transaction(db), outer, "savepoint shares the connection");
            insert_user(db, 2, "row B")?;
            Err(Error::unit_of_work("inner fails"))
        });
        assert!(inner.is_err());
        Ok(())
    })
    .unwrap();

    assert_eq!(t.user_ids(), vec![1]);
    assert_eq!(t.acquires(), 1);
    assert_eq!(
        t.provider.count(|e| matches!(e, MemoryEvent::RollbackToSavepoint { .. })),
        1
    );
    assert_eq!(t.commits(), 1);
    assert_eq!(db.metrics().total_savepoints, 1);
    t.assert_clean();
}

#[test]
fn inner_success_is_discarded_by_outer_rollback() {
    let t = MemoryDb::new();
    let db = &t.db;

    let result = db.transaction(Propagation::Required, || -> txflow::Result<()> {
        insert_user(db, 1, "row A")?;
        db.transaction(Propagation::Nested, || insert_user(db, 2, "row B"))?;
        Err(Error::unit_of_work("outer fails"))
    });

    assert!(result.is_err());
    assert!(t.user_ids().is_empty());
    assert_eq!(
        t.provider.count(|e| matches!(e, MemoryEvent::ReleaseSavepoint { .. })),
        1
    );
    t.assert_clean();
}

#[test]
fn sibling_savepoints_get_distinct_names() {
    let t = MemoryDb::new();
    let db = &t.db;

    db.transaction(Propagation::Required, || -> txflow::Result<()> {
        db.transaction(Propagation::Nested, || insert_user(db, 1, "a"))?;
        db.transaction(Propagation::Nested, || insert_user(db, 2, "b"))?;
        Ok(())
    })
    .unwrap();

    let names: Vec<String> = t
        .provider
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MemoryEvent::Savepoint { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
    assert_eq!(t.user_ids(), vec![1, 2]);
    t.assert_clean();
}

#[test]
fn nested_savepoints_unwind_independently() {
    let t = MemoryDb::new();
    let db = &t.db;

    db.transaction(Propagation::Required, || -> txflow::Result<()> {
        insert_user(db, 1, "outer")?;
        db.transaction(Propagation::Nested, || -> txflow::Result<()> {
            insert_user(db, 2, "first level")?;
            let deepest: txflow::Result<()> = db.transaction(Propagation::Nested, || {
                insert_user(db, 3, "second level")?;
                Err(Error::unit_of_work("deepest fails"))
            });
            assert!(deepest.is_err());
            Ok(())
        })
    })
    .unwrap();

    assert_eq!(t.user_ids(), vec![1, 2]);
    t.assert_clean();
}

#[test]
fn nested_without_savepoint_support_fails_fast() {
    let t = MemoryDb::with_savepoints(false);
    let db = &t.db;
    let ran = Cell::new(false);

    db.transaction(Propagation::Required, || -> txflow::Result<()> {
        insert_user(db, 1, "outer")?;
        let err = db
            .transaction(Propagation::Nested, || -> txflow::Result<()> {
                ran.set(true);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "NestedTransactionNotSupported");
        Ok(())
    })
    .unwrap();

    assert!(!ran.get());
    assert_eq!(t.user_ids(), vec![1]);
    assert_eq!(t.provider.count(|e| matches!(e, MemoryEvent::Savepoint { .. })), 0);
    t.assert_clean();
}
