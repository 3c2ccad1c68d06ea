//! On-Disk Database Tests
//!
//! - Opening a directory writes and honors txflow.toml
//! - Committed data survives reopening; rolled-back data does not

use crate::common::*;
use crate::{count_users, USERS_DDL};
use tempfile::TempDir;
use txflow::{SqliteConfig, CONFIG_FILE_NAME};

#[test]
fn open_creates_config_and_database_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();

    assert!(dir.path().join(CONFIG_FILE_NAME).exists());
    assert_eq!(db.config().default_propagation, Propagation::Required);

    db.execute(USERS_DDL, &[]).unwrap();
    assert!(dir.path().join("txflow.db").exists());
}

#[test]
fn committed_data_survives_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.execute(USERS_DDL, &[]).unwrap();
        db.transaction(Propagation::Required, || insert_row(&db, "kept"))
            .unwrap();
        let _ = db.transaction(Propagation::Required, || -> txflow::Result<()> {
            insert_row(&db, "lost")?;
            Err(Error::unit_of_work("rolled back"))
        });
    }

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(count_users(&db), 1);
    let account: Option<String> = db.query_scalar("SELECT account FROM users", &[]).unwrap();
    assert_eq!(account.as_deref(), Some("kept"));
}

#[test]
fn config_file_sets_default_propagation() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "default_propagation = \"MANDATORY\"\n[sqlite]\npath = \"custom.db\"\n",
    )
    .unwrap();

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.config().default_propagation, Propagation::Mandatory);
    assert_eq!(
        db.config().sqlite.as_ref().map(|s| s.path.as_str()),
        Some("custom.db")
    );

    let err = db
        .transaction_default(|| db.execute(USERS_DDL, &[]))
        .unwrap_err();
    assert_eq!(err.error_code(), "IllegalTransactionState");

    db.execute(USERS_DDL, &[]).unwrap();
    assert!(dir.path().join("custom.db").exists());
}

#[test]
fn open_with_config_is_persisted() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = DataAccessConfig {
        default_propagation: Propagation::Nested,
        log_statements: true,
        sqlite: Some(SqliteConfig {
            busy_timeout_ms: 250,
            ..SqliteConfig::default()
        }),
    };
    drop(Database::open_with_config(dir.path(), config.clone()).unwrap());

    let reopened = Database::open(dir.path()).unwrap();
    assert_eq!(reopened.config(), &config);
}

#[test]
fn malformed_config_is_config_error() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "default_propagation = 7\n").unwrap();

    let err = Database::open(dir.path()).unwrap_err();
    assert_eq!(err.error_code(), "Config");
}

fn insert_row(db: &Database, account: &str) -> txflow::Result<u64> {
    db.execute(
        "INSERT INTO users (account, active) VALUES (?, ?)",
        &params![account, true],
    )
}
