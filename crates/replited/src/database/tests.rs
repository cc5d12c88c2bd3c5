use std::path::PathBuf;
use std::sync::Arc;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::replication::{LocalReplication, ReplicationError};

struct Harness {
    dir: TempDir,
    backend: Arc<LocalReplication>,
    registry: ReplicationRegistry,
}

impl Harness {
    fn open(&self, name: &str) -> Database {
        Database::open(&self.registry, name, 0, "dummy").expect("database should open")
    }
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let backend = Arc::new(LocalReplication::new("dummy", dir.path()));
    let mut registry = ReplicationRegistry::new();
    registry.register(backend.clone());
    Harness {
        dir,
        backend,
        registry,
    }
}

fn single_value(rows: &Rows) -> &Value {
    rows.rows
        .first()
        .and_then(|row| row.first())
        .expect("query should return one value")
}

#[rstest]
#[case("PRAGMA journal_mode", Value::Text(String::from("wal")))]
#[case("PRAGMA page_size", Value::Integer(4096))]
#[case("PRAGMA synchronous", Value::Integer(0))]
#[case("PRAGMA foreign_keys", Value::Integer(1))]
fn open_configures_the_engine(harness: Harness, #[case] pragma: &str, #[case] expected: Value) {
    let mut db = harness.open("test.db");
    let rows = db.query_sql(pragma, &[]).expect("pragma should run");
    assert_eq!(single_value(&rows), &expected);
}

#[rstest]
fn open_registers_the_leader(harness: Harness) {
    let db = harness.open("test.db");
    assert_eq!(harness.backend.leader_count("test.db"), 1);
    drop(db);
    assert_eq!(harness.backend.leader_count("test.db"), 0);
}

#[rstest]
fn open_rejects_unknown_replication(harness: Harness) {
    let error = Database::open(&harness.registry, "test.db", 0, "raft")
        .expect_err("unknown method should fail");
    assert_eq!(error.to_string(), "no such vfs: raft");
}

#[rstest]
#[case("../escape.db")]
#[case("nested/../../escape.db")]
fn open_refuses_names_outside_the_data_directory(harness: Harness, #[case] name: &str) {
    let root = harness.dir.path().join("root");
    std::fs::create_dir(&root).expect("create data root");
    let mut registry = ReplicationRegistry::new();
    registry.register(Arc::new(LocalReplication::new("confined", &root)));

    let error = Database::open(&registry, name, 0, "confined").expect_err("name should be refused");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_CANTOPEN);
    assert!(
        error.to_string().starts_with("unable to open database: invalid database name"),
        "unexpected message: {error}"
    );
    assert!(!harness.dir.path().join("escape.db").exists());
}

#[rstest]
fn open_refuses_absolute_names(harness: Harness) {
    let target = harness.dir.path().join("absolute.db");
    let name = target.to_str().expect("utf-8 temp path");
    let error = Database::open(&harness.registry, name, 0, "dummy")
        .expect_err("absolute name should be refused");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_CANTOPEN);
    assert!(!target.exists());
}

struct RejectingReplication {
    inner: LocalReplication,
}

impl Replication for RejectingReplication {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn vfs(&self) -> Option<&str> {
        None
    }

    fn resolve(&self, database: &str) -> Result<PathBuf, ReplicationError> {
        self.inner.resolve(database)
    }

    fn register_leader(
        &self,
        _conn: &rusqlite::Connection,
        database: &str,
    ) -> Result<(), ReplicationError> {
        Err(ReplicationError::LeaderRejected {
            backend: String::from("rejecting"),
            database: database.to_owned(),
            message: String::from("not the leader"),
        })
    }

    fn unregister_leader(&self, database: &str) {
        self.inner.unregister_leader(database);
    }

    fn file(&self, database: &str) -> Arc<WalFile> {
        self.inner.file(database)
    }
}

#[rstest]
fn open_wraps_leader_registration_failure(harness: Harness) {
    let mut registry = harness.registry.clone();
    registry.register(Arc::new(RejectingReplication {
        inner: LocalReplication::new("inner", harness.dir.path()),
    }));
    let error = Database::open(&registry, "test.db", 0, "rejecting")
        .expect_err("leader registration should fail");
    let message = error.to_string();
    assert!(
        message.starts_with("unable to set WAL replication: "),
        "unexpected message: {message}"
    );
    assert!(message.contains("not the leader"));
}

#[rstest]
fn finalize_frees_the_id_for_reuse(harness: Harness) {
    let mut db = harness.open("test.db");
    let prepared = db.prepare("SELECT 1").expect("prepare should succeed");
    assert_eq!(prepared.id, 0);
    assert_eq!(prepared.columns, 1);
    assert_eq!(
        db.statement(prepared.id).map(Statement::state),
        Some(StatementState::Live)
    );

    db.finalize(prepared.id).expect("finalize should succeed");
    assert!(db.statement(prepared.id).is_none());

    let again = db.prepare("SELECT 2").expect("prepare should succeed");
    assert_eq!(again.id, 0);
}

#[rstest]
fn failed_compile_releases_reserved_id(harness: Harness) {
    let mut db = harness.open("test.db");
    let error = db.prepare("SELEC 1").expect_err("syntax error expected");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_ERROR);
    assert_eq!(db.statement_count(), 0);
    assert!(db.error().message().is_some_and(|m| m.contains("syntax error")));

    let prepared = db.prepare("SELECT 1").expect("prepare should succeed");
    assert_eq!(prepared.id, 0);
}

#[rstest]
#[case("")]
#[case("   ")]
fn blank_sql_is_misuse(harness: Harness, #[case] sql: &str) {
    let mut db = harness.open("test.db");
    let error = db.prepare(sql).expect_err("blank sql should fail");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_MISUSE);
}

#[rstest]
fn prepare_returns_unconsumed_tail(harness: Harness) {
    let mut db = harness.open("test.db");
    let prepared = db
        .prepare("CREATE TABLE t(a); INSERT INTO t VALUES(1)")
        .expect("prepare should succeed");
    assert_eq!(prepared.tail, " INSERT INTO t VALUES(1)");
    assert_eq!(
        db.statement(prepared.id).map(Statement::sql),
        Some("CREATE TABLE t(a);")
    );
}

#[rstest]
fn transaction_commits_insert(harness: Harness) {
    let mut db = harness.open("test.db");
    let refcount = db.file().tx_refcount();

    let create = db.prepare("CREATE TABLE t(a)").expect("prepare create");
    db.exec(create.id, &[]).expect("create table");

    let insert = db.prepare("INSERT INTO t VALUES(1)").expect("prepare insert");
    db.begin().expect("begin");
    assert!(db.in_a_tx());
    assert_eq!(db.file().tx_refcount(), refcount + 1);
    let result = db.exec(insert.id, &[]).expect("insert");
    db.commit().expect("commit");

    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.last_insert_id, 1);
    assert!(!db.in_a_tx());
    assert_eq!(db.file().tx_refcount(), refcount);
}

#[rstest]
fn nested_begin_is_rejected(harness: Harness) {
    let mut db = harness.open("test.db");
    db.begin().expect("begin");
    let error = db.begin().expect_err("second begin should fail");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_MISUSE);
    assert_eq!(db.file().tx_refcount(), 1);
    assert!(db.in_a_tx());
}

#[rstest]
fn failed_rollback_still_closes_transaction(harness: Harness) {
    let mut db = harness.open("test.db");
    db.begin().expect("begin");
    db.exec_sql("ROLLBACK", &[]).expect("engine-level rollback");

    let error = db.rollback().expect_err("no engine transaction remains");
    assert!(error.to_string().contains("no transaction is active"));
    assert!(!db.in_a_tx());
    assert_eq!(db.file().tx_refcount(), 0);
}

#[rstest]
fn commit_without_transaction_leaves_refcount(harness: Harness) {
    let mut db = harness.open("test.db");
    db.commit().expect_err("nothing to commit");
    assert_eq!(db.file().tx_refcount(), 0);
}

#[rstest]
fn exec_binds_parameters_and_query_returns_rows(harness: Harness) {
    let mut db = harness.open("test.db");
    db.exec_sql("CREATE TABLE t(n INTEGER, s TEXT, b BLOB)", &[])
        .expect("create table");
    let insert = db.prepare("INSERT INTO t VALUES(?, ?, ?)").expect("prepare");
    assert_eq!(insert.params, 3);
    db.exec(
        insert.id,
        &[
            Value::Integer(7),
            Value::Text(String::from("seven")),
            Value::Blob(vec![7]),
        ],
    )
    .expect("insert");

    let select = db.prepare("SELECT n, s, b FROM t").expect("prepare select");
    let rows = db.query(select.id, &[]).expect("query");
    assert_eq!(rows.columns, vec!["n", "s", "b"]);
    assert_eq!(
        rows.rows,
        vec![vec![
            Value::Integer(7),
            Value::Text(String::from("seven")),
            Value::Blob(vec![7]),
        ]]
    );
}

#[rstest]
fn exec_sql_runs_every_statement(harness: Harness) {
    let mut db = harness.open("test.db");
    db.exec_sql("CREATE TABLE t(a)", &[]).expect("create table");
    let result = db
        .exec_sql(
            "INSERT INTO t VALUES(?); INSERT INTO t VALUES(2); INSERT INTO t VALUES(3);",
            &[Value::Integer(1)],
        )
        .expect("script should run");
    assert_eq!(result.last_insert_id, 3);
    assert_eq!(result.rows_affected, 1);

    let rows = db.query_sql("SELECT sum(a) FROM t", &[]).expect("sum");
    assert_eq!(single_value(&rows), &Value::Integer(6));
}

#[rstest]
fn exec_sql_binds_parameters_to_the_first_statement_only(harness: Harness) {
    let mut db = harness.open("test.db");
    db.exec_sql("CREATE TABLE t(a)", &[]).expect("create table");
    let error = db
        .exec_sql(
            "INSERT INTO t VALUES(1); INSERT INTO t VALUES(?);",
            &[Value::Integer(2)],
        )
        .expect_err("parameters belong to the first statement");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_RANGE);
}

#[rstest]
#[case("CREATE TABLE t(a); -- done")]
#[case("CREATE TABLE t(a); /* done */ ;")]
#[case("-- schema\nCREATE TABLE t(a);")]
fn exec_sql_skips_comment_only_tails(harness: Harness, #[case] sql: &str) {
    let mut db = harness.open("test.db");
    db.exec_sql(sql, &[]).expect("comments should be ignored");
    assert!(db.error().is_empty());
    db.exec_sql("INSERT INTO t VALUES(1)", &[])
        .expect("table should exist");
}

#[rstest]
#[case("SELECT 1; -- done")]
#[case("SELECT 1; ;")]
fn query_sql_accepts_comment_only_tails(harness: Harness, #[case] sql: &str) {
    let mut db = harness.open("test.db");
    let rows = db.query_sql(sql, &[]).expect("query should run");
    assert_eq!(single_value(&rows), &Value::Integer(1));
}

#[rstest]
fn comment_only_sql_is_misuse(harness: Harness) {
    let mut db = harness.open("test.db");
    let error = db
        .exec_sql("-- nothing to do", &[])
        .expect_err("no statement to run");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_MISUSE);
}

#[rstest]
fn finalize_leaves_other_statements_compiled(harness: Harness) {
    let mut db = harness.open("test.db");
    let first = db.prepare("SELECT 1").expect("prepare first");
    let second = db.prepare("SELECT 2").expect("prepare second");

    db.finalize(first.id).expect("finalize first");

    assert_eq!(
        db.statement(second.id).map(Statement::state),
        Some(StatementState::Live)
    );
    let rows = db.query(second.id, &[]).expect("second stays usable");
    assert_eq!(single_value(&rows), &Value::Integer(2));
}

#[rstest]
fn many_live_statements_stay_compiled(harness: Harness) {
    let mut db = harness.open("test.db");
    let ids: Vec<u32> = (0..100_i64)
        .map(|n| {
            db.prepare(&format!("SELECT {n}"))
                .expect("prepare should succeed")
                .id
        })
        .collect();

    for (n, id) in (0..100_i64).zip(ids) {
        assert_eq!(
            db.statement(id).map(Statement::state),
            Some(StatementState::Live)
        );
        let rows = db.query(id, &[]).expect("query should run");
        assert_eq!(single_value(&rows), &Value::Integer(n));
    }
}

#[rstest]
fn query_sql_rejects_trailing_statements(harness: Harness) {
    let mut db = harness.open("test.db");
    let error = db
        .query_sql("SELECT 1; SELECT 2", &[])
        .expect_err("tail should be rejected");
    assert_eq!(error.to_string(), "nonempty statement tail");
}

#[rstest]
fn constraint_violation_keeps_database_usable(harness: Harness) {
    let mut db = harness.open("test.db");
    db.exec_sql("CREATE TABLE t(a UNIQUE); INSERT INTO t VALUES(1)", &[])
        .expect("seed");
    let error = db
        .exec_sql("INSERT INTO t VALUES(1)", &[])
        .expect_err("duplicate should fail");
    assert_eq!(error.code(), rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE);
    db.exec_sql("INSERT INTO t VALUES(2)", &[])
        .expect("database should stay usable");
}

#[rstest]
fn unknown_statement_is_not_found(harness: Harness) {
    let mut db = harness.open("test.db");
    let error = db.exec(9, &[]).expect_err("unknown id");
    assert_eq!(error.to_string(), "no stmt with id 9");
    assert_eq!(db.error().message(), Some("no stmt with id 9"));
    db.finalize(9).expect_err("unknown id");
}

#[rstest]
fn drop_rolls_back_open_transaction(harness: Harness) {
    let mut db = harness.open("test.db");
    db.exec_sql("CREATE TABLE t(a)", &[]).expect("create");
    db.prepare("SELECT a FROM t").expect("prepare");
    db.begin().expect("begin");
    db.exec_sql("INSERT INTO t VALUES(1)", &[]).expect("insert");
    let file = Arc::clone(db.file());
    drop(db);

    assert_eq!(file.tx_refcount(), 0);
    assert_eq!(harness.backend.leader_count("test.db"), 0);

    let mut reopened = harness.open("test.db");
    let rows = reopened
        .query_sql("SELECT count(*) FROM t", &[])
        .expect("count");
    assert_eq!(single_value(&rows), &Value::Integer(0));
}
