//! A replicated SQLite database bound to one client connection.
//!
//! [`Database::open`] opens the engine file through the replication backend
//! the client names and configures it for replicated writes: 4096-byte
//! pages, no local syncs, WAL journaling with this connection installed as
//! the replication leader, and foreign-key enforcement.
//!
//! Statements are addressed by registry IDs. Transactions raise and lower the
//! backend's [`WalFile`] refcount so the backend knows when a write epoch is
//! open.
//!
//! The database assumes it is driven by one connection at a time. Under that
//! discipline the engine never answers `SQLITE_BUSY`; commit asserts as much
//! in debug builds, while other operations report busy like any other engine
//! error.

mod errors;
mod statement;
mod value;

use std::rc::Rc;
use std::sync::Arc;

use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error_context::ErrorContext;
use crate::registry::Registry;
use crate::replication::{Replication, ReplicationRegistry, WalFile};

pub use self::errors::DatabaseError;
use self::statement::{is_blank, next_statement};
pub use self::statement::{Statement, StatementState};
pub use self::value::Value;

const DATABASE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::database");

/// Page size every database is created with.
pub const PAGE_SIZE: u32 = 4096;

/// Outcome of executing a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Row ID of the most recent successful insert on this connection.
    pub last_insert_id: i64,
    /// Rows changed by the statement.
    pub rows_affected: u64,
}

/// Rows produced by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    /// Result column names.
    pub columns: Vec<String>,
    /// Row values, one inner vector per row.
    pub rows: Vec<Vec<Value>>,
}

/// A freshly prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Statement ID.
    pub id: u32,
    /// Number of bindable parameters.
    pub params: usize,
    /// Number of result columns.
    pub columns: usize,
    /// SQL text following the compiled statement.
    pub tail: String,
}

/// One logical database, its statements, and its transaction state.
///
/// Each registered [`Statement`] owns its compiled engine statement and a
/// share of the connection, so the connection closes only after the last
/// statement is finalized.
pub struct Database {
    name: String,
    statements: Registry<Statement>,
    conn: Rc<Connection>,
    replication: Arc<dyn Replication>,
    file: Arc<WalFile>,
    in_a_tx: bool,
    error: ErrorContext,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Database")
            .field("name", &self.name)
            .field("replication", &self.replication.name())
            .field("statements", &self.statements.len())
            .field("in_a_tx", &self.in_a_tx)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens `name` through the backend registered as `method`.
    ///
    /// A `flags` value of zero selects read-write, create and URI handling.
    ///
    /// # Errors
    ///
    /// Fails when `method` is unknown, the backend refuses `name`, the engine
    /// cannot open the file, or a configuration step fails. Configuration
    /// failures carry the step as a message prefix, such as
    /// `unable to set WAL mode`.
    pub fn open(
        registry: &ReplicationRegistry,
        name: &str,
        flags: i32,
        method: &str,
    ) -> Result<Self, DatabaseError> {
        let replication = registry.get(method).ok_or_else(|| DatabaseError::NoSuchVfs {
            name: method.to_owned(),
        })?;
        let path = replication
            .resolve(name)
            .map_err(|source| DatabaseError::CantOpen { source })?;
        let flags = open_flags(flags);
        let conn = match replication.vfs() {
            Some(vfs) => Connection::open_with_flags_and_vfs(&path, flags, vfs),
            None => Connection::open_with_flags(&path, flags),
        }
        .map_err(DatabaseError::engine)?;

        configure(&conn)?;
        replication
            .register_leader(&conn, name)
            .map_err(|error| DatabaseError::Setup {
                step: "unable to set WAL replication",
                code: rusqlite::ffi::SQLITE_ERROR,
                message: error.to_string(),
            })?;
        if let Err(error) = conn.pragma_update(None, "foreign_keys", 1) {
            replication.unregister_leader(name);
            return Err(DatabaseError::setup(
                "unable to set foreign keys checks",
                &error,
            ));
        }
        let file = replication.file(name);
        debug!(
            target: DATABASE_TARGET,
            database = name,
            replication = replication.name(),
            "database opened"
        );
        Ok(Self {
            name: name.to_owned(),
            statements: Registry::new(),
            conn: Rc::new(conn),
            replication,
            file,
            in_a_tx: false,
            error: ErrorContext::new(),
        })
    }

    /// Logical name the database was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a transaction started by [`Database::begin`] is open.
    #[must_use]
    pub fn in_a_tx(&self) -> bool {
        self.in_a_tx
    }

    /// Shared replication file object of this database.
    #[must_use]
    pub fn file(&self) -> &Arc<WalFile> {
        &self.file
    }

    /// Last failure recorded by this database.
    #[must_use]
    pub fn error(&self) -> &ErrorContext {
        &self.error
    }

    /// Looks up a live statement.
    #[must_use]
    pub fn statement(&self, id: u32) -> Option<&Statement> {
        self.statements.get(id)
    }

    /// Number of statements currently registered.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Compiles the first statement of `sql`.
    ///
    /// The statement ID is reserved before compiling and released again when
    /// compilation fails.
    ///
    /// # Errors
    ///
    /// Fails with a misuse error for blank SQL, with a registry error when no
    /// ID can be allocated, or with the engine's compile error.
    pub fn prepare(&mut self, sql: &str) -> Result<Prepared, DatabaseError> {
        let outcome = self.prepare_statement(sql);
        self.settle(outcome)
    }

    fn prepare_statement(&mut self, sql: &str) -> Result<Prepared, DatabaseError> {
        let Some((head, tail)) = next_statement(sql) else {
            return Err(DatabaseError::misuse("empty statement"));
        };
        let (id, statement) = self.statements.add(|id| Statement::reserve(id, head))?;
        match statement.compile(&self.conn) {
            Ok(()) => Ok(Prepared {
                id,
                params: statement.param_count(),
                columns: statement.column_count(),
                tail: tail.to_owned(),
            }),
            Err(error) => {
                self.statements.del(id);
                Err(DatabaseError::engine(error))
            }
        }
    }

    /// Finalizes a statement and frees its ID.
    ///
    /// Only this statement's compiled form is released; other statements stay
    /// compiled.
    ///
    /// # Errors
    ///
    /// Fails when `id` does not name a live statement.
    pub fn finalize(&mut self, id: u32) -> Result<(), DatabaseError> {
        let Some(mut statement) = self.statements.del(id) else {
            return self.settle(Err(DatabaseError::StatementNotFound { id }));
        };
        statement.release();
        Ok(())
    }

    /// Runs a prepared statement to completion.
    ///
    /// # Errors
    ///
    /// Fails when `id` is unknown or the engine rejects the execution.
    pub fn exec(&mut self, id: u32, params: &[Value]) -> Result<ExecResult, DatabaseError> {
        let conn = &self.conn;
        let outcome = self
            .statements
            .get_mut(id)
            .and_then(|statement| statement.with_compiled(|stmt| run_exec(conn, stmt, params)))
            .unwrap_or_else(|| Err(DatabaseError::StatementNotFound { id }));
        self.settle(outcome)
    }

    /// Runs a prepared statement and collects its rows.
    ///
    /// # Errors
    ///
    /// Fails when `id` is unknown or the engine rejects the query.
    pub fn query(&mut self, id: u32, params: &[Value]) -> Result<Rows, DatabaseError> {
        let outcome = self
            .statements
            .get_mut(id)
            .and_then(|statement| statement.with_compiled(|stmt| run_query(stmt, params)))
            .unwrap_or_else(|| Err(DatabaseError::StatementNotFound { id }));
        self.settle(outcome)
    }

    /// Executes every statement in `sql`, binding `params` to the first.
    ///
    /// Reports the result of the last statement executed. Comments and empty
    /// statements between or after statements are skipped.
    ///
    /// # Errors
    ///
    /// Fails on blank SQL or on the first statement the engine rejects.
    /// Statements before the failing one stay applied.
    pub fn exec_sql(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult, DatabaseError> {
        let outcome = self.exec_script(sql, params);
        self.settle(outcome)
    }

    fn exec_script(&self, sql: &str, params: &[Value]) -> Result<ExecResult, DatabaseError> {
        let Some((head, tail)) = next_statement(sql) else {
            return Err(DatabaseError::misuse("empty statement"));
        };
        let mut result = self.exec_once(head, params)?;
        let mut remaining = tail;
        while let Some((head, tail)) = next_statement(remaining) {
            result = self.exec_once(head, &[])?;
            remaining = tail;
        }
        Ok(result)
    }

    fn exec_once(&self, sql: &str, params: &[Value]) -> Result<ExecResult, DatabaseError> {
        let mut stmt = self.conn.prepare(sql).map_err(DatabaseError::engine)?;
        run_exec(&self.conn, &mut stmt, params)
    }

    /// Runs the single statement in `sql` as a query.
    ///
    /// # Errors
    ///
    /// Fails on blank SQL, on a tail holding another statement, or when the
    /// engine rejects the query. A tail of comments is accepted.
    pub fn query_sql(&mut self, sql: &str, params: &[Value]) -> Result<Rows, DatabaseError> {
        let outcome = match next_statement(sql) {
            None => Err(DatabaseError::misuse("empty statement")),
            Some((head, tail)) if is_blank(tail) => self
                .conn
                .prepare(head)
                .map_err(DatabaseError::engine)
                .and_then(|mut stmt| run_query(&mut stmt, params)),
            Some(_) => Err(DatabaseError::misuse("nonempty statement tail")),
        };
        self.settle(outcome)
    }

    /// Starts a write transaction and raises the replication refcount.
    ///
    /// # Errors
    ///
    /// Fails with a misuse error when a transaction is already open; BEGIN
    /// never reaches the engine in that case.
    pub fn begin(&mut self) -> Result<(), DatabaseError> {
        if self.in_a_tx {
            return self.settle(Err(DatabaseError::misuse(
                "transaction already in progress",
            )));
        }
        let outcome = self
            .conn
            .execute_batch("BEGIN")
            .map_err(DatabaseError::engine);
        self.settle(outcome)?;
        self.file.update_tx_refcount(1);
        self.in_a_tx = true;
        Ok(())
    }

    /// Commits the open transaction and lowers the replication refcount.
    ///
    /// On failure the transaction stays open.
    ///
    /// # Errors
    ///
    /// Propagates the engine's COMMIT failure.
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        let outcome = self
            .conn
            .execute_batch("COMMIT")
            .map_err(DatabaseError::engine);
        if let Err(error) = &outcome {
            debug_assert!(
                !error.is_busy(),
                "commit reported SQLITE_BUSY on a single-writer database"
            );
        }
        self.settle(outcome)?;
        if self.in_a_tx {
            self.file.update_tx_refcount(-1);
            self.in_a_tx = false;
        }
        Ok(())
    }

    /// Rolls back the open transaction.
    ///
    /// The transaction is considered closed even when ROLLBACK fails, so the
    /// backend never sees a write epoch that will not end.
    ///
    /// # Errors
    ///
    /// Propagates the engine's ROLLBACK failure after clearing the state.
    pub fn rollback(&mut self) -> Result<(), DatabaseError> {
        let outcome = self
            .conn
            .execute_batch("ROLLBACK")
            .map_err(DatabaseError::engine);
        if self.in_a_tx {
            self.file.update_tx_refcount(-1);
            self.in_a_tx = false;
        }
        self.settle(outcome)
    }

    fn settle<T>(&mut self, outcome: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
        if let Err(error) = &outcome {
            self.error.record(error);
        }
        outcome
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.in_a_tx
            && let Err(error) = self.rollback()
        {
            warn!(
                target: DATABASE_TARGET,
                database = %self.name,
                error = %error,
                "rollback during teardown failed"
            );
        }
        let mut released = 0_usize;
        for mut statement in self.statements.drain() {
            if statement.release() {
                released += 1;
            }
        }
        self.replication.unregister_leader(&self.name);
        debug!(
            target: DATABASE_TARGET,
            database = %self.name,
            released,
            "database closed"
        );
    }
}

fn open_flags(bits: i32) -> OpenFlags {
    if bits == 0 {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::from_bits_truncate(bits)
    }
}

fn configure(conn: &Connection) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "page_size", PAGE_SIZE)
        .map_err(|error| DatabaseError::setup("unable to set page size", &error))?;
    conn.pragma_update(None, "synchronous", "OFF")
        .map_err(|error| DatabaseError::setup("unable to switch off syncs", &error))?;
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(|error| DatabaseError::setup("unable to set WAL mode", &error))?;
    if !mode.eq_ignore_ascii_case("wal") {
        return Err(DatabaseError::Setup {
            step: "unable to set WAL mode",
            code: rusqlite::ffi::SQLITE_ERROR,
            message: format!("journal mode is {mode}"),
        });
    }
    Ok(())
}

/// Steps `stmt` until done, discarding any rows, and reports the changes.
fn run_exec(
    conn: &Connection,
    stmt: &mut rusqlite::Statement<'_>,
    params: &[Value],
) -> Result<ExecResult, DatabaseError> {
    let mut rows = stmt
        .query(params_from_iter(params))
        .map_err(DatabaseError::engine)?;
    while rows.next().map_err(DatabaseError::engine)?.is_some() {}
    Ok(ExecResult {
        last_insert_id: conn.last_insert_rowid(),
        rows_affected: conn.changes(),
    })
}

fn run_query(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<Rows, DatabaseError> {
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let width = columns.len();
    let mut rows = stmt
        .query(params_from_iter(params))
        .map_err(DatabaseError::engine)?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next().map_err(DatabaseError::engine)? {
        let values = (0..width)
            .map(|index| row.get_ref(index).map(Value::from))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::engine)?;
        collected.push(values);
    }
    Ok(Rows {
        columns,
        rows: collected,
    })
}

#[cfg(test)]
mod tests;
