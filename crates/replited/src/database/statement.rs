//! Prepared statement handles and SQL text splitting.

use std::ffi::CString;
use std::mem;
use std::rc::Rc;

use rusqlite::Connection;

/// Where a statement is in its lifetime.
///
/// An ID is reserved before the SQL is compiled, so a failing compile still
/// has a registry entry to remove. Releasing the compiled form happens once,
/// just before the registry entry is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// ID allocated, SQL not yet compiled.
    Reserved,
    /// Compiled and usable.
    Live,
    /// Engine resources released; awaiting removal.
    Released,
}

#[derive(Debug)]
enum Lifecycle {
    Reserved,
    Live(Compiled),
    Released,
}

/// An engine statement plus a share of the connection it was compiled on.
#[derive(Debug)]
struct Compiled {
    // Fields drop in declaration order: the statement goes before its
    // connection share.
    stmt: rusqlite::Statement<'static>,
    _conn: Rc<Connection>,
}

impl Compiled {
    fn new(conn: &Rc<Connection>, sql: &str) -> rusqlite::Result<Self> {
        let stmt = conn.prepare(sql)?;
        // SAFETY: `stmt` borrows the connection stored in the `Rc`
        // allocation, which never moves. `Compiled` holds a clone of that
        // `Rc` and drops it after `stmt`, so the borrow cannot outlive the
        // connection. The widened lifetime is only ever handed out under a
        // fresh higher-ranked lifetime by `Statement::with_compiled`.
        let stmt = unsafe {
            mem::transmute::<rusqlite::Statement<'_>, rusqlite::Statement<'static>>(stmt)
        };
        Ok(Self {
            stmt,
            _conn: Rc::clone(conn),
        })
    }
}

/// A prepared statement owned by a [`Database`](super::Database).
///
/// The registry entry is the sole owner of the compiled engine statement;
/// finalizing one statement never touches another.
#[derive(Debug)]
pub struct Statement {
    id: u32,
    sql: String,
    lifecycle: Lifecycle,
    param_count: usize,
    column_count: usize,
}

impl Statement {
    pub(super) fn reserve(id: u32, sql: &str) -> Self {
        Self {
            id,
            sql: sql.to_owned(),
            lifecycle: Lifecycle::Reserved,
            param_count: 0,
            column_count: 0,
        }
    }

    /// Compiles the reserved SQL on `conn` and moves to `Live`.
    pub(super) fn compile(&mut self, conn: &Rc<Connection>) -> rusqlite::Result<()> {
        let compiled = Compiled::new(conn, &self.sql)?;
        self.param_count = compiled.stmt.parameter_count();
        self.column_count = compiled.stmt.column_count();
        self.lifecycle = Lifecycle::Live(compiled);
        Ok(())
    }

    /// Runs `action` against the compiled statement, or returns `None` when
    /// the statement is not live.
    pub(super) fn with_compiled<R>(
        &mut self,
        action: impl FnOnce(&mut rusqlite::Statement<'_>) -> R,
    ) -> Option<R> {
        match &mut self.lifecycle {
            Lifecycle::Live(compiled) => Some(action(&mut compiled.stmt)),
            Lifecycle::Reserved | Lifecycle::Released => None,
        }
    }

    /// Finalizes the engine statement and moves to `Released`, reporting
    /// whether there was a compiled statement to finalize.
    pub(super) fn release(&mut self) -> bool {
        let previous = mem::replace(&mut self.lifecycle, Lifecycle::Released);
        matches!(previous, Lifecycle::Live(_))
    }

    /// Registry ID clients use to refer to this statement.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// SQL text of the single statement this handle compiles.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Current lifetime state.
    #[must_use]
    pub fn state(&self) -> StatementState {
        match self.lifecycle {
            Lifecycle::Reserved => StatementState::Reserved,
            Lifecycle::Live(_) => StatementState::Live,
            Lifecycle::Released => StatementState::Released,
        }
    }

    /// Number of bindable parameters.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Number of result columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_count
    }
}

/// Splits off the first statement in `sql` that compiles to something.
///
/// Empty statements and comments before it are skipped. Returns `None` when
/// nothing but whitespace, comments and semicolons remains.
pub(crate) fn next_statement(sql: &str) -> Option<(&str, &str)> {
    let mut rest = sql;
    while !is_blank(rest) {
        let (head, tail) = split_first_statement(rest);
        if !is_blank(head) {
            return Some((head, tail));
        }
        rest = tail;
    }
    None
}

/// Splits `sql` after its first complete statement.
///
/// Returns the statement and the unconsumed tail. Semicolons inside string
/// literals, comments, or trigger bodies do not end a statement. Text without
/// a terminating semicolon is returned whole with an empty tail.
pub(crate) fn split_first_statement(sql: &str) -> (&str, &str) {
    for (index, _) in sql.match_indices(';') {
        let (head, tail) = sql.split_at(index + 1);
        if is_complete(head) {
            return (head, tail);
        }
    }
    (sql, "")
}

/// Whether `sql` compiles to no statement at all: only whitespace, comments
/// and empty statements.
pub(crate) fn is_blank(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, after)| after);
        } else {
            return rest.is_empty();
        }
    }
}

fn is_complete(sql: &str) -> bool {
    let Ok(text) = CString::new(sql) else {
        return false;
    };
    // SAFETY: `text` is a NUL-terminated buffer that outlives the call, and
    // `sqlite3_complete` only reads it.
    unsafe { rusqlite::ffi::sqlite3_complete(text.as_ptr()) != 0 }
}
