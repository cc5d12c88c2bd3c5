//! Diagnostic error holder embedded in stateful server objects.
//!
//! An [`ErrorContext`] remembers the most recent failure of its owner so the
//! caller can read a human-readable description right after a failing call
//! returns. It does not drive control flow: typed `thiserror` enums do that.

use std::error::Error as StdError;
use std::fmt;

/// Last failure recorded by a connection, database or statement.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    message: Option<String>,
}

impl ErrorContext {
    /// Creates an empty context.
    #[must_use]
    pub const fn new() -> Self {
        Self { message: None }
    }

    /// Replaces the recorded message.
    pub fn set(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Records an error, rendering its whole `source` chain.
    pub fn record(&mut self, error: &(dyn StdError + 'static)) {
        self.message = Some(render_chain(error));
    }

    /// Prefixes the recorded message with the step that failed.
    ///
    /// With nothing recorded the prefix becomes the message.
    pub fn wrap(&mut self, prefix: &str) {
        self.message = Some(match self.message.take() {
            Some(cause) => format!("{prefix}: {cause}"),
            None => prefix.to_owned(),
        });
    }

    /// Records an allocation failure for the named operation.
    pub fn out_of_memory(&mut self, operation: &str) {
        self.message = Some(format!("{operation}: out of memory"));
    }

    /// Forgets the recorded message.
    pub fn clear(&mut self) {
        self.message = None;
    }

    /// The recorded message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message.is_none()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.message.as_deref().unwrap_or(""))
    }
}

/// Joins an error and its sources with `": "`, skipping sources whose text
/// the parent already embeds.
pub(crate) fn render_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug, thiserror::Error)]
    #[error("unable to open")]
    struct Outer {
        #[source]
        source: io::Error,
    }

    #[test]
    fn wrap_prefixes_existing_message() {
        let mut context = ErrorContext::new();
        context.set("disk I/O error");
        context.wrap("unable to set WAL mode");
        assert_eq!(context.message(), Some("unable to set WAL mode: disk I/O error"));
    }

    #[test]
    fn wrap_without_cause_uses_prefix() {
        let mut context = ErrorContext::new();
        context.wrap("unable to set WAL replication");
        assert_eq!(context.to_string(), "unable to set WAL replication");
    }

    #[test]
    fn record_renders_source_chain() {
        let mut context = ErrorContext::new();
        let error = Outer {
            source: io::Error::other("permission denied"),
        };
        context.record(&error);
        assert_eq!(context.message(), Some("unable to open: permission denied"));
    }

    #[test]
    fn new_failures_overwrite_old_ones() {
        let mut context = ErrorContext::new();
        context.set("first");
        context.out_of_memory("unable to register statement");
        assert_eq!(
            context.message(),
            Some("unable to register statement: out of memory")
        );
        context.clear();
        assert!(context.is_empty());
    }
}
