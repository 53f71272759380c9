//! Error types for archive queries, grouping and mutations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the query and mutation layer.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// A filter, drill-down key or pagination value was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// An unknown sort, group or group-sort field was requested.
    #[error("unknown {kind} field {name:?}; valid fields: {valid}")]
    InvalidField {
        kind: &'static str,
        name: String,
        valid: String,
    },

    #[error("archive is opened read-only; open it writable to enable mutations")]
    ReadOnly,

    /// The store rejected a statement. Carries the generated SQL.
    #[error("query failed: {source} (query: {query})")]
    QueryExecution {
        query: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("archive database not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("change log entry {id} is malformed: {reason}")]
    CorruptEntry { id: i64, reason: String },

    #[error("config error: {0}")]
    Config(String),
}

impl ArchiveError {
    pub(crate) fn execution(query: impl Into<String>, source: sqlx::Error) -> Self {
        ArchiveError::QueryExecution {
            query: query.into(),
            source,
        }
    }

    pub(crate) fn invalid_field(kind: &'static str, name: &str, valid: &[&str]) -> Self {
        ArchiveError::InvalidField {
            kind,
            name: name.to_string(),
            valid: valid.join(", "),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_execution_keeps_query_and_cause() {
        let err = ArchiveError::execution("SELECT 1", sqlx::Error::RowNotFound);
        match &err {
            ArchiveError::QueryExecution { query, source } => {
                assert_eq!(query, "SELECT 1");
                assert!(matches!(source, sqlx::Error::RowNotFound));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("SELECT 1"));
    }

    #[test]
    fn read_only_message_mentions_read_only() {
        assert!(ArchiveError::ReadOnly.to_string().contains("read-only"));
    }

    #[test]
    fn invalid_field_lists_valid_names() {
        let err = ArchiveError::invalid_field("sort", "colour", &["date", "size"]);
        let text = err.to_string();
        assert!(text.contains("\"colour\""));
        assert!(text.contains("date, size"));
    }
}
