//! Errors raised while reading or writing download, file, pause and undo rows.

use std::fmt;

use thiserror::Error;

/// What went wrong inside `SQLite`, so callers can tell a full pool from a bad row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// Another connection held the lock past the busy timeout.
    BusyOrLocked,
    /// A duplicate filename in a download, an unknown state or a dangling download id.
    ConstraintViolation,
    /// No pooled connection became free in time.
    PoolTimeout,
    /// The pool was closed at shutdown.
    PoolClosed,
    /// A single-row query came back empty.
    RowNotFound,
    /// The state database file could not be read or written.
    Io,
    /// The driver rejected the exchange.
    Protocol,
    /// Anything else.
    Other,
}

impl StoreDbErrorKind {
    /// Classifies a driver error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return StoreDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return StoreDbErrorKind::BusyOrLocked;
    }

    StoreDbErrorKind::Other
}

/// Failure of a state-store query or of decoding what it returned.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The query itself failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Classified cause.
        kind: StoreDbErrorKind,
        /// Driver message.
        message: String,
    },

    /// No download row with this id.
    #[error("download not found: {0}")]
    DownloadNotFound(String),

    /// No file row with this name in the download.
    #[error("file not found: {filename} in download {download_id}")]
    FileNotFound {
        /// Owning download.
        download_id: String,
        /// Requested filename.
        filename: String,
    },

    /// A stored state string did not parse.
    #[error("invalid state '{state}' stored for {entity}")]
    InvalidState {
        /// `download` or `file`.
        entity: &'static str,
        /// The unparseable value.
        state: String,
    },

    /// A JSON column could not be encoded or decoded.
    #[error("invalid JSON in {column}: {message}")]
    Json {
        /// Column name.
        column: &'static str,
        /// Parser message.
        message: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Wraps a `serde_json` failure for a JSON-valued column.
    #[must_use]
    pub fn json(column: &'static str, error: &serde_json::Error) -> Self {
        Self::Json {
            column,
            message: error.to_string(),
        }
    }

    /// Returns the classified cause when the query itself failed.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
