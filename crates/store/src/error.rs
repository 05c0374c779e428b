use std::time::Duration;

use sqlx::error::ErrorKind as DbErrorKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request reached the database and failed for a known reason.
    KnownRequest,
    /// The database failed in a way this layer does not recognise.
    UnknownRequest,
    /// The arguments were rejected before any SQL was sent.
    Validation,
    /// The connection or schema could not be set up.
    Initialization,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No {model} record found")]
    NotFound { model: &'static str },

    #[error("Unique constraint failed on `{target}`")]
    UniqueViolation { target: String },

    #[error("Foreign key constraint failed")]
    ForeignKeyViolation,

    #[error("Null constraint failed on `{target}`")]
    NullViolation { target: String },

    /// A stored value would not fit the column's type.
    #[error("Value out of range for `{target}`")]
    OutOfRange { target: String },

    #[error("Unable to start a transaction within {0:?}")]
    TransactionStart(Duration),

    #[error("Transaction exceeded its timeout of {0:?} and was rolled back")]
    TransactionExpired(Duration),

    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Failed to initialize the store: {0}")]
    Initialization(String),

    #[error(transparent)]
    Unknown(sqlx::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. }
            | Error::UniqueViolation { .. }
            | Error::ForeignKeyViolation
            | Error::NullViolation { .. }
            | Error::OutOfRange { .. }
            | Error::TransactionStart(_)
            | Error::TransactionExpired(_) => ErrorKind::KnownRequest,
            Error::Unknown(_) => ErrorKind::UnknownRequest,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Initialization(_) => ErrorKind::Initialization,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "record_not_found",
            Error::UniqueViolation { .. } => "unique_violation",
            Error::ForeignKeyViolation => "foreign_key_violation",
            Error::NullViolation { .. } => "null_violation",
            Error::OutOfRange { .. } => "value_out_of_range",
            Error::TransactionStart(_) => "transaction_start_timeout",
            Error::TransactionExpired(_) => "transaction_expired",
            Error::Validation(_) => "validation",
            Error::Initialization(_) => "initialization",
            Error::Unknown(_) => "unknown",
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let sqlx::Error::Database(db) = &err else {
            return Error::Unknown(err);
        };
        // SQLite reports "UNIQUE constraint failed: users.email"; range checks
        // are named after their column.
        let target = db
            .message()
            .split_once("failed: ")
            .map(|(_, target)| target.to_string())
            .unwrap_or_default();
        match db.kind() {
            DbErrorKind::UniqueViolation => Error::UniqueViolation { target },
            DbErrorKind::ForeignKeyViolation => Error::ForeignKeyViolation,
            DbErrorKind::NotNullViolation => Error::NullViolation { target },
            DbErrorKind::CheckViolation => Error::OutOfRange { target },
            _ => Error::Unknown(err),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Initialization(err.to_string())
    }
}
