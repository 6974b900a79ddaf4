// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use sweeper_storage::{ClassifiedError, RepositoryErrorKind};
use thiserror::Error;

/// SQLSTATE codes for failures which go away by themselves: lost connections,
/// server shutdowns, serialization failures and deadlocks
const TRANSIENT_SQLSTATES: &[&str] = &["57P01", "57P02", "57P03", "40001", "40P01", "53300"];

/// Generic error when interacting with the database
#[derive(Debug, Error)]
#[error(transparent)]
pub enum DatabaseError {
    /// An error which came from the database itself
    Driver {
        /// The underlying error from the database driver
        #[from]
        source: sqlx::Error,
    },

    /// An error which occured while converting the data from the database
    Inconsistency(#[from] DatabaseInconsistencyError),

    /// An error which happened because the requested database operation is
    /// invalid
    #[error("Invalid database operation")]
    InvalidOperation {
        /// The source of the error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl DatabaseError {
    pub(crate) fn to_invalid_operation<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::InvalidOperation {
            source: Some(Box::new(e)),
        }
    }
}

impl ClassifiedError for DatabaseError {
    fn kind(&self) -> RepositoryErrorKind {
        let Self::Driver { source } = self else {
            return RepositoryErrorKind::Query;
        };

        match source {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => RepositoryErrorKind::Connectivity,

            sqlx::Error::Database(error) => {
                let transient = error.code().is_some_and(|code| {
                    // Class 08 is "connection exception"
                    code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&&*code)
                });

                if transient {
                    RepositoryErrorKind::Connectivity
                } else {
                    RepositoryErrorKind::Query
                }
            }

            _ => RepositoryErrorKind::Query,
        }
    }
}

/// An error which occured while converting the data from the database
#[derive(Debug, Error)]
#[error("Database inconsistency on table {table} column {column:?} row {row:?}")]
pub struct DatabaseInconsistencyError {
    table: &'static str,
    column: Option<&'static str>,
    row: Option<ulid::Ulid>,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DatabaseInconsistencyError {
    /// Create a new [`DatabaseInconsistencyError`] for the given table
    #[must_use]
    pub(crate) const fn on(table: &'static str) -> Self {
        Self {
            table,
            column: None,
            row: None,
            source: None,
        }
    }

    /// Set the column name which caused the error
    #[must_use]
    pub(crate) const fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Set the row ID which caused the error
    #[must_use]
    pub(crate) const fn row(mut self, row: ulid::Ulid) -> Self {
        self.row = Some(row);
        self
    }

    /// Give the source of the error
    #[must_use]
    pub(crate) fn source<E: std::error::Error + Send + Sync + 'static>(
        mut self,
        source: E,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}
