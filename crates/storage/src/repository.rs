// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};
use thiserror::Error;

use crate::{MapErr, records::RecordRepository};

/// Whether a storage failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryErrorKind {
    /// The backend could not be reached, or the connection was lost. The
    /// operation can be retried as a whole.
    Connectivity,

    /// The backend rejected the operation. Retrying will not help.
    Query,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => f.write_str("connectivity"),
            Self::Query => f.write_str("query"),
        }
    }
}

/// A backend error which knows whether it is transient
pub trait ClassifiedError: std::error::Error + Send + Sync + 'static {
    /// Classify this error
    fn kind(&self) -> RepositoryErrorKind;
}

/// A type-erased error from a storage backend, tagged with its
/// [`RepositoryErrorKind`]
#[derive(Debug, Error)]
#[error("{kind} error in the storage backend")]
pub struct RepositoryError {
    kind: RepositoryErrorKind,

    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RepositoryError {
    /// Construct a [`RepositoryError`] from any classified backend error
    pub fn from_error<E>(value: E) -> Self
    where
        E: ClassifiedError,
    {
        Self {
            kind: value.kind(),
            source: Box::new(value),
        }
    }

    /// Construct a [`RepositoryError`] of the given kind from any error
    pub fn new<E>(kind: RepositoryErrorKind, value: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            source: Box::new(value),
        }
    }

    /// The kind of failure
    #[must_use]
    pub fn kind(&self) -> RepositoryErrorKind {
        self.kind
    }

    /// Whether retrying the operation may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == RepositoryErrorKind::Connectivity
    }
}

impl ClassifiedError for RepositoryError {
    fn kind(&self) -> RepositoryErrorKind {
        self.kind
    }
}

/// A [`RepositoryFactory`] is a factory that can create a [`BoxRepository`]
#[async_trait]
pub trait RepositoryFactory {
    /// Create a new [`BoxRepository`]
    async fn create(&self) -> Result<BoxRepository, RepositoryError>;
}

/// A type-erased [`RepositoryFactory`]
pub type BoxRepositoryFactory = Arc<dyn RepositoryFactory + Send + Sync + 'static>;

/// A [`Repository`] helps interacting with the underlying storage backend.
pub trait Repository<E>:
    RepositoryAccess<Error = E> + RepositoryTransaction<Error = E> + Send
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Construct a (boxed) typed-erased repository
    fn boxed(self) -> BoxRepository
    where
        Self: Sync + Sized + 'static,
        E: ClassifiedError,
    {
        Box::new(MapErr::new(self, RepositoryError::from_error::<E>))
    }
}

/// A type-erased [`Repository`]
pub type BoxRepository = Box<dyn Repository<RepositoryError> + Send + Sync + 'static>;

/// A [`RepositoryTransaction`] can be saved or cancelled, after a series
/// of operations.
pub trait RepositoryTransaction {
    /// The error type used by the [`Self::save`] and [`Self::cancel`]
    /// functions
    type Error;

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to commit the
    /// transaction.
    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to rollback
    /// the transaction.
    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;
}

/// Access the various repositories the backend implements.
pub trait RepositoryAccess: Send {
    /// The backend-specific error type used by each repository.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get a [`RecordRepository`]
    fn records<'c>(&'c mut self) -> Box<dyn RecordRepository<Error = Self::Error> + 'c>;
}

impl<R, F, E1, E> Repository<E> for MapErr<R, F>
where
    R: Repository<E1> + RepositoryAccess<Error = E1> + RepositoryTransaction<Error = E1>,
    F: FnMut(E1) -> E + Send + Sync + 'static,
    E1: std::error::Error + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
}

impl<R, F, E> RepositoryTransaction for MapErr<R, F>
where
    R: RepositoryTransaction,
    R::Error: 'static,
    F: FnMut(R::Error) -> E + Send + Sync + 'static,
    E: std::error::Error,
{
    type Error = E;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        Box::new(self.inner).save().map_err(self.mapper).boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        Box::new(self.inner).cancel().map_err(self.mapper).boxed()
    }
}

impl<R, F, E> RepositoryAccess for MapErr<R, F>
where
    R: RepositoryAccess,
    R::Error: 'static,
    F: FnMut(R::Error) -> E + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn records<'c>(&'c mut self) -> Box<dyn RecordRepository<Error = Self::Error> + 'c> {
        Box::new(MapErr::new(self.inner.records(), &mut self.mapper))
    }
}

impl<R: RepositoryAccess + ?Sized> RepositoryAccess for Box<R> {
    type Error = R::Error;

    fn records<'c>(&'c mut self) -> Box<dyn RecordRepository<Error = Self::Error> + 'c> {
        (**self).records()
    }
}
