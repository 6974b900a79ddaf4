// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to select and delete records subject to retention

use async_trait::async_trait;
use sweeper_data_model::{Collection, Record, RetentionPredicate};
use ulid::Ulid;

use crate::repository_impl;

/// A [`RecordRepository`] helps selecting and removing records from the
/// store
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Find records matching the predicate
    ///
    /// Returns at most `limit` records, ordered by ID
    ///
    /// # Parameters
    ///
    /// * `collection`: The collection to look into
    /// * `predicate`: Which records are eligible
    /// * `limit`: The maximum number of records to return
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
        limit: usize,
    ) -> Result<Vec<Record>, Self::Error>;

    /// Delete the records with the given IDs
    ///
    /// Returns the number of records actually removed, which can be lower
    /// than the number of IDs if some of them were already gone
    ///
    /// # Parameters
    ///
    /// * `collection`: The collection to delete from
    /// * `ids`: The IDs of the records to delete
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn delete_by_ids(
        &mut self,
        collection: Collection,
        ids: &[Ulid],
    ) -> Result<usize, Self::Error>;

    /// Count the records matching the predicate
    ///
    /// # Parameters
    ///
    /// * `collection`: The collection to look into
    /// * `predicate`: Which records are eligible
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
    ) -> Result<usize, Self::Error>;
}

repository_impl!(RecordRepository:
    async fn find(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
        limit: usize,
    ) -> Result<Vec<Record>, Self::Error>;

    async fn delete_by_ids(
        &mut self,
        collection: Collection,
        ids: &[Ulid],
    ) -> Result<usize, Self::Error>;

    async fn count(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
    ) -> Result<usize, Self::Error>;
);
