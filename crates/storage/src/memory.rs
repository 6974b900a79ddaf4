// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An in-memory storage backend
//!
//! Records live in a shared map, so every repository created by the same
//! [`MemoryRepositoryFactory`] sees the same data. Deletions are staged in the
//! repository and only applied on [`RepositoryTransaction::save`], like a
//! transaction would.
//!
//! The backend can be told to fail in the ways a real store does, which makes
//! it useful to exercise retry and partial-failure handling in tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures_util::{FutureExt, future::BoxFuture};
use sweeper_data_model::{Collection, Record, RetentionPredicate};
use thiserror::Error;
use ulid::Ulid;

use crate::{
    BoxRepository, ClassifiedError, RecordRepository, Repository, RepositoryAccess,
    RepositoryError, RepositoryErrorKind, RepositoryFactory, RepositoryTransaction,
};

/// Errors returned by the in-memory backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A simulated connectivity failure
    #[error("the in-memory store is unavailable")]
    Unavailable,

    /// A simulated query rejection
    #[error("the in-memory store rejected the query")]
    Rejected,
}

impl ClassifiedError for MemoryError {
    fn kind(&self) -> RepositoryErrorKind {
        match self {
            Self::Unavailable => RepositoryErrorKind::Connectivity,
            Self::Rejected => RepositoryErrorKind::Query,
        }
    }
}

#[derive(Default)]
struct State {
    collections: HashMap<Collection, BTreeMap<Ulid, Record>>,

    /// Number of upcoming operations which should fail with
    /// [`MemoryError::Unavailable`]
    unavailable_for: usize,

    /// Whether every query should fail with [`MemoryError::Rejected`]
    rejecting: bool,

    /// Number of IDs the next deletion should silently leave in place
    partial_delete: Option<usize>,

    /// Number of upcoming deletions which should remove nothing
    stalled_deletes: usize,

    /// The largest number of records handed out by a single `find`
    peak_batch: usize,

    finds: usize,
    deletes: usize,
}

impl State {
    fn check(&mut self) -> Result<(), MemoryError> {
        if self.rejecting {
            return Err(MemoryError::Rejected);
        }

        if self.unavailable_for > 0 {
            self.unavailable_for -= 1;
            return Err(MemoryError::Unavailable);
        }

        Ok(())
    }
}

/// A shared in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock can't leave the maps half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record in a collection, replacing any record with the same ID
    pub fn insert(&self, collection: Collection, record: Record) {
        self.lock()
            .collections
            .entry(collection)
            .or_default()
            .insert(record.id, record);
    }

    /// Number of records currently held in a collection
    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        self.lock()
            .collections
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// Whether a collection holds no records
    #[must_use]
    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    /// All the records of a collection, ordered by ID
    #[must_use]
    pub fn records(&self, collection: Collection) -> Vec<Record> {
        self.lock()
            .collections
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `count` operations fail with a connectivity error
    pub fn fail_next(&self, count: usize) {
        self.lock().unavailable_for = count;
    }

    /// Make every subsequent query fail with a query error
    pub fn reject_queries(&self) {
        self.lock().rejecting = true;
    }

    /// Make the next deletion leave `count` of the requested IDs in place,
    /// while reporting only the ones it actually removed
    pub fn partially_delete_next(&self, count: usize) {
        self.lock().partial_delete = Some(count);
    }

    /// Make the next `count` deletions remove nothing, as if another process
    /// had removed the records first
    pub fn stall_next_deletes(&self, count: usize) {
        self.lock().stalled_deletes = count;
    }

    /// The largest number of records returned by a single `find`
    #[must_use]
    pub fn peak_batch(&self) -> usize {
        self.lock().peak_batch
    }

    /// How many `find` calls succeeded
    #[must_use]
    pub fn finds(&self) -> usize {
        self.lock().finds
    }

    /// How many `delete_by_ids` calls succeeded
    #[must_use]
    pub fn deletes(&self) -> usize {
        self.lock().deletes
    }
}

/// A [`RepositoryFactory`] handing out [`MemoryRepository`] sharing the same
/// [`MemoryStore`]
#[derive(Clone, Default)]
pub struct MemoryRepositoryFactory {
    store: MemoryStore,
}

impl MemoryRepositoryFactory {
    /// Create a new factory over the given store
    #[must_use]
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// The store this factory hands out repositories for
    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        Ok(MemoryRepository::new(self.store.clone()).boxed())
    }
}

/// An implementation of the [`Repository`] trait backed by a [`MemoryStore`]
pub struct MemoryRepository {
    store: MemoryStore,
    pending: HashMap<Collection, BTreeSet<Ulid>>,
}

impl MemoryRepository {
    /// Create a new repository over the given store
    #[must_use]
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            pending: HashMap::new(),
        }
    }
}

impl Repository<MemoryError> for MemoryRepository {}

impl RepositoryTransaction for MemoryRepository {
    type Error = MemoryError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let mut state = self.store.lock();
        let result = state.check();
        if result.is_ok() {
            for (collection, ids) in &self.pending {
                if let Some(records) = state.collections.get_mut(collection) {
                    for id in ids {
                        records.remove(id);
                    }
                }
            }
        }

        futures_util::future::ready(result).boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        futures_util::future::ready(Ok(())).boxed()
    }
}

impl RepositoryAccess for MemoryRepository {
    type Error = MemoryError;

    fn records<'c>(&'c mut self) -> Box<dyn RecordRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryRecordRepository { repo: self })
    }
}

struct MemoryRecordRepository<'c> {
    repo: &'c mut MemoryRepository,
}

impl MemoryRecordRepository<'_> {
    fn is_pending(&self, collection: Collection, id: &Ulid) -> bool {
        self.repo
            .pending
            .get(&collection)
            .is_some_and(|ids| ids.contains(id))
    }
}

#[async_trait]
impl RecordRepository for MemoryRecordRepository<'_> {
    type Error = MemoryError;

    async fn find(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
        limit: usize,
    ) -> Result<Vec<Record>, Self::Error> {
        let mut state = self.repo.store.lock();
        state.check()?;

        let records: Vec<Record> = state
            .collections
            .get(&collection)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| predicate.matches(record))
            .filter(|record| !self.is_pending(collection, &record.id))
            .take(limit)
            .cloned()
            .collect();

        state.peak_batch = state.peak_batch.max(records.len());
        state.finds += 1;

        Ok(records)
    }

    async fn delete_by_ids(
        &mut self,
        collection: Collection,
        ids: &[Ulid],
    ) -> Result<usize, Self::Error> {
        let mut state = self.repo.store.lock();
        state.check()?;

        let keep = if state.stalled_deletes > 0 {
            state.stalled_deletes -= 1;
            ids.len()
        } else {
            state.partial_delete.take().unwrap_or(0)
        };
        let existing = state.collections.get(&collection);
        let mut deleted = 0;
        let pending = self.repo.pending.entry(collection).or_default();
        for id in ids.iter().skip(keep) {
            let exists = existing.is_some_and(|records| records.contains_key(id));
            if exists && pending.insert(*id) {
                deleted += 1;
            }
        }

        state.deletes += 1;

        Ok(deleted)
    }

    async fn count(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
    ) -> Result<usize, Self::Error> {
        let mut state = self.repo.store.lock();
        state.check()?;

        let count = state
            .collections
            .get(&collection)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| predicate.matches(record))
            .filter(|record| !self.is_pending(collection, &record.id))
            .count();

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 2, 27, 21, 23, 26).unwrap()
    }

    fn seed(store: &MemoryStore, count: usize, kind: &str, ts: DateTime<Utc>) -> Vec<Ulid> {
        (0..count)
            .map(|_| {
                let id = Ulid::new();
                store.insert(
                    Collection::EventLog,
                    Record {
                        id,
                        kind: kind.to_owned(),
                        ts,
                    },
                );
                id
            })
            .collect()
    }

    #[tokio::test]
    async fn test_find_filters_and_limits() {
        let store = MemoryStore::new();
        let predicate = RetentionPredicate::new("TASK", cutoff()).unwrap();
        seed(&store, 5, "TASK", cutoff() - Duration::days(1));
        seed(&store, 3, "HOST", cutoff() - Duration::days(1));
        seed(&store, 2, "TASK", cutoff() + Duration::days(1));

        let mut repo = MemoryRepository::new(store.clone());
        let found = repo
            .records()
            .find(Collection::EventLog, &predicate, 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|r| predicate.matches(r)));
        // Ordered by ID
        assert!(found.windows(2).all(|w| w[0].id < w[1].id));

        let count = repo
            .records()
            .count(Collection::EventLog, &predicate)
            .await
            .unwrap();
        assert_eq!(count, 5);

        // Other collections are separate
        let count = repo
            .records()
            .count(Collection::Tasks, &predicate)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_delete_applies_on_save() {
        let store = MemoryStore::new();
        let predicate = RetentionPredicate::new("TASK", cutoff()).unwrap();
        let ids = seed(&store, 4, "TASK", cutoff());

        let mut repo = Box::new(MemoryRepository::new(store.clone()));
        let deleted = repo
            .records()
            .delete_by_ids(Collection::EventLog, &ids[..2])
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        // Staged deletions are hidden from this repository, but not applied yet
        let count = repo
            .records()
            .count(Collection::EventLog, &predicate)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.len(Collection::EventLog), 4);

        repo.save().await.unwrap();
        assert_eq!(store.len(Collection::EventLog), 2);

        // Cancelling drops staged deletions
        let mut repo = Box::new(MemoryRepository::new(store.clone()));
        repo.records()
            .delete_by_ids(Collection::EventLog, &ids[2..])
            .await
            .unwrap();
        repo.cancel().await.unwrap();
        assert_eq!(store.len(Collection::EventLog), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_ids() {
        let store = MemoryStore::new();
        let ids = seed(&store, 2, "TASK", cutoff());

        let mut repo = MemoryRepository::new(store.clone());
        let deleted = repo
            .records()
            .delete_by_ids(Collection::EventLog, &[ids[0], Ulid::nil(), ids[0]])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        let predicate = RetentionPredicate::new("TASK", cutoff()).unwrap();
        let ids = seed(&store, 4, "TASK", cutoff());

        store.fail_next(1);
        let mut repo = MemoryRepository::new(store.clone());
        let err = repo
            .records()
            .find(Collection::EventLog, &predicate, 10)
            .await
            .unwrap_err();
        assert_eq!(err, MemoryError::Unavailable);
        assert_eq!(err.kind(), RepositoryErrorKind::Connectivity);

        // The failure only affects a single operation
        repo.records()
            .find(Collection::EventLog, &predicate, 10)
            .await
            .unwrap();

        store.partially_delete_next(1);
        let deleted = repo
            .records()
            .delete_by_ids(Collection::EventLog, &ids)
            .await
            .unwrap();
        assert_eq!(deleted, 3);

        store.reject_queries();
        let err = repo
            .records()
            .count(Collection::EventLog, &predicate)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RepositoryErrorKind::Query);
    }

    #[tokio::test]
    async fn test_boxed_repository_maps_errors() {
        let store = MemoryStore::new();
        let predicate = RetentionPredicate::new("TASK", cutoff()).unwrap();
        let factory = MemoryRepositoryFactory::new(store.clone());

        store.fail_next(1);
        let mut repo = factory.create().await.unwrap();
        let err = repo
            .records()
            .find(Collection::EventLog, &predicate, 10)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_matches!(err.kind(), RepositoryErrorKind::Connectivity);
    }
}
