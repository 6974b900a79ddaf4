// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Batched deletion of records subject to retention

use std::{num::NonZeroUsize, time::Duration};

use sweeper_data_model::{Collection, RetentionPredicate};
use sweeper_storage::{BoxRepositoryFactory, RepositoryError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::retry::{RetryPolicy, with_retry};

/// How many batches in a row may fetch records without deleting any before
/// the deleter gives up
const MAX_STALLED_BATCHES: usize = 3;

/// What a [`CappedBatchDeleter`] deletes, and how fast
#[derive(Debug, Clone)]
pub struct RetentionSettings {
    /// Which records are eligible for deletion
    pub predicate: RetentionPredicate,

    /// The collection to delete from
    pub collection: Collection,

    /// Maximum number of records fetched and deleted at once
    pub batch_size: NonZeroUsize,

    /// Maximum number of records deleted over a whole run, if any
    pub max_total: Option<usize>,

    /// Pause between two batches
    pub delay: Duration,

    /// How transient storage failures are retried
    pub retry: RetryPolicy,
}

impl RetentionSettings {
    /// Settings deleting every record matching `predicate` in the default
    /// collection, without cap nor delay
    #[must_use]
    pub fn new(predicate: RetentionPredicate, batch_size: NonZeroUsize) -> Self {
        Self {
            predicate,
            collection: Collection::default(),
            batch_size,
            max_total: None,
            delay: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the collection to delete from
    #[must_use]
    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collection = collection;
        self
    }

    /// Stop after deleting `max_total` records
    #[must_use]
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = Some(max_total);
        self
    }

    /// Pause for `delay` between two batches
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// An error which stopped a deletion
#[derive(Debug, Error)]
pub enum DeleteError {
    /// The store stayed unreachable through every retry
    #[error("storage backend unreachable after {attempts} attempts")]
    Connectivity {
        /// How many times the operation was attempted
        attempts: u32,

        /// The last error
        #[source]
        source: RepositoryError,
    },

    /// The store rejected the operation
    #[error("storage backend rejected the operation")]
    Query(#[source] RepositoryError),
}

/// Whether a [`CappedBatchDeleter`] may still delete records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleterState {
    /// More batches may follow
    Running,

    /// Nothing is left to do. This state is terminal.
    Done,
}

/// Why [`CappedBatchDeleter::run_to_completion`] stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No eligible record was left
    Exhausted,

    /// The maximum number of deletions was reached
    CapReached,

    /// The run was cancelled between two batches
    Cancelled,

    /// Batches kept fetching records which could not be deleted
    Stalled,
}

/// Summary of a [`CappedBatchDeleter::run_to_completion`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Records deleted during the run
    pub deleted: usize,

    /// Batches which deleted at least one record
    pub batches: usize,

    /// Why the run stopped
    pub stop: StopReason,

    /// Records still matching the predicate once the run stopped, if they
    /// could be counted
    pub remaining: Option<usize>,
}

struct BatchOutcome {
    requested: usize,
    deleted: usize,
}

/// Deletes the records matching a [`RetentionPredicate`] one bounded batch
/// at a time.
///
/// Each batch fetches at most `batch_size` IDs, deletes exactly those and
/// commits before the next fetch, so no more than `batch_size` IDs are held
/// at once. The cutoff never moves during the life of the deleter.
pub struct CappedBatchDeleter {
    repository_factory: BoxRepositoryFactory,
    settings: RetentionSettings,
    cancellation_token: CancellationToken,
    state: DeleterState,
    deleted: usize,
    batches: usize,
    stalled: bool,
}

impl CappedBatchDeleter {
    /// Create a new deleter
    #[must_use]
    pub fn new(
        repository_factory: BoxRepositoryFactory,
        settings: RetentionSettings,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            repository_factory,
            settings,
            cancellation_token,
            state: DeleterState::Running,
            deleted: 0,
            batches: 0,
            stalled: false,
        }
    }

    /// The current state of the deleter
    #[must_use]
    pub fn state(&self) -> DeleterState {
        self.state
    }

    /// Records deleted since the deleter was created
    #[must_use]
    pub fn deleted(&self) -> usize {
        self.deleted
    }

    /// The settings this deleter runs with
    #[must_use]
    pub fn settings(&self) -> &RetentionSettings {
        &self.settings
    }

    fn cap_reached(&self) -> bool {
        self.settings
            .max_total
            .is_some_and(|max_total| self.deleted >= max_total)
    }

    /// How many records the next batch may delete
    fn next_limit(&self) -> usize {
        let batch_size = self.settings.batch_size.get();
        match self.settings.max_total {
            Some(max_total) => batch_size.min(max_total.saturating_sub(self.deleted)),
            None => batch_size,
        }
    }

    async fn delete_batch(&self, limit: usize) -> Result<BatchOutcome, RepositoryError> {
        let collection = self.settings.collection;
        let mut repo = self.repository_factory.create().await?;

        let records = repo
            .records()
            .find(collection, &self.settings.predicate, limit)
            .await?;

        if records.is_empty() {
            repo.cancel().await?;
            return Ok(BatchOutcome {
                requested: 0,
                deleted: 0,
            });
        }

        let ids: Vec<Ulid> = records.into_iter().map(|record| record.id).collect();
        let deleted = repo.records().delete_by_ids(collection, &ids).await?;
        repo.save().await?;

        Ok(BatchOutcome {
            requested: ids.len(),
            deleted,
        })
    }

    async fn count_eligible(&self) -> Result<usize, RepositoryError> {
        let mut repo = self.repository_factory.create().await?;
        let count = repo
            .records()
            .count(self.settings.collection, &self.settings.predicate)
            .await?;
        repo.cancel().await?;
        Ok(count)
    }

    /// Fetch one batch of eligible records and delete them.
    ///
    /// Returns the number of records deleted. Once this returns 0 the
    /// deleter is [`DeleterState::Done`], and further calls return 0 without
    /// touching the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejected an operation, or stayed
    /// unreachable through every retry. Records from a committed batch stay
    /// deleted.
    #[tracing::instrument(
        name = "retention.batch",
        skip_all,
        fields(
            db.collection.name = %self.settings.collection,
            record.kind = self.settings.predicate.kind(),
            batch.limit,
        ),
        err,
    )]
    pub async fn run_once(&mut self) -> Result<usize, DeleteError> {
        if self.state == DeleterState::Done {
            return Ok(0);
        }

        let limit = self.next_limit();
        tracing::Span::current().record("batch.limit", limit);
        if limit == 0 {
            debug!("cap reached, nothing left to delete");
            self.state = DeleterState::Done;
            return Ok(0);
        }

        // Records fetched but not deleted were removed by someone else in the
        // meantime, so fetch again until a batch makes progress
        let mut stalled_batches = 0;
        let outcome = loop {
            let outcome = with_retry(
                &self.settings.retry,
                &self.cancellation_token,
                "delete_batch",
                || self.delete_batch(limit),
            )
            .await?;

            if outcome.requested > outcome.deleted {
                warn!(
                    requested = outcome.requested,
                    deleted = outcome.deleted,
                    "Deleted fewer records than requested"
                );
            }

            if outcome.requested == 0 || outcome.deleted > 0 {
                break outcome;
            }

            stalled_batches += 1;
            if stalled_batches >= MAX_STALLED_BATCHES {
                warn!(stalled_batches, "No batch made progress, giving up");
                self.stalled = true;
                self.state = DeleterState::Done;
                return Ok(0);
            }
        };

        if outcome.deleted == 0 {
            debug!("no more records to delete");
            self.state = DeleterState::Done;
            return Ok(0);
        }

        self.deleted += outcome.deleted;
        self.batches += 1;

        if self.cap_reached() {
            self.state = DeleterState::Done;
        }

        debug!(count = outcome.deleted, total = self.deleted, "deleted batch");

        Ok(outcome.deleted)
    }

    /// Delete batches until nothing is eligible anymore, the cap is reached or
    /// the run is cancelled.
    ///
    /// The configured delay is observed between two batches, and cancelling
    /// the token interrupts it.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch or one of the measurements failed.
    #[tracing::instrument(
        name = "retention.run",
        skip_all,
        fields(
            db.collection.name = %self.settings.collection,
            record.kind = self.settings.predicate.kind(),
            retention.cutoff = %self.settings.predicate.cutoff(),
        ),
        err,
    )]
    pub async fn run_to_completion(&mut self) -> Result<RunReport, DeleteError> {
        let deleted_before = self.deleted;
        let batches_before = self.batches;

        let stop = loop {
            if self.cancellation_token.is_cancelled() {
                self.state = DeleterState::Done;
                break StopReason::Cancelled;
            }

            self.run_once().await?;

            if self.state == DeleterState::Done {
                break if self.stalled {
                    StopReason::Stalled
                } else if self.cap_reached() {
                    StopReason::CapReached
                } else {
                    StopReason::Exhausted
                };
            }

            if !self.settings.delay.is_zero() {
                tokio::select! {
                    () = self.cancellation_token.cancelled() => {
                        self.state = DeleterState::Done;
                        break StopReason::Cancelled;
                    }
                    () = tokio::time::sleep(self.settings.delay) => {}
                }
            }
        };

        let remaining = match self.measure().await {
            Ok(remaining) => Some(remaining),
            Err(error) => {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "Could not count the remaining records"
                );
                None
            }
        };
        let report = RunReport {
            deleted: self.deleted - deleted_before,
            batches: self.batches - batches_before,
            stop,
            remaining,
        };

        if report.deleted == 0 {
            debug!(?stop, ?remaining, "no records to clean up");
        } else {
            info!(
                count = report.deleted,
                batches = report.batches,
                ?stop,
                ?remaining,
                "cleaned up records"
            );
        }

        Ok(report)
    }

    /// Count the records currently matching the predicate
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejected the query, or stayed unreachable
    /// through every retry.
    #[tracing::instrument(
        name = "retention.measure",
        skip_all,
        fields(
            db.collection.name = %self.settings.collection,
            record.kind = self.settings.predicate.kind(),
        ),
        err,
    )]
    pub async fn measure(&self) -> Result<usize, DeleteError> {
        with_retry(
            &self.settings.retry,
            &self.cancellation_token,
            "measure",
            || self.count_eligible(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use sweeper_data_model::Record;
    use sweeper_storage::memory::{MemoryRepositoryFactory, MemoryStore};

    use super::*;

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 5, 4, 0, 0, 0).unwrap()
    }

    fn settings(batch_size: usize) -> RetentionSettings {
        let predicate = RetentionPredicate::new("TASK", cutoff()).unwrap();
        RetentionSettings::new(predicate, NonZeroUsize::new(batch_size).unwrap())
    }

    fn seed(
        store: &MemoryStore,
        collection: Collection,
        count: usize,
        kind: &str,
        ts: DateTime<Utc>,
    ) {
        for _ in 0..count {
            store.insert(
                collection,
                Record {
                    id: Ulid::new(),
                    kind: kind.to_owned(),
                    ts,
                },
            );
        }
    }

    fn seed_eligible(store: &MemoryStore, count: usize) {
        seed(
            store,
            Collection::EventLog,
            count,
            "TASK",
            cutoff() - ChronoDuration::days(1),
        );
    }

    fn memory_deleter(store: &MemoryStore, settings: RetentionSettings) -> CappedBatchDeleter {
        CappedBatchDeleter::new(
            Arc::new(MemoryRepositoryFactory::new(store.clone())),
            settings,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_deletes_everything_eligible() {
        let store = MemoryStore::new();
        seed_eligible(&store, 95);

        let mut deleter = memory_deleter(&store, settings(10));
        assert_eq!(deleter.measure().await.unwrap(), 95);

        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(
            report,
            RunReport {
                deleted: 95,
                batches: 10,
                stop: StopReason::Exhausted,
                remaining: Some(0),
            }
        );
        assert_eq!(deleter.state(), DeleterState::Done);
        assert!(store.is_empty(Collection::EventLog));

        // A second run has nothing left to do
        let mut deleter = memory_deleter(&store, settings(10));
        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.batches, 0);
        assert_eq!(report.stop, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn test_peak_batch_is_bounded() {
        let store = MemoryStore::new();
        seed_eligible(&store, 10 * 7);

        let mut deleter = memory_deleter(&store, settings(7));
        let report = deleter.run_to_completion().await.unwrap();

        assert_eq!(report.deleted, 70);
        assert_eq!(report.batches, 10);
        assert_eq!(store.peak_batch(), 7);
    }

    #[tokio::test]
    async fn test_cap_truncates_last_batch() {
        let store = MemoryStore::new();
        seed_eligible(&store, 1000);

        let mut deleter = memory_deleter(&store, settings(100).with_max_total(250));
        let report = deleter.run_to_completion().await.unwrap();

        assert_eq!(
            report,
            RunReport {
                deleted: 250,
                batches: 3,
                stop: StopReason::CapReached,
                remaining: Some(750),
            }
        );
        assert_eq!(store.len(Collection::EventLog), 750);

        // Done is terminal
        let finds = store.finds();
        assert_eq!(deleter.run_once().await.unwrap(), 0);
        assert_eq!(store.finds(), finds);
    }

    #[tokio::test]
    async fn test_cap_larger_than_eligible() {
        let store = MemoryStore::new();
        seed_eligible(&store, 30);

        let mut deleter = memory_deleter(&store, settings(100).with_max_total(250));
        let report = deleter.run_to_completion().await.unwrap();

        assert_eq!(report.deleted, 30);
        assert_eq!(report.stop, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn test_nothing_eligible() {
        let store = MemoryStore::new();

        let mut deleter = memory_deleter(&store, settings(10));
        assert_eq!(deleter.run_once().await.unwrap(), 0);
        assert_eq!(deleter.state(), DeleterState::Done);
        assert_eq!(store.deletes(), 0);
    }

    #[tokio::test]
    async fn test_single_batch_when_batch_covers_everything() {
        let store = MemoryStore::new();
        seed_eligible(&store, 5);

        let mut deleter = memory_deleter(&store, settings(10));
        assert_eq!(deleter.run_once().await.unwrap(), 5);
        assert!(store.is_empty(Collection::EventLog));
    }

    #[tokio::test]
    async fn test_successive_batches() {
        let store = MemoryStore::new();
        seed_eligible(&store, 25);

        let mut deleter = memory_deleter(&store, settings(10));
        assert_eq!(deleter.run_once().await.unwrap(), 10);
        assert_eq!(deleter.run_once().await.unwrap(), 10);
        assert_eq!(deleter.run_once().await.unwrap(), 5);
        assert_eq!(deleter.state(), DeleterState::Running);
        assert_eq!(deleter.run_once().await.unwrap(), 0);
        assert_eq!(deleter.state(), DeleterState::Done);
        assert_eq!(deleter.deleted(), 25);
    }

    #[tokio::test]
    async fn test_only_eligible_records_are_deleted() {
        let store = MemoryStore::new();
        // Exactly at the cutoff: eligible
        seed(&store, Collection::EventLog, 3, "TASK", cutoff());
        // Newer than the cutoff
        seed(
            &store,
            Collection::EventLog,
            4,
            "TASK",
            cutoff() + ChronoDuration::seconds(1),
        );
        // Another kind
        seed(
            &store,
            Collection::EventLog,
            5,
            "HOST",
            cutoff() - ChronoDuration::days(1),
        );
        // Another collection
        seed(
            &store,
            Collection::Tasks,
            6,
            "TASK",
            cutoff() - ChronoDuration::days(1),
        );

        let mut deleter = memory_deleter(&store, settings(2));
        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.deleted, 3);

        let left = store.records(Collection::EventLog);
        assert_eq!(left.len(), 9);
        assert!(left.iter().all(|r| r.kind == "HOST" || r.ts > cutoff()));
        assert_eq!(store.len(Collection::Tasks), 6);

        // Targeting the other collection
        let mut deleter =
            memory_deleter(&store, settings(4).with_collection(Collection::Tasks));
        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.deleted, 6);
        assert!(store.is_empty(Collection::Tasks));
        assert_eq!(store.len(Collection::EventLog), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let store = MemoryStore::new();
        seed_eligible(&store, 15);

        let mut deleter = memory_deleter(&store, settings(10));
        store.fail_next(2);
        assert_eq!(deleter.run_once().await.unwrap(), 10);

        store.fail_next(1);
        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.deleted, 5);
        assert!(store.is_empty(Collection::EventLog));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_store_stays_unreachable() {
        let store = MemoryStore::new();
        seed_eligible(&store, 15);

        let mut deleter = memory_deleter(&store, settings(10));
        store.fail_next(100);
        let err = deleter.run_once().await.unwrap_err();
        assert_matches!(err, DeleteError::Connectivity { attempts: 4, .. });
        assert_eq!(store.len(Collection::EventLog), 15);
    }

    #[tokio::test]
    async fn test_query_errors_are_fatal() {
        let store = MemoryStore::new();
        seed_eligible(&store, 15);
        store.reject_queries();

        let mut deleter = memory_deleter(&store, settings(10));
        let err = deleter.run_once().await.unwrap_err();
        assert_matches!(err, DeleteError::Query(_));
        assert_eq!(store.finds(), 0);
        assert_eq!(store.len(Collection::EventLog), 15);
    }

    #[tokio::test]
    async fn test_partial_delete_is_not_fatal() {
        let store = MemoryStore::new();
        seed_eligible(&store, 10);

        let mut deleter = memory_deleter(&store, settings(10));
        store.partially_delete_next(3);
        assert_eq!(deleter.run_once().await.unwrap(), 7);
        assert_eq!(deleter.state(), DeleterState::Running);

        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(deleter.deleted(), 10);
        assert!(store.is_empty(Collection::EventLog));
    }

    #[tokio::test]
    async fn test_batch_deleting_nothing_fetches_again() {
        let store = MemoryStore::new();
        seed_eligible(&store, 20);

        let mut deleter = memory_deleter(&store, settings(10));
        store.partially_delete_next(10);

        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(
            report,
            RunReport {
                deleted: 20,
                batches: 2,
                stop: StopReason::Exhausted,
                remaining: Some(0),
            }
        );
        assert!(store.is_empty(Collection::EventLog));
    }

    #[tokio::test]
    async fn test_stops_when_batches_make_no_progress() {
        let store = MemoryStore::new();
        seed_eligible(&store, 20);

        let mut deleter = memory_deleter(&store, settings(10));
        store.stall_next_deletes(MAX_STALLED_BATCHES);

        assert_eq!(deleter.run_once().await.unwrap(), 0);
        assert_eq!(deleter.state(), DeleterState::Done);
        assert_eq!(store.deletes(), MAX_STALLED_BATCHES);
        assert_eq!(store.len(Collection::EventLog), 20);

        let mut deleter = memory_deleter(&store, settings(10));
        store.stall_next_deletes(MAX_STALLED_BATCHES);
        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.stop, StopReason::Stalled);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.remaining, Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_survives_failed_final_count() {
        let store = MemoryStore::new();
        seed_eligible(&store, 50);

        let token = CancellationToken::new();
        let mut deleter = CappedBatchDeleter::new(
            Arc::new(MemoryRepositoryFactory::new(store.clone())),
            settings(10).with_delay(Duration::from_secs(1)),
            token.clone(),
        );

        let background_store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            background_store.reject_queries();
            token.cancel();
        });

        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.deleted, 20);
        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(report.remaining, None);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = MemoryStore::new();
        seed_eligible(&store, 20);

        let token = CancellationToken::new();
        token.cancel();
        let mut deleter = CappedBatchDeleter::new(
            Arc::new(MemoryRepositoryFactory::new(store.clone())),
            settings(10),
            token,
        );

        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.remaining, Some(20));
        assert_eq!(deleter.state(), DeleterState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_delay() {
        let store = MemoryStore::new();
        seed_eligible(&store, 50);

        let token = CancellationToken::new();
        let mut deleter = CappedBatchDeleter::new(
            Arc::new(MemoryRepositoryFactory::new(store.clone())),
            settings(10).with_delay(Duration::from_secs(1)),
            token.clone(),
        );

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            token.cancel();
        });

        let report = deleter.run_to_completion().await.unwrap();
        assert_eq!(
            report,
            RunReport {
                deleted: 20,
                batches: 2,
                stop: StopReason::Cancelled,
                remaining: Some(30),
            }
        );
    }
}
