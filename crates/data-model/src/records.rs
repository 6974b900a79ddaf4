// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// The collections of the operational datastore which hold records subject to
/// retention
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// The event log, where task events accumulate
    #[default]
    EventLog,

    /// Tasks which are still current
    Tasks,

    /// Archived task executions
    OldTasks,
}

impl Collection {
    /// All the known collections
    pub const ALL: [Self; 3] = [Self::EventLog, Self::Tasks, Self::OldTasks];

    /// The name of the collection in the store
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EventLog => "event_log",
            Self::Tasks => "tasks",
            Self::OldTasks => "old_tasks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown collection name
#[derive(Debug, Error)]
#[error("unknown collection {0:?}")]
pub struct UnknownCollectionError(String);

impl FromStr for Collection {
    type Err = UnknownCollectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == s)
            .ok_or_else(|| UnknownCollectionError(s.to_owned()))
    }
}

/// A document owned by the external store.
///
/// Only the fields needed to decide whether it is eligible for deletion are
/// loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Unique key of the record
    pub id: Ulid,

    /// Type discriminator, e.g. `TASK`
    pub kind: String,

    /// When the record was written
    pub ts: DateTime<Utc>,
}

/// Error returned when building a [`RetentionPredicate`] from invalid parts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidPredicateError {
    /// The kind filter is empty
    #[error("the record kind must not be empty")]
    EmptyKind,
}

/// Defines which records are eligible for deletion: the ones of the given
/// `kind` written at or before `cutoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPredicate {
    kind: String,
    cutoff: DateTime<Utc>,
}

impl RetentionPredicate {
    /// Create a new predicate
    ///
    /// # Errors
    ///
    /// Returns an error if the `kind` is empty or only made of whitespace
    pub fn new(
        kind: impl Into<String>,
        cutoff: DateTime<Utc>,
    ) -> Result<Self, InvalidPredicateError> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(InvalidPredicateError::EmptyKind);
        }

        Ok(Self { kind, cutoff })
    }

    /// The kind of records this predicate selects
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The inclusive upper bound on the record timestamp
    #[must_use]
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Whether the given record is eligible for deletion
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        record.kind == self.kind && record.ts <= self.cutoff
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn record(kind: &str, ts: DateTime<Utc>) -> Record {
        Record {
            id: Ulid::nil(),
            kind: kind.to_owned(),
            ts,
        }
    }

    #[test]
    fn test_predicate_matches() {
        let cutoff = Utc.with_ymd_and_hms(2014, 2, 27, 21, 23, 26).unwrap();
        let predicate = RetentionPredicate::new("TASK", cutoff).unwrap();

        assert!(predicate.matches(&record("TASK", cutoff - Duration::days(3))));
        // The cutoff is inclusive
        assert!(predicate.matches(&record("TASK", cutoff)));
        assert!(!predicate.matches(&record("TASK", cutoff + Duration::seconds(1))));
        assert!(!predicate.matches(&record("HOST", cutoff - Duration::days(3))));
    }

    #[test]
    fn test_predicate_rejects_empty_kind() {
        let cutoff = Utc.with_ymd_and_hms(2014, 2, 27, 21, 23, 26).unwrap();
        assert_eq!(
            RetentionPredicate::new("", cutoff),
            Err(InvalidPredicateError::EmptyKind)
        );
        assert_eq!(
            RetentionPredicate::new("  ", cutoff),
            Err(InvalidPredicateError::EmptyKind)
        );
    }

    #[test]
    fn test_collection_names() {
        for collection in Collection::ALL {
            assert_eq!(collection.as_str().parse::<Collection>().unwrap(), collection);
        }

        assert_eq!(Collection::default(), Collection::EventLog);
        assert!("events".parse::<Collection>().is_err());
    }
}
