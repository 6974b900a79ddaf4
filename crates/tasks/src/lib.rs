// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Retention work running against the storage backends
//!
//! The main piece is the [`CappedBatchDeleter`], which removes every record
//! matching a [`RetentionPredicate`] in bounded batches, optionally stopping
//! after a maximum number of deletions.
//!
//! [`RetentionPredicate`]: sweeper_data_model::RetentionPredicate

#![deny(clippy::future_not_send, missing_docs)]

mod retention;
mod retry;

pub use self::{
    retention::{
        CappedBatchDeleter, DeleteError, DeleterState, RetentionSettings, RunReport, StopReason,
    },
    retry::RetryPolicy,
};
