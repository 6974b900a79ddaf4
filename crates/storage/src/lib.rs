// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Interactions with the storage backend
//!
//! This crate provides a set of traits that can be implemented to interact with
//! the store holding the records subject to retention. Those traits are called
//! repositories.
//!
//! Repositories are accessed via the [`RepositoryAccess`] trait. This trait
//! can be wrapped in a [`BoxRepository`] to allow using it without caring
//! about the underlying storage backend, and without carrying around the
//! generic type parameter.
//!
//! Two backends exist: `sweeper-storage-pg`, backed by PostgreSQL, and the
//! in-memory one in the [`memory`] module, which is mostly useful for tests.
//!
//! # Errors
//!
//! Every backend error ends up as a [`RepositoryError`], which records
//! whether the failure is transient ([`RepositoryErrorKind::Connectivity`])
//! or not ([`RepositoryErrorKind::Query`]). Callers use this to decide
//! whether an operation is worth retrying.

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod memory;
pub mod records;
pub(crate) mod repository;
mod utils;

pub use sweeper_data_model::{Clock, SystemClock};

pub use self::{
    records::RecordRepository,
    repository::{
        BoxRepository, BoxRepositoryFactory, ClassifiedError, Repository, RepositoryAccess,
        RepositoryError, RepositoryErrorKind, RepositoryFactory, RepositoryTransaction,
    },
    utils::MapErr,
};
