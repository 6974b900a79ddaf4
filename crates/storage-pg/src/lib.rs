// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the storage traits for a PostgreSQL database
//!
//! Each collection of the store maps to a table with the same name, holding
//! the record ID, its kind and its timestamp, plus the rest of the document
//! as JSON. The tables are created by the migrations shipped with this crate,
//! available through [`MIGRATOR`].
//!
//! Every [`PgRepository`] wraps a transaction. Nothing is visible to other
//! connections until [`RepositoryTransaction::save`] is called.
//!
//! [`RepositoryTransaction::save`]: sweeper_storage::RepositoryTransaction::save

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use sqlx::migrate::Migrator;

mod errors;
pub(crate) mod filter;
pub(crate) mod iden;
mod records;
mod repository;
pub(crate) mod tracing;

pub(crate) use self::errors::DatabaseInconsistencyError;
pub use self::{
    errors::DatabaseError,
    records::PgRecordRepository,
    repository::{PgRepository, PgRepositoryFactory},
};

/// Embedded migrations, allowing them to run on startup
pub static MIGRATOR: Migrator = sqlx::migrate!();
