// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Types shared by the storage backends, the retention tasks and the CLI

#![allow(clippy::module_name_repetitions)]

pub mod clock;
mod records;

pub use ulid::Ulid;

pub use self::{
    clock::{Clock, SystemClock},
    records::{
        Collection, InvalidPredicateError, Record, RetentionPredicate, UnknownCollectionError,
    },
};
