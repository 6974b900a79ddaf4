// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Table and column identifiers used by [`sea_query`]

use sea_query::Alias;
use sweeper_data_model::Collection;

/// Columns shared by every collection table
#[derive(sea_query::Iden)]
pub enum Collections {
    Id,
    Kind,
    Ts,
}

/// The table backing a collection
pub fn table(collection: Collection) -> Alias {
    Alias::new(collection.as_str())
}
