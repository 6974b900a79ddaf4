// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

fn main() {
    // `sqlx::migrate!` embeds the migrations, so pick up new files
    println!("cargo:rerun-if-changed=migrations");
}
