// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

fn main() {
    let schema = sweeper_config::root_schema();
    serde_json::to_writer_pretty(std::io::stdout(), &schema).expect("Failed to serialize schema");
}
