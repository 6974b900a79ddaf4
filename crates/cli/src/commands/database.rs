// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use figment::Figment;
use sweeper_config::{ConfigurationSectionExt, DatabaseConfig};
use sweeper_storage_pg::MIGRATOR;
use tracing::{Instrument, info, info_span};

use crate::util::database_connection_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Create the collection tables and their indexes
    Migrate,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let Subcommand::Migrate = self.subcommand;

        let span = info_span!("cli.database.migrate");
        async {
            let config =
                DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
            let mut conn = database_connection_from_config(&config).await?;

            // Run pending migrations
            MIGRATOR
                .run(&mut conn)
                .instrument(info_span!("db.migrate"))
                .await
                .context("could not run migrations")?;

            info!("Database is up to date");
            Ok(ExitCode::SUCCESS)
        }
        .instrument(span)
        .await
    }
}
