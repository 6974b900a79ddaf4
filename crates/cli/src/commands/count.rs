// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use clap::Parser;
use figment::Figment;
use sweeper_config::{ConfigurationSectionExt, DatabaseConfig};
use sweeper_storage_pg::PgRepositoryFactory;
use sweeper_tasks::CappedBatchDeleter;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use super::prune::RetentionArgs;
use crate::util::database_pool_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(flatten)]
    retention: RetentionArgs,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.count");
        async move {
            let settings = self.retention.load(figment, |_| {})?;

            let config =
                DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
            let pool = database_pool_from_config(&config).await?;
            let repository_factory = PgRepositoryFactory::new(pool).boxed();

            let deleter =
                CappedBatchDeleter::new(repository_factory, settings, CancellationToken::new());
            let count = deleter.measure().await?;

            info!(
                count,
                collection = %deleter.settings().collection,
                "Counted matching records"
            );
            println!("{count}");

            Ok(ExitCode::SUCCESS)
        }
        .instrument(span)
        .await
    }
}
