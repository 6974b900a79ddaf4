// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Args, Parser};
use figment::Figment;
use sweeper_config::{
    ConfigurationSection, ConfigurationSectionExt, DatabaseConfig, RetentionConfig,
};
use sweeper_data_model::{Collection, SystemClock};
use sweeper_storage_pg::PgRepositoryFactory;
use sweeper_tasks::{CappedBatchDeleter, RetentionSettings, StopReason};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::{
    shutdown::ShutdownManager,
    util::{database_pool_from_config, retention_settings_from_config},
};

/// Overrides of the `retention` section shared by the commands selecting
/// records
#[derive(Args, Debug)]
pub(super) struct RetentionArgs {
    /// Kind of the records to select
    #[arg(long)]
    kind: Option<String>,

    /// Select records written at or before this instant (RFC 3339)
    #[arg(long, value_name = "TIMESTAMP")]
    before: Option<DateTime<Utc>>,

    /// Collection to select records from
    #[arg(long)]
    collection: Option<Collection>,
}

impl RetentionArgs {
    /// Load the retention settings from the configuration, with the command
    /// line overrides applied
    pub(super) fn load(
        &self,
        figment: &Figment,
        apply: impl FnOnce(&mut RetentionConfig),
    ) -> anyhow::Result<RetentionSettings> {
        let mut config =
            RetentionConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        if let Some(kind) = &self.kind {
            config.kind.clone_from(kind);
        }

        if let Some(before) = self.before {
            config.cutoff_timestamp = Some(before);
            config.older_than = None;
        }

        if let Some(collection) = self.collection {
            config.collection = collection;
        }

        apply(&mut config);

        config.validate(figment).map_err(anyhow::Error::from_boxed)?;

        retention_settings_from_config(&config, &SystemClock::default())
    }
}

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(flatten)]
    retention: RetentionArgs,

    /// Maximum number of records deleted at once
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop after deleting this many records
    #[arg(long)]
    max_total: Option<usize>,

    /// Pause between two batches, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Only count the records which would be deleted
    #[arg(long)]
    dry_run: bool,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.prune");
        async move {
            let settings = self.retention.load(figment, |config| {
                if let Some(batch_size) = self.batch_size {
                    config.batch_size = batch_size;
                }

                if self.max_total.is_some() {
                    config.max_total = self.max_total;
                }

                if let Some(delay_ms) = self.delay_ms {
                    config.delay_ms = delay_ms;
                }
            })?;

            info!(
                collection = %settings.collection,
                kind = settings.predicate.kind(),
                cutoff = %settings.predicate.cutoff(),
                batch_size = settings.batch_size.get(),
                max_total = ?settings.max_total,
                "Pruning records"
            );

            let config =
                DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
            let pool = database_pool_from_config(&config).await?;
            let repository_factory = PgRepositoryFactory::new(pool).boxed();

            if self.dry_run {
                let deleter =
                    CappedBatchDeleter::new(repository_factory, settings, CancellationToken::new());
                let count = deleter.measure().await?;
                info!(count, "Dry run, nothing was deleted");
                println!("{count}");
                return Ok(ExitCode::SUCCESS);
            }

            let shutdown = ShutdownManager::new()?;
            let soft_shutdown_token = shutdown.soft_shutdown_token();
            let hard_shutdown_token = shutdown.hard_shutdown_token();
            tokio::spawn(shutdown.run());

            let mut deleter =
                CappedBatchDeleter::new(repository_factory, settings, soft_shutdown_token);

            // A hard shutdown drops the batch in flight, which rolls its transaction back
            let outcome = tokio::select! {
                report = deleter.run_to_completion() => Some(report),
                () = hard_shutdown_token.cancelled() => None,
            };

            let Some(report) = outcome else {
                warn!(deleted = deleter.deleted(), "Aborted before the current batch finished");
                return Ok(ExitCode::FAILURE);
            };
            let report = report?;

            info!(
                deleted = report.deleted,
                batches = report.batches,
                remaining = ?report.remaining,
                stop = ?report.stop,
                "Pruning finished"
            );

            match report.stop {
                StopReason::Cancelled => {
                    warn!("Pruning was interrupted before completion");
                    Ok(ExitCode::FAILURE)
                }
                StopReason::Stalled => {
                    warn!("Pruning stopped because no batch made progress");
                    Ok(ExitCode::FAILURE)
                }
                StopReason::Exhausted | StopReason::CapReached => Ok(ExitCode::SUCCESS),
            }
        }
        .instrument(span)
        .await
    }
}
