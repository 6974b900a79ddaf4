// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{num::NonZeroUsize, time::Duration};

use anyhow::Context;
use sweeper_config::{DatabaseConfig, RetentionConfig, RetryConfig};
use sweeper_data_model::{Clock, RetentionPredicate};
use sweeper_tasks::{RetentionSettings, RetryPolicy};
use sqlx::{
    ConnectOptions, PgConnection, PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::log::LevelFilter;

fn database_connect_options_from_config(
    config: &DatabaseConfig,
    opts: &DatabaseConnectOptions,
) -> Result<PgConnectOptions, anyhow::Error> {
    let options = if let Some(uri) = config.uri.as_deref() {
        uri.parse()
            .context("could not parse database connection string")?
    } else {
        let mut opts = PgConnectOptions::new().application_name("sweeper");

        if let Some(host) = config.host.as_deref() {
            opts = opts.host(host);
        }

        if let Some(port) = config.port {
            opts = opts.port(port);
        }

        if let Some(socket) = config.socket.as_deref() {
            opts = opts.socket(socket);
        }

        if let Some(username) = config.username.as_deref() {
            opts = opts.username(username);
        }

        if let Some(password) = config.password.as_deref() {
            opts = opts.password(password);
        }

        if let Some(database) = config.database.as_deref() {
            opts = opts.database(database);
        }

        opts
    };

    let options = match (config.ssl_ca.as_deref(), config.ssl_ca_file.as_deref()) {
        (None, None) => options,
        (Some(pem), None) => options.ssl_root_cert_from_pem(pem.as_bytes().to_owned()),
        (None, Some(path)) => options.ssl_root_cert(path),
        (Some(_), Some(_)) => {
            anyhow::bail!("invalid database configuration: both `ssl_ca` and `ssl_ca_file` are set")
        }
    };

    let options = match (
        config.ssl_certificate.as_deref(),
        config.ssl_certificate_file.as_deref(),
    ) {
        (None, None) => options,
        (Some(pem), None) => options.ssl_client_cert_from_pem(pem.as_bytes()),
        (None, Some(path)) => options.ssl_client_cert(path),
        (Some(_), Some(_)) => anyhow::bail!(
            "invalid database configuration: both `ssl_certificate` and `ssl_certificate_file` are set"
        ),
    };

    let options = match (config.ssl_key.as_deref(), config.ssl_key_file.as_deref()) {
        (None, None) => options,
        (Some(pem), None) => options.ssl_client_key_from_pem(pem.as_bytes()),
        (None, Some(path)) => options.ssl_client_key(path),
        (Some(_), Some(_)) => anyhow::bail!(
            "invalid database configuration: both `ssl_key` and `ssl_key_file` are set"
        ),
    };

    let options = if let Some(ssl_mode) = config.ssl_mode {
        use sqlx::postgres::PgSslMode as Pg;
        use sweeper_config::PgSslMode as Config;

        options.ssl_mode(match ssl_mode {
            Config::Disable => Pg::Disable,
            Config::Allow => Pg::Allow,
            Config::Prefer => Pg::Prefer,
            Config::Require => Pg::Require,
            Config::VerifyCa => Pg::VerifyCa,
            Config::VerifyFull => Pg::VerifyFull,
        })
    } else {
        options
    };

    let mut options = options.log_statements(LevelFilter::Debug);

    if opts.log_slow_statements {
        options = options.log_slow_statements(LevelFilter::Warn, Duration::from_secs(1));
    }

    Ok(options)
}

/// Create a database connection pool from the configuration
#[tracing::instrument(name = "db.connect", skip_all)]
pub async fn database_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, anyhow::Error> {
    let options = database_connect_options_from_config(config, &DatabaseConnectOptions::default())?;
    PgPoolOptions::new()
        .max_connections(config.max_connections.into())
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(options)
        .await
        .context("could not connect to the database")
}

pub struct DatabaseConnectOptions {
    pub log_slow_statements: bool,
}

impl Default for DatabaseConnectOptions {
    fn default() -> Self {
        Self {
            log_slow_statements: true,
        }
    }
}

/// Create a single database connection from the configuration
#[tracing::instrument(name = "db.connect", skip_all)]
pub async fn database_connection_from_config(
    config: &DatabaseConfig,
) -> Result<PgConnection, anyhow::Error> {
    database_connect_options_from_config(config, &DatabaseConnectOptions::default())?
        .connect()
        .await
        .context("could not connect to the database")
}

pub fn retry_policy_from_config(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.max_retries,
        initial_delay: config.initial_delay(),
        max_delay: config.max_delay(),
        backoff_multiplier: config.backoff_multiplier,
    }
}

/// Resolve the retention configuration into the settings of a deleter
///
/// A relative cutoff is computed once from the clock, so it stays fixed for
/// the whole run.
pub fn retention_settings_from_config(
    config: &RetentionConfig,
    clock: &dyn Clock,
) -> Result<RetentionSettings, anyhow::Error> {
    let Some(cutoff) = config.cutoff(clock.now()) else {
        anyhow::bail!(
            "no retention cutoff configured, set either `retention.cutoff_timestamp` or `retention.older_than`"
        );
    };

    let predicate = RetentionPredicate::new(config.kind.clone(), cutoff)
        .context("invalid retention predicate")?;

    let batch_size =
        NonZeroUsize::new(config.batch_size).context("the batch size must be positive")?;

    let mut settings = RetentionSettings::new(predicate, batch_size)
        .with_collection(config.collection)
        .with_delay(config.delay())
        .with_retry(retry_policy_from_config(&config.retry));

    if let Some(max_total) = config.max_total {
        settings = settings.with_max_total(max_total);
    }

    Ok(settings)
}
