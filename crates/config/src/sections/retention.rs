// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sweeper_data_model::Collection;

use super::ConfigurationSection;
use crate::util::field_error;

/// Upper bound on the batch size, which keeps the `DELETE` statement within
/// the limits of the query parameters
pub const MAX_BATCH_SIZE: usize = 10_000;

fn default_kind() -> String {
    "TASK".to_owned()
}

fn default_batch_size() -> usize {
    1000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

/// How transient storage failures are retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryConfig {
    /// How many times a failed batch is retried. Set to 0 to disable retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the delay between two attempts, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Factor applied to the delay after each failed attempt
    #[serde(default = "default_backoff_multiplier")]
    #[schemars(range(min = 1.0))]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before the first retry
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Upper bound on the delay between two attempts
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Which records to delete, and how fast
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetentionConfig {
    /// Kind of the records to delete
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Collection to delete from. Defaults to the event log.
    #[serde(default)]
    pub collection: Collection,

    /// Records with a timestamp at or before this instant are deleted
    ///
    /// This must not be specified if `older_than` is specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff_timestamp: Option<DateTime<Utc>>,

    /// Records older than this many seconds are deleted. The cutoff is
    /// computed once, when the run starts.
    ///
    /// This must not be specified if `cutoff_timestamp` is specified.
    #[schemars(with = "Option<u64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<serde_with::DurationSeconds<u64>>")]
    pub older_than: Option<Duration>,

    /// Maximum number of records fetched and deleted at once
    #[serde(default = "default_batch_size")]
    #[schemars(range(min = 1, max = 10_000))]
    pub batch_size: usize,

    /// Stop after deleting this many records. Unlimited if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total: Option<usize>,

    /// Pause between two batches, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// How transient storage failures are retried
    #[serde(default, skip_serializing_if = "RetryConfig::is_default")]
    pub retry: RetryConfig,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            collection: Collection::default(),
            cutoff_timestamp: None,
            older_than: None,
            batch_size: default_batch_size(),
            max_total: None,
            delay_ms: 0,
            retry: RetryConfig::default(),
        }
    }
}

impl RetentionConfig {
    /// Pause between two batches
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// The inclusive upper bound on record timestamps, relative to `now` if
    /// the retention window is relative
    ///
    /// Returns `None` if neither `cutoff_timestamp` nor `older_than` is set.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(cutoff) = self.cutoff_timestamp {
            return Some(cutoff);
        }

        let older_than = chrono::Duration::from_std(self.older_than?).ok()?;
        now.checked_sub_signed(older_than)
    }
}

impl ConfigurationSection for RetentionConfig {
    const PATH: Option<&'static str> = Some("retention");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        let error =
            |field, message: String| Err(field_error::<Self>(figment, field, message).into());

        if self.kind.trim().is_empty() {
            return error("kind", "must not be empty".to_owned());
        }

        if self.cutoff_timestamp.is_some() && self.older_than.is_some() {
            return error(
                "cutoff_timestamp",
                "cutoff_timestamp must not be specified if older_than is specified".to_owned(),
            );
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return error(
                "batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}"),
            );
        }

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return error(
                "retry",
                "backoff_multiplier must be a number greater or equal to 1".to_owned(),
            );
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return error(
                "retry",
                "initial_delay_ms must not be greater than max_delay_ms".to_owned(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use figment::{
        Figment, Jail,
        providers::{Env, Format, Yaml},
    };

    use super::*;
    use crate::ConfigurationSectionExt;

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    retention:
                      kind: TASK
                      collection: old_tasks
                      cutoff_timestamp: '2016-05-04T00:00:00Z'
                      batch_size: 500
                      max_total: 500000
                      delay_ms: 250
                      retry:
                        max_retries: 5
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = RetentionConfig::extract(&figment).unwrap();

            let cutoff = Utc.with_ymd_and_hms(2016, 5, 4, 0, 0, 0).unwrap();
            assert_eq!(config.kind, "TASK");
            assert_eq!(config.collection, Collection::OldTasks);
            let now = Utc.with_ymd_and_hms(2022, 1, 16, 14, 40, 0).unwrap();
            assert_eq!(config.cutoff(now), Some(cutoff));
            assert_eq!(config.batch_size, 500);
            assert_eq!(config.max_total, Some(500_000));
            assert_eq!(config.delay(), Duration::from_millis(250));
            assert_eq!(config.retry.max_retries, 5);
            assert_eq!(config.retry.initial_delay(), Duration::from_millis(500));

            Ok(())
        });
    }

    #[test]
    fn load_defaults() {
        Jail::expect_with(|_jail| {
            let config = RetentionConfig::extract_or_default(&Figment::new()).unwrap();

            assert_eq!(config.kind, "TASK");
            assert_eq!(config.collection, Collection::EventLog);
            assert_eq!(config.batch_size, 1000);
            assert_eq!(config.max_total, None);
            assert_eq!(config.delay(), Duration::ZERO);
            assert_eq!(config.retry, RetryConfig::default());
            let now = Utc.with_ymd_and_hms(2022, 1, 16, 14, 40, 0).unwrap();
            assert_eq!(config.cutoff(now), None);

            Ok(())
        });
    }

    #[test]
    fn relative_cutoff() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    retention:
                      older_than: 86400
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = RetentionConfig::extract(&figment).unwrap();

            let now = Utc.with_ymd_and_hms(2022, 1, 16, 14, 40, 0).unwrap();
            let expected = Utc.with_ymd_and_hms(2022, 1, 15, 14, 40, 0).unwrap();
            assert_eq!(config.cutoff(now), Some(expected));

            Ok(())
        });
    }

    #[test]
    fn environment_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    retention:
                      older_than: 3600
                      batch_size: 100
                ",
            )?;
            jail.set_env("SWEEPER_RETENTION__BATCH_SIZE", "250");

            let figment = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .merge(Env::prefixed("SWEEPER_").split("__"));
            let config = RetentionConfig::extract(&figment).unwrap();

            assert_eq!(config.batch_size, 250);

            Ok(())
        });
    }

    #[test]
    fn reject_both_cutoffs() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    retention:
                      cutoff_timestamp: '2016-05-04T00:00:00Z'
                      older_than: 3600
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let error = RetentionConfig::extract(&figment).unwrap_err();
            assert!(
                error
                    .to_string()
                    .contains("must not be specified if older_than is specified")
            );

            Ok(())
        });
    }

    #[test]
    fn reject_invalid_batch_size() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    retention:
                      older_than: 3600
                      batch_size: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(RetentionConfig::extract(&figment).is_err());

            jail.create_file(
                "config.yaml",
                r"
                    retention:
                      older_than: 3600
                      batch_size: 10001
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(RetentionConfig::extract(&figment).is_err());

            Ok(())
        });
    }

    #[test]
    fn reject_empty_kind() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
                    retention:
                      kind: "  "
                      older_than: 3600
                "#,
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(RetentionConfig::extract(&figment).is_err());

            Ok(())
        });
    }
}
